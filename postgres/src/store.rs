//! `PostgreSQL` implementation of [`LeaseStore`].
//!
//! Compare-and-swap is a single `UPDATE ... WHERE version = $expected RETURNING *`:
//! the row lock Postgres takes for the update serializes concurrent writers, and
//! a writer whose expected version is stale matches zero rows. Batches run the same
//! updates inside one transaction and roll back on the first miss.

use crate::rows::{AllocationRow, ResourceRow, StateColumns, version_to_db};
use seatlease_core::store::StoreFuture;
use seatlease_core::{
    Allocation, AllocationId, BatchOutcome, CasOutcome, CollectionId, HolderId, LeaseStore,
    Resource, ResourceKey, StoreError, Transition,
};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Default connection pool size
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

fn backend(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        metrics::counter!("lease_store.errors", "operation" => context).increment(1);
        StoreError::Backend(format!("{context}: {e}"))
    }
}

/// Durable lease store over `PostgreSQL`.
///
/// # Example
///
/// ```no_run
/// use seatlease_postgres::PostgresLeaseStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresLeaseStore::connect("postgres://localhost/seatlease").await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresLeaseStore {
    pool: PgPool,
}

impl PostgresLeaseStore {
    /// Connect with a default-sized pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(backend("connect"))?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `lease_resources` and `lease_allocations` tables if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn fetch(&self, key: &ResourceKey) -> Result<Option<Resource>, StoreError> {
        let row: Option<ResourceRow> = sqlx::query_as(
            r"
            SELECT * FROM lease_resources
            WHERE collection_id = $1 AND resource_id = $2
            ",
        )
        .bind(key.collection.as_str())
        .bind(key.resource.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("get"))?;

        row.map(Resource::try_from).transpose()
    }
}

/// Apply one transition if the row is still at the expected version
async fn update_versioned<'e, E>(
    executor: E,
    transition: &Transition,
) -> Result<Option<Resource>, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let columns = StateColumns::from(&transition.next);
    let row: Option<ResourceRow> = sqlx::query_as(
        r"
        UPDATE lease_resources
        SET status = $3,
            holder_id = $4,
            granted_at = $5,
            expires_at = $6,
            allocation_id = $7,
            allocated_by = $8,
            allocated_at = $9,
            last_holder = $10,
            version = version + 1
        WHERE collection_id = $1 AND resource_id = $2 AND version = $11
        RETURNING *
        ",
    )
    .bind(transition.key.collection.as_str())
    .bind(transition.key.resource.as_str())
    .bind(columns.status)
    .bind(columns.holder_id)
    .bind(columns.granted_at)
    .bind(columns.expires_at)
    .bind(columns.allocation_id)
    .bind(columns.allocated_by)
    .bind(columns.allocated_at)
    .bind(transition.last_holder.as_ref().map(HolderId::as_str))
    .bind(version_to_db(transition.expected)?)
    .fetch_optional(executor)
    .await
    .map_err(backend("compare_and_swap"))?;

    row.map(Resource::try_from).transpose()
}

impl LeaseStore for PostgresLeaseStore {
    fn provision(&self, keys: Vec<ResourceKey>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(backend("provision"))?;

            for key in &keys {
                let inserted = sqlx::query(
                    r"
                    INSERT INTO lease_resources (collection_id, resource_id)
                    VALUES ($1, $2)
                    ON CONFLICT DO NOTHING
                    ",
                )
                .bind(key.collection.as_str())
                .bind(key.resource.as_str())
                .execute(&mut *tx)
                .await
                .map_err(backend("provision"))?
                .rows_affected();

                if inserted == 0 {
                    tx.rollback().await.map_err(backend("provision"))?;
                    return Err(StoreError::Duplicate(key.clone()));
                }
            }

            tx.commit().await.map_err(backend("provision"))?;
            Ok(keys.len())
        })
    }

    fn get<'a>(&'a self, key: &'a ResourceKey) -> StoreFuture<'a, Option<Resource>> {
        Box::pin(self.fetch(key))
    }

    fn list<'a>(&'a self, collection: &'a CollectionId) -> StoreFuture<'a, Vec<Resource>> {
        Box::pin(async move {
            let rows: Vec<ResourceRow> = sqlx::query_as(
                r#"
                SELECT * FROM lease_resources
                WHERE collection_id = $1
                ORDER BY resource_id COLLATE "C"
                "#,
            )
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend("list"))?;

            rows.into_iter().map(Resource::try_from).collect()
        })
    }

    fn list_held(&self) -> StoreFuture<'_, Vec<Resource>> {
        Box::pin(async move {
            let rows: Vec<ResourceRow> = sqlx::query_as(
                r#"
                SELECT * FROM lease_resources
                WHERE status = 'held'
                ORDER BY collection_id COLLATE "C", resource_id COLLATE "C"
                "#,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(backend("list_held"))?;

            rows.into_iter().map(Resource::try_from).collect()
        })
    }

    fn compare_and_swap(&self, transition: Transition) -> StoreFuture<'_, CasOutcome> {
        Box::pin(async move {
            if let Some(updated) = update_versioned(&self.pool, &transition).await? {
                return Ok(CasOutcome::Swapped(updated));
            }

            match self.fetch(&transition.key).await? {
                Some(current) => {
                    tracing::debug!(
                        key = %transition.key,
                        expected = %transition.expected,
                        current = %current.version,
                        "Compare-and-swap lost to a concurrent writer"
                    );
                    Ok(CasOutcome::Conflict(current))
                }
                None => Err(StoreError::NotFound(transition.key)),
            }
        })
    }

    fn apply_batch(
        &self,
        transitions: Vec<Transition>,
        allocation: Allocation,
    ) -> StoreFuture<'_, BatchOutcome> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(backend("apply_batch"))?;
            let mut applied = Vec::with_capacity(transitions.len());

            for transition in &transitions {
                if let Some(updated) = update_versioned(&mut *tx, transition).await? {
                    applied.push(updated);
                    continue;
                }

                tx.rollback().await.map_err(backend("apply_batch"))?;
                let current = self.fetch(&transition.key).await?;
                tracing::debug!(key = %transition.key, "Batch rolled back on stale version");
                return Ok(BatchOutcome::Conflict {
                    key: transition.key.clone(),
                    current,
                });
            }

            let resource_ids: Vec<String> = allocation
                .resources
                .iter()
                .map(|id| id.as_str().to_string())
                .collect();
            sqlx::query(
                r"
                INSERT INTO lease_allocations (
                    allocation_id, owner_id, collection_id, resource_ids,
                    status, created_at, cancelled_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (allocation_id) DO UPDATE
                SET status = EXCLUDED.status,
                    cancelled_at = EXCLUDED.cancelled_at
                ",
            )
            .bind(*allocation.id.as_uuid())
            .bind(allocation.owner.as_str())
            .bind(allocation.collection.as_str())
            .bind(&resource_ids)
            .bind(allocation.status.as_str())
            .bind(allocation.created_at)
            .bind(allocation.cancelled_at)
            .execute(&mut *tx)
            .await
            .map_err(backend("apply_batch"))?;

            tx.commit().await.map_err(backend("apply_batch"))?;
            Ok(BatchOutcome::Applied(applied))
        })
    }

    fn get_allocation(&self, id: AllocationId) -> StoreFuture<'_, Option<Allocation>> {
        Box::pin(async move {
            let row: Option<AllocationRow> = sqlx::query_as(
                r"
                SELECT allocation_id, owner_id, collection_id, resource_ids,
                       status, created_at, cancelled_at
                FROM lease_allocations
                WHERE allocation_id = $1
                ",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("get_allocation"))?;

            row.map(Allocation::try_from).transpose()
        })
    }

    fn list_allocations<'a>(&'a self, owner: &'a HolderId) -> StoreFuture<'a, Vec<Allocation>> {
        Box::pin(async move {
            let rows: Vec<AllocationRow> = sqlx::query_as(
                r"
                SELECT allocation_id, owner_id, collection_id, resource_ids,
                       status, created_at, cancelled_at
                FROM lease_allocations
                WHERE owner_id = $1
                ORDER BY created_at DESC, sequence DESC
                ",
            )
            .bind(owner.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend("list_allocations"))?;

            rows.into_iter().map(Allocation::try_from).collect()
        })
    }
}
