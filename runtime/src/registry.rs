//! Resource registry: the store, the clock and the per-resource lock table.
//!
//! Every leasing component shares one registry. It owns no policy; it provides
//! the primitives the lease manager, committer, ledger and reclaimer are built
//! from and makes sure they all read time from the same clock and serialize on
//! the same locks.

use crate::locks::{KeyGuard, KeyedLocks};
use crate::metrics::LeaseMetrics;
use crate::reclaim::{self, ReclaimMode};
use chrono::{DateTime, Utc};
use seatlease_core::environment::Clock;
use seatlease_core::{
    Allocation, BatchOutcome, CasOutcome, CollectionId, LeaseError, LeaseStore, Resource,
    ResourceId, ResourceKey, Transition,
};
use std::sync::Arc;
use std::time::Instant;

/// Shared access to resource records.
pub struct ResourceRegistry {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<ResourceKey>,
}

impl ResourceRegistry {
    /// Creates a registry over `store`, reading time from `clock`
    #[must_use]
    pub fn new(store: Arc<dyn LeaseStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    /// Current time according to the injected clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LeaseStore> {
        &self.store
    }

    /// Take the lock for one resource.
    pub async fn lock(&self, key: &ResourceKey) -> KeyGuard<ResourceKey> {
        let started = Instant::now();
        let guard = self.locks.lock(key).await;
        LeaseMetrics::record_lock_wait(started.elapsed());
        guard
    }

    /// Take the locks for several resources in global key order.
    pub async fn lock_all(
        &self,
        keys: impl IntoIterator<Item = ResourceKey>,
    ) -> Vec<KeyGuard<ResourceKey>> {
        let started = Instant::now();
        let guards = self.locks.lock_all(keys).await;
        LeaseMetrics::record_lock_wait(started.elapsed());
        guards
    }

    /// Drop lock table entries left behind by cancelled waiters
    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }

    /// Number of resources with a live lock table entry
    #[must_use]
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    /// Create available resources in `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] if any id already exists or the store fails.
    pub async fn provision(
        &self,
        collection: &CollectionId,
        resources: impl IntoIterator<Item = ResourceId>,
    ) -> Result<usize, LeaseError> {
        let keys: Vec<ResourceKey> = resources
            .into_iter()
            .map(|resource| ResourceKey::new(collection.clone(), resource))
            .collect();
        let created = self.store.provision(keys).await?;
        tracing::info!(collection = %collection, created, "Provisioned resources");
        Ok(created)
    }

    /// Raw read. Expired holds come back as stored.
    pub(crate) async fn find(&self, key: &ResourceKey) -> Result<Option<Resource>, LeaseError> {
        Ok(self.store.get(key).await?)
    }

    /// Raw read for callers that already hold the resource lock.
    pub(crate) async fn load(&self, key: &ResourceKey) -> Result<Resource, LeaseError> {
        self.find(key)
            .await?
            .ok_or_else(|| LeaseError::ResourceNotFound(key.clone()))
    }

    /// Load one resource, returning an expired hold to the pool before it is read.
    ///
    /// Takes the resource's lock, so callers must not already hold it.
    ///
    /// # Errors
    ///
    /// - [`LeaseError::ResourceNotFound`]: no such resource
    /// - [`LeaseError::Store`]: the store failed
    pub async fn get(&self, key: &ResourceKey) -> Result<Resource, LeaseError> {
        let _guard = self.lock(key).await;
        let observed = self.load(key).await?;
        let now = self.now();
        if !observed.is_reclaimable(now) {
            return Ok(observed);
        }
        Ok(reclaim::settle(self, observed, now, ReclaimMode::Lazy)
            .await?
            .resource)
    }

    /// Load every resource of a collection, returning expired holds to the pool first.
    ///
    /// Each reclamation happens under that resource's lock; the rest of the listing
    /// is a plain read.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] if the store fails.
    pub async fn list(&self, collection: &CollectionId) -> Result<Vec<Resource>, LeaseError> {
        let now = self.now();
        let mut resources = self.store.list(collection).await?;
        for resource in &mut resources {
            if !resource.is_reclaimable(now) {
                continue;
            }
            let _guard = self.lock(&resource.key).await;
            if let Some(current) = self.find(&resource.key).await? {
                *resource = reclaim::settle(self, current, now, ReclaimMode::Lazy)
                    .await?
                    .resource;
            }
        }
        Ok(resources)
    }

    /// Compare-and-swap one resource. Callers must hold its lock.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] if the store fails.
    pub async fn compare_and_swap(&self, transition: Transition) -> Result<CasOutcome, LeaseError> {
        let outcome = self.store.compare_and_swap(transition).await?;
        if let CasOutcome::Conflict(current) = &outcome {
            LeaseMetrics::record_cas_conflict();
            tracing::debug!(
                key = %current.key,
                version = %current.version,
                "Compare-and-swap lost to a concurrent writer"
            );
        }
        Ok(outcome)
    }

    /// Apply a multi-resource batch. Callers must hold every member's lock.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] if the store fails.
    pub async fn apply_batch(
        &self,
        transitions: Vec<Transition>,
        allocation: Allocation,
    ) -> Result<BatchOutcome, LeaseError> {
        let outcome = self.store.apply_batch(transitions, allocation).await?;
        if let BatchOutcome::Conflict { key, .. } = &outcome {
            LeaseMetrics::record_cas_conflict();
            tracing::debug!(key = %key, "Batch rejected: member changed concurrently");
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

/// Seat identifiers for a rectangular grid: rows `A`, `B`, … and seats `1..=seats_per_row`.
///
/// Rows past `Z` continue as `AA`, `AB`, …
#[must_use]
pub fn seat_grid(rows: usize, seats_per_row: u32) -> Vec<ResourceId> {
    (0..rows)
        .flat_map(|row| {
            let label = row_label(row);
            (1..=seats_per_row).map(move |seat| ResourceId::new(format!("{label}{seat}")))
        })
        .collect()
}

fn row_label(mut index: usize) -> String {
    let mut label = Vec::new();
    loop {
        let letter = u8::try_from(index % 26).unwrap_or(0);
        label.push(char::from(b'A' + letter));
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    label.iter().rev().collect()
}
