//! Persistence contract for resource and allocation records.
//!
//! The store is the single shared mutable state of the system. Its only mutation
//! primitives are:
//!
//! - [`LeaseStore::compare_and_swap`]: move one resource to a new state if and only if
//!   it is still at the version the caller observed
//! - [`LeaseStore::apply_batch`]: the same for several resources at once, together
//!   with an allocation record, all or nothing
//!
//! Keying every write on the observed version makes blind overwrites impossible: a
//! writer that lost a race gets the current record back instead of clobbering it.
//!
//! # Implementations
//!
//! - `InMemoryLeaseStore` (in `seatlease-testing`): `HashMap` behind one lock
//! - `PostgresLeaseStore` (in `seatlease-postgres`): durable, one row per resource
//!
//! # Dyn Compatibility
//!
//! This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
//! so the runtime can hold it as `Arc<dyn LeaseStore>`.

use crate::types::{
    Allocation, AllocationId, CollectionId, HolderId, Resource, ResourceKey, ResourceState,
    Version,
};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors raised by a store implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Provisioning tried to create a resource that already exists
    #[error("Resource already exists: {0}")]
    Duplicate(ResourceKey),

    /// A write targeted a resource that does not exist
    #[error("Resource not found in store: {0}")]
    NotFound(ResourceKey),

    /// Database connection or query failure
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A stored record could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// A requested state change for one resource, keyed on the version it was decided from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Resource to change
    pub key: ResourceKey,
    /// Version the decision was based on
    pub expected: Version,
    /// State to move to
    pub next: ResourceState,
    /// Last holder to record alongside the new state
    pub last_holder: Option<HolderId>,
}

impl Transition {
    /// Builds a transition from an observed resource.
    ///
    /// Moving into `Held` records the new holder as last holder; every other
    /// move keeps the previous last holder.
    #[must_use]
    pub fn new(observed: &Resource, next: ResourceState) -> Self {
        let last_holder = match &next {
            ResourceState::Held(hold) => Some(hold.holder.clone()),
            _ => observed.last_holder.clone(),
        };
        Self {
            key: observed.key.clone(),
            expected: observed.version,
            next,
            last_holder,
        }
    }

    /// The record this transition produces when applied
    #[must_use]
    pub fn applied(&self) -> Resource {
        Resource {
            key: self.key.clone(),
            state: self.next.clone(),
            last_holder: self.last_holder.clone(),
            version: self.expected.next(),
        }
    }
}

/// Outcome of a single compare-and-swap
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The swap was applied; contains the new record
    Swapped(Resource),
    /// The resource moved on; contains the current record, nothing was written
    Conflict(Resource),
}

/// Outcome of an atomic batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every transition and the allocation record were written
    Applied(Vec<Resource>),
    /// Nothing was written because one resource was not at its expected version
    Conflict {
        /// First resource found out of date
        key: ResourceKey,
        /// Its current record, if it still exists
        current: Option<Resource>,
    },
}

/// Storage for resources and allocations.
///
/// Implementations must be `Send + Sync`; every write must be atomic with respect to
/// concurrent readers so no caller ever observes a torn record.
pub trait LeaseStore: Send + Sync {
    /// Create available resources.
    ///
    /// # Errors
    ///
    /// - `Duplicate`: one of the keys already exists (nothing is created)
    /// - `Backend`: storage failure
    fn provision(&self, keys: Vec<ResourceKey>) -> StoreFuture<'_, usize>;

    /// Load one resource.
    ///
    /// # Errors
    ///
    /// - `Backend` / `Corrupt`: storage failure
    fn get<'a>(&'a self, key: &'a ResourceKey) -> StoreFuture<'a, Option<Resource>>;

    /// Load every resource of a collection, ordered by resource id.
    ///
    /// # Errors
    ///
    /// - `Backend` / `Corrupt`: storage failure
    fn list<'a>(&'a self, collection: &'a CollectionId) -> StoreFuture<'a, Vec<Resource>>;

    /// Load every held resource across all collections, expired or not.
    ///
    /// # Errors
    ///
    /// - `Backend` / `Corrupt`: storage failure
    fn list_held(&self) -> StoreFuture<'_, Vec<Resource>>;

    /// Apply `transition` if the resource is still at `transition.expected`.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the resource does not exist
    /// - `Backend` / `Corrupt`: storage failure
    fn compare_and_swap(&self, transition: Transition) -> StoreFuture<'_, CasOutcome>;

    /// Apply every transition and upsert `allocation`, or change nothing.
    ///
    /// # Errors
    ///
    /// - `Backend` / `Corrupt`: storage failure
    fn apply_batch(
        &self,
        transitions: Vec<Transition>,
        allocation: Allocation,
    ) -> StoreFuture<'_, BatchOutcome>;

    /// Load one allocation.
    ///
    /// # Errors
    ///
    /// - `Backend` / `Corrupt`: storage failure
    fn get_allocation(&self, id: AllocationId) -> StoreFuture<'_, Option<Allocation>>;

    /// Load every allocation owned by `owner`, newest first.
    ///
    /// # Errors
    ///
    /// - `Backend` / `Corrupt`: storage failure
    fn list_allocations<'a>(&'a self, owner: &'a HolderId) -> StoreFuture<'a, Vec<Allocation>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AllocationId, AllocationMark, HoldInfo};
    use chrono::{Duration, Utc};

    #[test]
    fn entering_a_hold_records_the_new_holder() {
        let observed = Resource::available(ResourceKey::new("C1", "S1"));
        let now = Utc::now();
        let transition = Transition::new(
            &observed,
            ResourceState::Held(HoldInfo {
                holder: HolderId::new("alice"),
                granted_at: now,
                expires_at: now + Duration::seconds(300),
            }),
        );

        let applied = transition.applied();
        assert_eq!(applied.last_holder, Some(HolderId::new("alice")));
        assert_eq!(applied.version, Version::new(1));
    }

    #[test]
    fn leaving_a_hold_keeps_the_last_holder() {
        let observed = Resource {
            last_holder: Some(HolderId::new("alice")),
            version: Version::new(4),
            ..Resource::available(ResourceKey::new("C1", "S1"))
        };
        let transition = Transition::new(
            &observed,
            ResourceState::Allocated(AllocationMark {
                allocation_id: AllocationId::new(),
                allocated_by: HolderId::new("alice"),
                allocated_at: Utc::now(),
            }),
        );

        assert_eq!(transition.expected, Version::new(4));
        assert_eq!(transition.last_holder, Some(HolderId::new("alice")));
        assert_eq!(transition.applied().version, Version::new(5));
    }
}
