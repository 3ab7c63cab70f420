//! In-memory lease store for fast, deterministic testing.
//!
//! [`InMemoryLeaseStore`] implements the full [`LeaseStore`] contract over a
//! `BTreeMap` behind one `RwLock`. Two knobs let tests exercise failure paths
//! without a database:
//!
//! - [`InMemoryLeaseStore::interfere`]: the next N compare-and-swap writes lose to a
//!   simulated writer in another process
//! - [`InMemoryLeaseStore::set_unavailable`]: every call fails with a backend error

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use seatlease_core::store::StoreFuture;
use seatlease_core::{
    Allocation, AllocationId, BatchOutcome, CasOutcome, CollectionId, HolderId, LeaseStore,
    Resource, ResourceKey, ResourceStatus, StoreError, Transition,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct State {
    resources: BTreeMap<ResourceKey, Resource>,
    allocations: HashMap<AllocationId, (u64, Allocation)>,
    next_sequence: u64,
}

/// In-memory lease store.
///
/// Cloning shares the underlying data.
///
/// # Example
///
/// ```
/// use seatlease_testing::InMemoryLeaseStore;
/// use seatlease_core::{LeaseStore, ResourceKey};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryLeaseStore::new();
/// store.provision(vec![ResourceKey::new("C1", "S1")]).await?;
///
/// let resource = store.get(&ResourceKey::new("C1", "S1")).await?;
/// assert!(resource.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryLeaseStore {
    state: Arc<RwLock<State>>,
    interference: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLeaseStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `writes` compare-and-swap calls lose to a simulated external writer.
    ///
    /// Each affected call bumps the target's version without changing its state,
    /// then reports a conflict, as if another process had written first.
    pub fn interfere(&self, writes: usize) {
        self.interference.store(writes, Ordering::SeqCst);
    }

    /// Make every call fail with [`StoreError::Backend`] until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored resources
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap().resources.len()
    }

    /// Whether no resource is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().unwrap().resources.is_empty()
    }

    /// Number of stored allocations, any status
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.state.read().unwrap().allocations.len()
    }

    /// Every stored resource, for whole-store assertions
    #[must_use]
    pub fn snapshot(&self) -> Vec<Resource> {
        self.state.read().unwrap().resources.values().cloned().collect()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Backend("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn take_interference(&self) -> bool {
        self.interference
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl std::fmt::Debug for InMemoryLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLeaseStore")
            .field("resources", &self.len())
            .field("allocations", &self.allocation_count())
            .finish()
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn provision(&self, keys: Vec<ResourceKey>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.write().unwrap();
            {
                let mut seen = BTreeSet::new();
                for key in &keys {
                    if state.resources.contains_key(key) || !seen.insert(key) {
                        return Err(StoreError::Duplicate(key.clone()));
                    }
                }
            }

            let created = keys.len();
            for key in keys {
                state.resources.insert(key.clone(), Resource::available(key));
            }
            Ok(created)
        })
    }

    fn get<'a>(&'a self, key: &'a ResourceKey) -> StoreFuture<'a, Option<Resource>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.state.read().unwrap().resources.get(key).cloned())
        })
    }

    fn list<'a>(&'a self, collection: &'a CollectionId) -> StoreFuture<'a, Vec<Resource>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .state
                .read()
                .unwrap()
                .resources
                .values()
                .filter(|resource| &resource.key.collection == collection)
                .cloned()
                .collect())
        })
    }

    fn list_held(&self) -> StoreFuture<'_, Vec<Resource>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .state
                .read()
                .unwrap()
                .resources
                .values()
                .filter(|resource| resource.status() == ResourceStatus::Held)
                .cloned()
                .collect())
        })
    }

    fn compare_and_swap(&self, transition: Transition) -> StoreFuture<'_, CasOutcome> {
        Box::pin(async move {
            self.check_available()?;
            let interfere = self.take_interference();
            let mut state = self.state.write().unwrap();
            let current = state
                .resources
                .get_mut(&transition.key)
                .ok_or_else(|| StoreError::NotFound(transition.key.clone()))?;

            if interfere {
                current.version = current.version.next();
            }
            if current.version != transition.expected {
                return Ok(CasOutcome::Conflict(current.clone()));
            }

            *current = transition.applied();
            Ok(CasOutcome::Swapped(current.clone()))
        })
    }

    fn apply_batch(
        &self,
        transitions: Vec<Transition>,
        allocation: Allocation,
    ) -> StoreFuture<'_, BatchOutcome> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.write().unwrap();

            for transition in &transitions {
                let current = state.resources.get(&transition.key);
                if current.map(|r| r.version) != Some(transition.expected) {
                    return Ok(BatchOutcome::Conflict {
                        key: transition.key.clone(),
                        current: current.cloned(),
                    });
                }
            }

            let applied: Vec<Resource> = transitions.iter().map(Transition::applied).collect();
            for resource in &applied {
                state.resources.insert(resource.key.clone(), resource.clone());
            }

            let sequence = match state.allocations.get(&allocation.id) {
                Some((sequence, _)) => *sequence,
                None => {
                    state.next_sequence += 1;
                    state.next_sequence
                }
            };
            state.allocations.insert(allocation.id, (sequence, allocation));

            Ok(BatchOutcome::Applied(applied))
        })
    }

    fn get_allocation(&self, id: AllocationId) -> StoreFuture<'_, Option<Allocation>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .state
                .read()
                .unwrap()
                .allocations
                .get(&id)
                .map(|(_, allocation)| allocation.clone()))
        })
    }

    fn list_allocations<'a>(&'a self, owner: &'a HolderId) -> StoreFuture<'a, Vec<Allocation>> {
        Box::pin(async move {
            self.check_available()?;
            let state = self.state.read().unwrap();
            let mut owned: Vec<&(u64, Allocation)> = state
                .allocations
                .values()
                .filter(|(_, allocation)| &allocation.owner == owner)
                .collect();
            owned.sort_by(|(a_seq, a), (b_seq, b)| {
                b.created_at.cmp(&a.created_at).then(b_seq.cmp(a_seq))
            });
            Ok(owned
                .into_iter()
                .map(|(_, allocation)| allocation.clone())
                .collect())
        })
    }
}
