//! All-or-nothing conversion of held resources into an allocation.

use crate::metrics::AllocationMetrics;
use crate::reclaim::{self, ReclaimMode};
use crate::registry::ResourceRegistry;
use chrono::{DateTime, Utc};
use seatlease_core::{
    Allocation, AllocationId, BatchOutcome, CollectionId, CommitFailure, CommitFailureReason,
    HolderId, LeaseError, Resource, ResourceId, ResourceKey, ResourceState, Transition,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Outcome of validating one commit member
enum Check {
    Ready(Resource),
    Failed(CommitFailureReason),
}

/// Commits holds into allocations.
#[derive(Debug)]
pub struct AllocationCommitter {
    registry: Arc<ResourceRegistry>,
}

impl AllocationCommitter {
    /// Creates a committer over `registry`
    #[must_use]
    pub const fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self { registry }
    }

    /// Turn `holder`'s holds on `resources` into one allocation.
    ///
    /// Duplicate ids are collapsed. Every member is locked in global key order,
    /// then validated; if any member fails, nothing changes and every failing
    /// member is reported. Otherwise all members become allocated and the
    /// allocation is recorded in one atomic store write.
    ///
    /// # Errors
    ///
    /// - [`LeaseError::EmptySet`]: no resources requested
    /// - [`LeaseError::PartialFailure`]: one or more members are missing, not held,
    ///   held by someone else, expired or allocated
    /// - [`LeaseError::Store`]: the store failed
    pub async fn commit(
        &self,
        collection: &CollectionId,
        resources: &[ResourceId],
        holder: &HolderId,
    ) -> Result<Allocation, LeaseError> {
        let members: BTreeSet<ResourceId> = resources.iter().cloned().collect();
        if members.is_empty() {
            return Err(LeaseError::EmptySet);
        }

        let keys: Vec<ResourceKey> = members
            .iter()
            .map(|resource| ResourceKey::new(collection.clone(), resource.clone()))
            .collect();
        let _guards = self.registry.lock_all(keys.iter().cloned()).await;
        let now = self.registry.now();

        let mut ready = Vec::with_capacity(keys.len());
        let mut failures = Vec::new();
        for key in &keys {
            match self.check(key, holder, now).await? {
                Check::Ready(resource) => ready.push(resource),
                Check::Failed(reason) => {
                    failures.push(CommitFailure::new(key.resource.clone(), reason));
                }
            }
        }

        if !failures.is_empty() {
            AllocationMetrics::record_commit_failed();
            tracing::info!(
                collection = %collection,
                holder = %holder,
                requested = keys.len(),
                failed = failures.len(),
                "Commit rejected"
            );
            return Err(LeaseError::PartialFailure(failures));
        }

        let allocation = Allocation::new(
            AllocationId::new(),
            holder.clone(),
            collection.clone(),
            members,
            now,
        );
        let mark = allocation.mark();
        let transitions = ready
            .iter()
            .map(|resource| Transition::new(resource, ResourceState::Allocated(mark.clone())))
            .collect();

        match self
            .registry
            .apply_batch(transitions, allocation.clone())
            .await?
        {
            BatchOutcome::Applied(_) => {
                AllocationMetrics::record_committed(allocation.resources.len());
                tracing::info!(
                    allocation_id = %allocation.id,
                    collection = %collection,
                    holder = %holder,
                    resources = allocation.resources.len(),
                    "Allocation committed"
                );
                Ok(allocation)
            }
            BatchOutcome::Conflict { key, .. } => {
                AllocationMetrics::record_commit_failed();
                tracing::warn!(
                    key = %key,
                    holder = %holder,
                    "Commit lost to a concurrent writer on the shared store"
                );
                Err(LeaseError::PartialFailure(vec![CommitFailure::new(
                    key.resource,
                    CommitFailureReason::Changed,
                )]))
            }
        }
    }

    /// Validate one member. The caller holds its lock.
    async fn check(
        &self,
        key: &ResourceKey,
        holder: &HolderId,
        now: DateTime<Utc>,
    ) -> Result<Check, LeaseError> {
        let Some(observed) = self.registry.find(key).await? else {
            return Ok(Check::Failed(CommitFailureReason::NotFound));
        };

        if observed.is_held_by(holder, now) {
            return Ok(Check::Ready(observed));
        }

        if observed.is_reclaimable(now) {
            let own = observed.state.hold().is_some_and(|hold| &hold.holder == holder);
            reclaim::settle(&self.registry, observed, now, ReclaimMode::Lazy).await?;
            let reason = if own {
                CommitFailureReason::Expired
            } else {
                CommitFailureReason::NotHeld
            };
            return Ok(Check::Failed(reason));
        }

        let reason = match &observed.state {
            ResourceState::Held(_) => CommitFailureReason::HeldByOther,
            ResourceState::Available => CommitFailureReason::NotHeld,
            ResourceState::Allocated(_) => CommitFailureReason::Allocated,
        };
        Ok(Check::Failed(reason))
    }
}
