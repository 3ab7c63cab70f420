//! Allocation ledger: lookup, listing and cancellation.
//!
//! Allocations are append-only. Cancelling one flips its status and returns
//! every member resource to the pool in a single atomic store write.

use crate::metrics::AllocationMetrics;
use crate::registry::ResourceRegistry;
use seatlease_core::{
    Allocation, AllocationId, BatchOutcome, HolderId, LeaseError, ResourceState, Transition,
};
use std::sync::Arc;

/// Reads and cancels committed allocations.
#[derive(Debug)]
pub struct AllocationLedger {
    registry: Arc<ResourceRegistry>,
}

impl AllocationLedger {
    /// Creates a ledger over `registry`
    #[must_use]
    pub const fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self { registry }
    }

    /// Load one allocation.
    ///
    /// # Errors
    ///
    /// - [`LeaseError::AllocationNotFound`]: no such allocation
    /// - [`LeaseError::Store`]: the store failed
    pub async fn get(&self, id: AllocationId) -> Result<Allocation, LeaseError> {
        self.registry
            .store()
            .get_allocation(id)
            .await?
            .ok_or(LeaseError::AllocationNotFound(id))
    }

    /// Every allocation owned by `owner`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] if the store fails.
    pub async fn list_for(&self, owner: &HolderId) -> Result<Vec<Allocation>, LeaseError> {
        Ok(self.registry.store().list_allocations(owner).await?)
    }

    /// Cancel an active allocation and return its resources to the pool.
    ///
    /// # Errors
    ///
    /// - [`LeaseError::AllocationNotFound`]: no such allocation
    /// - [`LeaseError::NotOwner`]: `requester` does not own it
    /// - [`LeaseError::AlreadyCancelled`]: it was cancelled before
    /// - [`LeaseError::InternalConsistency`]: a member resource is not allocated to it
    /// - [`LeaseError::Store`]: the store failed
    pub async fn cancel(
        &self,
        id: AllocationId,
        requester: &HolderId,
    ) -> Result<Allocation, LeaseError> {
        let allocation = self.get(id).await?;
        Self::authorize(&allocation, requester)?;

        let _guards = self.registry.lock_all(allocation.keys()).await;

        // Re-read under the locks: a concurrent cancel may have won.
        let allocation = self.get(id).await?;
        Self::authorize(&allocation, requester)?;

        let mut transitions = Vec::with_capacity(allocation.resources.len());
        for key in allocation.keys() {
            let resource = self.registry.find(&key).await?;
            let allocated_here = resource
                .as_ref()
                .and_then(|r| r.state.allocation())
                .is_some_and(|mark| mark.allocation_id == id);

            match resource {
                Some(resource) if allocated_here => {
                    transitions.push(Transition::new(&resource, ResourceState::Available));
                }
                other => {
                    let found = other.map_or_else(
                        || "missing".to_string(),
                        |r| r.status().as_str().to_string(),
                    );
                    return Err(Self::inconsistent(
                        id,
                        format!("member {key} of allocation {id} is {found}, expected allocated to it"),
                    ));
                }
            }
        }

        let cancelled = allocation.cancelled(self.registry.now());
        match self
            .registry
            .apply_batch(transitions, cancelled.clone())
            .await?
        {
            BatchOutcome::Applied(_) => {
                AllocationMetrics::record_cancelled();
                tracing::info!(
                    allocation_id = %id,
                    owner = %cancelled.owner,
                    resources = cancelled.resources.len(),
                    "Allocation cancelled"
                );
                Ok(cancelled)
            }
            BatchOutcome::Conflict { key, .. } => Err(Self::inconsistent(
                id,
                format!("member {key} of allocation {id} changed during cancellation"),
            )),
        }
    }

    fn authorize(allocation: &Allocation, requester: &HolderId) -> Result<(), LeaseError> {
        if &allocation.owner != requester {
            tracing::debug!(
                allocation_id = %allocation.id,
                requester = %requester,
                "Cancel refused: not the owner"
            );
            return Err(LeaseError::NotOwner {
                allocation_id: allocation.id,
                requester: requester.clone(),
            });
        }
        if !allocation.is_active() {
            return Err(LeaseError::AlreadyCancelled(allocation.id));
        }
        Ok(())
    }

    fn inconsistent(id: AllocationId, detail: String) -> LeaseError {
        AllocationMetrics::record_consistency_violation();
        tracing::error!(allocation_id = %id, detail = %detail, "Internal consistency violation");
        LeaseError::InternalConsistency(detail)
    }
}
