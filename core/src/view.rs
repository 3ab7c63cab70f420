//! Serializable views handed across the API boundary.
//!
//! Views never expose another identity's holder token: a caller learns whether a
//! resource is held and whether it holds it, nothing more.

use crate::types::{
    Allocation, AllocationId, AllocationStatus, CollectionId, Hold, HolderId, Resource,
    ResourceId, ResourceStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One resource as seen by a caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceView {
    /// Resource identifier
    pub id: ResourceId,
    /// Effective status (an expired hold reads as available)
    pub status: ResourceStatus,
    /// Whether an unexpired hold exists
    pub is_held: bool,
    /// Whether the caller owns that hold; only meaningful when `is_held`
    pub holder_is_caller: bool,
}

impl ResourceView {
    /// Project a resource for `caller` at instant `now`
    #[must_use]
    pub fn project(resource: &Resource, caller: Option<&HolderId>, now: DateTime<Utc>) -> Self {
        let is_held = resource.is_held(now);
        let holder_is_caller = is_held
            && caller.is_some_and(|caller| resource.is_held_by(caller, now));
        Self {
            id: resource.key.resource.clone(),
            status: resource.effective_status(now),
            is_held,
            holder_is_caller,
        }
    }
}

/// A granted hold
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldView {
    /// Collection of the held resource
    pub collection: CollectionId,
    /// Held resource
    pub resource: ResourceId,
    /// When the hold was granted or renewed
    pub granted_at: DateTime<Utc>,
    /// When the hold lapses
    pub expires_at: DateTime<Utc>,
    /// Whether this call extended an existing hold
    pub renewed: bool,
}

impl From<Hold> for HoldView {
    fn from(hold: Hold) -> Self {
        Self {
            collection: hold.key.collection,
            resource: hold.key.resource,
            granted_at: hold.granted_at,
            expires_at: hold.expires_at,
            renewed: hold.renewed,
        }
    }
}

/// A committed allocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationView {
    /// Allocation identifier
    pub id: AllocationId,
    /// Collection of the member resources
    pub collection: CollectionId,
    /// Member resources in ascending order
    pub resources: Vec<ResourceId>,
    /// Current status
    pub status: AllocationStatus,
    /// When the allocation was committed
    pub created_at: DateTime<Utc>,
    /// When the allocation was cancelled, if it was
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<Allocation> for AllocationView {
    fn from(allocation: Allocation) -> Self {
        Self {
            id: allocation.id,
            collection: allocation.collection,
            resources: allocation.resources.into_iter().collect(),
            status: allocation.status,
            created_at: allocation.created_at,
            cancelled_at: allocation.cancelled_at,
        }
    }
}

/// Availability counts for one collection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSummary {
    /// Number of resources in the collection
    pub total: usize,
    /// Resources free to be held
    pub available: usize,
    /// Resources under an unexpired hold
    pub held: usize,
    /// Resources permanently allocated
    pub allocated: usize,
}

impl CollectionSummary {
    /// Tally resources by effective status at instant `now`
    #[must_use]
    pub fn tally<'a>(resources: impl IntoIterator<Item = &'a Resource>, now: DateTime<Utc>) -> Self {
        resources
            .into_iter()
            .fold(Self::default(), |mut summary, resource| {
                summary.total += 1;
                match resource.effective_status(now) {
                    ResourceStatus::Available => summary.available += 1,
                    ResourceStatus::Held => summary.held += 1,
                    ResourceStatus::Allocated => summary.allocated += 1,
                }
                summary
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HoldInfo, ResourceKey, ResourceState};
    use chrono::Duration;

    fn held_by(holder: &str, expires_at: DateTime<Utc>) -> Resource {
        Resource {
            state: ResourceState::Held(HoldInfo {
                holder: HolderId::new(holder),
                granted_at: expires_at - Duration::seconds(300),
                expires_at,
            }),
            ..Resource::available(ResourceKey::new("C1", "S1"))
        }
    }

    #[test]
    fn caller_sees_own_hold_but_not_others() {
        let now = Utc::now();
        let resource = held_by("alice", now + Duration::seconds(10));

        let alice = HolderId::new("alice");
        let bob = HolderId::new("bob");
        assert!(ResourceView::project(&resource, Some(&alice), now).holder_is_caller);

        let for_bob = ResourceView::project(&resource, Some(&bob), now);
        assert!(for_bob.is_held);
        assert!(!for_bob.holder_is_caller);

        let anonymous = ResourceView::project(&resource, None, now);
        assert_eq!(anonymous.status, ResourceStatus::Held);
        assert!(!anonymous.holder_is_caller);
    }

    #[test]
    fn expired_hold_projects_as_available() {
        let now = Utc::now();
        let resource = held_by("alice", now);
        let view = ResourceView::project(&resource, Some(&HolderId::new("alice")), now);

        assert_eq!(view.status, ResourceStatus::Available);
        assert!(!view.is_held);
        assert!(!view.holder_is_caller);
    }

    #[test]
    fn summary_counts_expired_holds_as_available() {
        let now = Utc::now();
        let resources = vec![
            Resource::available(ResourceKey::new("C1", "S1")),
            held_by("alice", now + Duration::seconds(5)),
            held_by("bob", now - Duration::seconds(5)),
        ];

        let summary = CollectionSummary::tally(&resources, now);
        assert_eq!(
            summary,
            CollectionSummary {
                total: 3,
                available: 2,
                held: 1,
                allocated: 0
            }
        );
    }
}
