//! Domain types for resource leasing.
//!
//! A [`Resource`] is a uniquely keyed, indivisible unit of inventory. Its
//! [`ResourceState`] carries the hold or allocation metadata directly, so the
//! status alone decides which metadata exists. Holds are not a separate aggregate:
//! a [`Hold`] is a snapshot of the `Held` state handed back to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Creates a new `", stringify!($name), "`")]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner string
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a resource collection (an "event"), the namespace resource IDs live in
    CollectionId
);

string_id!(
    /// Identifier of a resource, unique within its collection (e.g. seat `"A7"`)
    ResourceId
);

string_id!(
    /// Opaque caller identity supplied by the identity provider.
    ///
    /// Only compared for equality; its structure is never interpreted.
    HolderId
);

/// Fully qualified address of a resource.
///
/// Ordering is `(collection, resource)`, which is also the global lock order
/// used when several resources are locked together.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Collection the resource belongs to
    pub collection: CollectionId,
    /// Resource identifier within the collection
    pub resource: ResourceId,
}

impl ResourceKey {
    /// Creates a new `ResourceKey`
    #[must_use]
    pub fn new(collection: impl Into<CollectionId>, resource: impl Into<ResourceId>) -> Self {
        Self {
            collection: collection.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.resource)
    }
}

/// Unique identifier for an allocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AllocationId(Uuid);

impl AllocationId {
    /// Creates a new random `AllocationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `AllocationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AllocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Record version used as the compare-and-swap token.
///
/// Every successful swap moves a resource to the next version, so an
/// expected version identifies one exact prior state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of a freshly provisioned resource
    pub const INITIAL: Self = Self(0);

    /// Creates a version from a raw counter
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The version following this one
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Raw counter value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ============================================================================
// Resource State
// ============================================================================

/// Coarse status of a resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Free to be held
    Available,
    /// Temporarily and exclusively held by one identity
    Held,
    /// Permanently allocated
    Allocated,
}

impl ResourceStatus {
    /// Stable lowercase name, used for storage and logging
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Held => "held",
            Self::Allocated => "allocated",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of an active hold
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldInfo {
    /// Identity holding the resource
    pub holder: HolderId,
    /// When the hold was granted or last renewed
    pub granted_at: DateTime<Utc>,
    /// When the hold lapses (`granted_at` + lease duration)
    pub expires_at: DateTime<Utc>,
}

impl HoldInfo {
    /// A hold is expired from `expires_at` onwards.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Allocation metadata stamped on an allocated resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationMark {
    /// Allocation this resource belongs to
    pub allocation_id: AllocationId,
    /// Identity that committed the allocation
    pub allocated_by: HolderId,
    /// When the allocation was committed
    pub allocated_at: DateTime<Utc>,
}

/// State of a resource. The variant decides which metadata is present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceState {
    /// Free to be held
    Available,
    /// Held by one identity until `expires_at`
    Held(HoldInfo),
    /// Part of a committed allocation
    Allocated(AllocationMark),
}

impl ResourceState {
    /// Coarse status of this state
    #[must_use]
    pub const fn status(&self) -> ResourceStatus {
        match self {
            Self::Available => ResourceStatus::Available,
            Self::Held(_) => ResourceStatus::Held,
            Self::Allocated(_) => ResourceStatus::Allocated,
        }
    }

    /// Hold metadata, present only when held
    #[must_use]
    pub const fn hold(&self) -> Option<&HoldInfo> {
        match self {
            Self::Held(info) => Some(info),
            _ => None,
        }
    }

    /// Allocation metadata, present only when allocated
    #[must_use]
    pub const fn allocation(&self) -> Option<&AllocationMark> {
        match self {
            Self::Allocated(mark) => Some(mark),
            _ => None,
        }
    }
}

/// Canonical record of one leasable resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Address of the resource
    pub key: ResourceKey,
    /// Current state
    pub state: ResourceState,
    /// Most recent identity to hold this resource, kept after release or expiry
    pub last_holder: Option<HolderId>,
    /// Compare-and-swap token
    pub version: Version,
}

impl Resource {
    /// Creates a freshly provisioned, available resource
    #[must_use]
    pub const fn available(key: ResourceKey) -> Self {
        Self {
            key,
            state: ResourceState::Available,
            last_holder: None,
            version: Version::INITIAL,
        }
    }

    /// Coarse status as stored (may still report an expired hold)
    #[must_use]
    pub const fn status(&self) -> ResourceStatus {
        self.state.status()
    }

    /// Whether the resource is held by a hold that has not yet expired.
    ///
    /// For held resources this is the exact complement of [`Resource::is_reclaimable`].
    #[must_use]
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        self.state.hold().is_some_and(|hold| !hold.is_expired(now))
    }

    /// Whether the resource is held by an expired hold and may be returned to the pool.
    #[must_use]
    pub fn is_reclaimable(&self, now: DateTime<Utc>) -> bool {
        self.state.hold().is_some_and(|hold| hold.is_expired(now))
    }

    /// Whether `holder` holds this resource with an unexpired hold
    #[must_use]
    pub fn is_held_by(&self, holder: &HolderId, now: DateTime<Utc>) -> bool {
        self.state
            .hold()
            .is_some_and(|hold| &hold.holder == holder && !hold.is_expired(now))
    }

    /// Status as callers must observe it: an expired hold reads as available.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> ResourceStatus {
        if self.is_reclaimable(now) {
            ResourceStatus::Available
        } else {
            self.status()
        }
    }
}

// ============================================================================
// Holds
// ============================================================================

/// A granted hold, as returned to the caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// Held resource
    pub key: ResourceKey,
    /// Identity holding it
    pub holder: HolderId,
    /// When the hold was granted or renewed
    pub granted_at: DateTime<Utc>,
    /// When the hold lapses
    pub expires_at: DateTime<Utc>,
    /// `true` when an existing hold of the same identity was extended
    pub renewed: bool,
}

impl Hold {
    /// Build a hold snapshot from stored hold metadata
    #[must_use]
    pub fn from_info(key: ResourceKey, info: &HoldInfo, renewed: bool) -> Self {
        Self {
            key,
            holder: info.holder.clone(),
            granted_at: info.granted_at,
            expires_at: info.expires_at,
            renewed,
        }
    }
}

/// Result of a successful release
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// The caller's hold was removed
    Released,
    /// The resource was already available and the caller was its last holder
    AlreadyReleased,
}

// ============================================================================
// Allocations
// ============================================================================

/// Allocation status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Resources are allocated to the owner
    Active,
    /// Allocation was reversed; its resources returned to the pool
    Cancelled,
}

impl AllocationStatus {
    /// Stable lowercase name, used for storage and logging
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permanent grouping of resources committed together for one identity.
///
/// Allocations are never deleted; cancellation only flips the status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Unique allocation identifier
    pub id: AllocationId,
    /// Identity owning the allocation
    pub owner: HolderId,
    /// Collection all member resources belong to
    pub collection: CollectionId,
    /// Member resources (never empty)
    pub resources: BTreeSet<ResourceId>,
    /// Current status
    pub status: AllocationStatus,
    /// When the allocation was committed
    pub created_at: DateTime<Utc>,
    /// When the allocation was cancelled, if it was
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Allocation {
    /// Creates a new active allocation.
    ///
    /// `resources` must be non-empty; the committer rejects empty sets before
    /// an allocation is ever built.
    #[must_use]
    pub fn new(
        id: AllocationId,
        owner: HolderId,
        collection: CollectionId,
        resources: BTreeSet<ResourceId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        debug_assert!(!resources.is_empty(), "allocation without resources");
        Self {
            id,
            owner,
            collection,
            resources,
            status: AllocationStatus::Active,
            created_at,
            cancelled_at: None,
        }
    }

    /// Whether the allocation is still active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AllocationStatus::Active
    }

    /// Member keys in lock order
    pub fn keys(&self) -> impl Iterator<Item = ResourceKey> + '_ {
        self.resources
            .iter()
            .map(|resource| ResourceKey::new(self.collection.clone(), resource.clone()))
    }

    /// The mark stamped on every member resource
    #[must_use]
    pub fn mark(&self) -> AllocationMark {
        AllocationMark {
            allocation_id: self.id,
            allocated_by: self.owner.clone(),
            allocated_at: self.created_at,
        }
    }

    /// This allocation in cancelled form
    #[must_use]
    pub fn cancelled(mut self, at: DateTime<Utc>) -> Self {
        self.status = AllocationStatus::Cancelled;
        self.cancelled_at = Some(at);
        self
    }
}
