//! Error taxonomy for leasing operations.
//!
//! Every caller-facing operation returns [`LeaseError`] as a structured result.
//! [`LeaseError::kind`] groups variants so an outer layer can map them to its own
//! vocabulary ("no longer available, please choose again" for conflicts, a generic
//! failure for internal errors) without matching every variant.

use crate::store::StoreError;
use crate::types::{AllocationId, HolderId, ResourceId, ResourceKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why one resource failed commit validation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitFailureReason {
    /// No such resource in the collection
    NotFound,
    /// The resource is available; the caller holds nothing
    NotHeld,
    /// Another identity holds the resource
    HeldByOther,
    /// The caller's hold lapsed before commit
    Expired,
    /// The resource is already allocated
    Allocated,
    /// The resource changed underneath the commit (concurrent writer on a shared store)
    Changed,
}

impl fmt::Display for CommitFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotFound => "not found",
            Self::NotHeld => "not held",
            Self::HeldByOther => "held by another identity",
            Self::Expired => "hold expired",
            Self::Allocated => "already allocated",
            Self::Changed => "changed concurrently",
        };
        f.write_str(text)
    }
}

/// One failed member of a commit request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitFailure {
    /// Resource that failed validation
    pub resource: ResourceId,
    /// Why it failed
    pub reason: CommitFailureReason,
}

impl CommitFailure {
    /// Creates a new `CommitFailure`
    #[must_use]
    pub const fn new(resource: ResourceId, reason: CommitFailureReason) -> Self {
        Self { resource, reason }
    }
}

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.resource, self.reason)
    }
}

/// Coarse error classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced resource or allocation does not exist
    NotFound,
    /// Transient contention: someone else has it, retry or re-present state
    Conflict,
    /// The caller does not control the resource or allocation
    PermissionDenied,
    /// The request itself is malformed
    InvalidRequest,
    /// Multi-resource commit failed for an enumerated subset
    PartialFailure,
    /// An invariant was violated or the store failed
    Internal,
}

/// Errors returned by leasing operations.
#[derive(Error, Debug)]
pub enum LeaseError {
    /// Referenced resource does not exist
    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceKey),

    /// Referenced allocation does not exist
    #[error("Allocation not found: {0}")]
    AllocationNotFound(AllocationId),

    /// Another identity holds an unexpired hold on the resource.
    ///
    /// The holder's identity is never carried back to the caller.
    #[error("Resource {key} is held by another identity until {expires_at}")]
    AlreadyHeld {
        /// Contested resource
        key: ResourceKey,
        /// When the current hold lapses
        expires_at: DateTime<Utc>,
    },

    /// The resource is permanently allocated
    #[error("Resource {0} is already allocated")]
    AlreadyAllocated(ResourceKey),

    /// The caller tried to release a resource it does not hold
    #[error("Resource {key} is not held by {holder}")]
    NotHeldByCaller {
        /// Resource named in the request
        key: ResourceKey,
        /// Caller identity
        holder: HolderId,
    },

    /// The caller tried to cancel an allocation it does not own
    #[error("Allocation {allocation_id} is not owned by {requester}")]
    NotOwner {
        /// Allocation named in the request
        allocation_id: AllocationId,
        /// Caller identity
        requester: HolderId,
    },

    /// The allocation was already cancelled
    #[error("Allocation {0} is already cancelled")]
    AlreadyCancelled(AllocationId),

    /// Commit was requested for no resources
    #[error("Commit requires at least one resource")]
    EmptySet,

    /// Commit validation failed; nothing was allocated
    #[error("Commit failed for {} resource(s): {}", .0.len(), format_failures(.0))]
    PartialFailure(Vec<CommitFailure>),

    /// An invariant assumed always-true was violated
    #[error("Internal consistency violation: {0}")]
    InternalConsistency(String),

    /// Compare-and-swap kept losing to a concurrent writer on a shared store
    #[error("Resource {0} changed concurrently too many times")]
    Contention(ResourceKey),

    /// The underlying store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn format_failures(failures: &[CommitFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl LeaseError {
    /// Coarse classification of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ResourceNotFound(_) | Self::AllocationNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyHeld { .. }
            | Self::AlreadyAllocated(_)
            | Self::AlreadyCancelled(_)
            | Self::Contention(_) => ErrorKind::Conflict,
            Self::NotHeldByCaller { .. } | Self::NotOwner { .. } => ErrorKind::PermissionDenied,
            Self::EmptySet => ErrorKind::InvalidRequest,
            Self::PartialFailure(_) => ErrorKind::PartialFailure,
            Self::InternalConsistency(_) | Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same request may succeed without the caller changing anything
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention(_))
    }

    /// Resources that failed a commit, if this is a partial failure
    #[must_use]
    pub fn failed_resources(&self) -> Vec<&ResourceId> {
        match self {
            Self::PartialFailure(failures) => failures.iter().map(|f| &f.resource).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_and_permission_errors_are_distinct_kinds() {
        let key = ResourceKey::new("C1", "S1");
        let held = LeaseError::AlreadyHeld {
            key: key.clone(),
            expires_at: Utc::now(),
        };
        let not_mine = LeaseError::NotHeldByCaller {
            key,
            holder: HolderId::new("bob"),
        };

        assert_eq!(held.kind(), ErrorKind::Conflict);
        assert_eq!(not_mine.kind(), ErrorKind::PermissionDenied);
        assert!(!held.is_retryable());
    }

    #[test]
    fn already_held_message_names_no_identity() {
        let expires_at = DateTime::parse_from_rfc3339("2025-01-01T00:05:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default();
        let held = LeaseError::AlreadyHeld {
            key: ResourceKey::new("C1", "S1"),
            expires_at,
        };

        assert_eq!(
            held.to_string(),
            "Resource C1/S1 is held by another identity until 2025-01-01 00:05:00 UTC"
        );
    }

    #[test]
    fn partial_failure_lists_resources_in_message() {
        let error = LeaseError::PartialFailure(vec![
            CommitFailure::new(ResourceId::new("S2"), CommitFailureReason::HeldByOther),
            CommitFailure::new(ResourceId::new("S9"), CommitFailureReason::NotFound),
        ]);

        assert_eq!(error.kind(), ErrorKind::PartialFailure);
        assert_eq!(
            error.to_string(),
            "Commit failed for 2 resource(s): S2 (held by another identity), S9 (not found)"
        );
        assert_eq!(error.failed_resources().len(), 2);
    }

    #[test]
    fn store_errors_are_internal() {
        let error = LeaseError::from(StoreError::Backend("connection reset".to_string()));
        assert_eq!(error.kind(), ErrorKind::Internal);
        assert!(LeaseError::Contention(ResourceKey::new("C1", "S1")).is_retryable());
    }
}
