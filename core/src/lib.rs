//! # Seatlease Core
//!
//! Core traits and types for granting short-lived, exclusive holds on scarce,
//! indivisible resources (seats) and turning those holds into permanent allocations.
//!
//! This crate contains no concurrency machinery of its own. It defines:
//!
//! - **Identifiers**: [`CollectionId`], [`ResourceId`], [`ResourceKey`], [`HolderId`], [`AllocationId`]
//! - **Resource state**: [`Resource`] and [`ResourceState`], where a resource is exactly one of
//!   available, held, or allocated
//! - **Store contract**: [`store::LeaseStore`], whose only mutation primitives are the
//!   version-keyed compare-and-swap and its atomic batch form
//! - **Errors**: [`error::LeaseError`], the taxonomy every caller-facing operation returns
//! - **Views**: the serializable shapes handed across the API boundary
//! - **Environment**: the injectable [`environment::Clock`]
//!
//! ## Lifecycle
//!
//! ```text
//!                acquire                 commit
//!  AVAILABLE ─────────────▶ HELD ─────────────────▶ ALLOCATED
//!      ▲                     │                          │
//!      │   release / expiry  │                          │
//!      ├─────────────────────┘                          │
//!      │                       cancel                   │
//!      └────────────────────────────────────────────────┘
//! ```
//!
//! The runtime crate (`seatlease-runtime`) drives these transitions under per-resource
//! mutual exclusion.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Error taxonomy for leasing operations
pub mod error;

/// Persistence contract (compare-and-swap over resource records)
pub mod store;

/// Identifiers, resources, holds and allocations
pub mod types;

/// Serializable views returned across the API boundary
pub mod view;

pub use error::{CommitFailure, CommitFailureReason, ErrorKind, LeaseError};
pub use store::{BatchOutcome, CasOutcome, LeaseStore, StoreError, Transition};
pub use types::{
    Allocation, AllocationId, AllocationMark, AllocationStatus, CollectionId, Hold, HoldInfo,
    HolderId, ReleaseOutcome, Resource, ResourceId, ResourceKey, ResourceState, ResourceStatus,
    Version,
};
pub use view::{AllocationView, CollectionSummary, HoldView, ResourceView};

/// Environment module - Dependency injection traits
///
/// All time-dependent decisions (hold expiry, reclamation, allocation timestamps)
/// read the time through [`Clock`](environment::Clock) so tests can drive expiry
/// deterministically without real delays.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use seatlease_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
