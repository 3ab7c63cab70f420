//! # Seatlease Runtime
//!
//! Concurrency machinery for leasing scarce, indivisible resources.
//!
//! This crate drives the state transitions defined in `seatlease-core` under
//! per-resource mutual exclusion.
//!
//! ## Core Components
//!
//! - **Registry**: the store, the injected clock and the per-resource lock table
//! - **Lease Manager**: grants, renews and releases holds
//! - **Allocation Committer**: turns a set of holds into one allocation, all or nothing
//! - **Expiry Reclaimer**: returns expired holds to the pool, lazily and by periodic sweep
//! - **Allocation Ledger**: looks up, lists and cancels allocations
//! - **Leasing Service**: the caller-facing API over all of the above
//!
//! ## Concurrency Model
//!
//! Every read-modify-write runs under the lock of the resource it touches, and
//! every write is a compare-and-swap keyed on the version that was read. Locks are
//! per resource, never global; multi-resource operations lock in ascending key
//! order. Locks are never held across anything but store access.
//!
//! ## Example
//!
//! ```ignore
//! use seatlease_runtime::{LeaseConfig, LeasingService};
//! use seatlease_core::environment::SystemClock;
//!
//! let service = LeasingService::new(store, Arc::new(SystemClock), LeaseConfig::from_env())?;
//! let sweeper = service.spawn_sweeper();
//!
//! let hold = service.acquire_hold(&key, &holder).await?;
//!
//! sweeper.shutdown().await?;
//! ```

/// Runtime configuration
pub mod config;

/// Health reporting
pub mod health;

/// Per-key async mutual exclusion
pub mod locks;

/// Prometheus metrics for observability
pub mod metrics;

/// Store, clock and lock table shared by every component
pub mod registry;

/// Expiry reclamation (lazy and swept)
pub mod reclaim;

/// Hold acquisition and release
pub mod lease;

/// Multi-resource commit
pub mod commit;

/// Allocation lookup and cancellation
pub mod ledger;

/// Caller-facing API
pub mod service;

pub use commit::AllocationCommitter;
pub use config::{ConfigError, LeaseConfig};
pub use health::{HealthCheck, HealthReport, HealthStatus, STALE_SWEEP_INTERVALS};
pub use lease::LeaseManager;
pub use ledger::AllocationLedger;
pub use locks::{KeyGuard, KeyedLocks};
pub use reclaim::{ExpiryReclaimer, ReclaimedHold, SweepReport, SweeperHandle};
pub use registry::{ResourceRegistry, seat_grid};
pub use service::LeasingService;
