//! # Seatlease Testing
//!
//! Testing utilities and helpers for seatlease.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - An in-memory [`LeaseStore`](seatlease_core::LeaseStore) with failure injection
//! - A [`TestHarness`] wiring a service, clock and store together
//! - Property-based testing strategies for random operation sequences
//!
//! ## Example
//!
//! ```ignore
//! use seatlease_testing::{TestHarness, holder, key};
//!
//! #[tokio::test]
//! async fn hold_expires() {
//!     let harness = TestHarness::scenario().await;
//!     harness.service.acquire_hold(&key("C1", "S1"), &holder("alice")).await.unwrap();
//!
//!     harness.advance_secs(300);
//!
//!     let report = harness.service.sweep_expired().await.unwrap();
//!     assert_eq!(report.reclaimed_count(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use seatlease_core::environment::Clock;

/// In-memory lease store
pub mod store_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    #![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
    #![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

    use super::{Clock, DateTime, Utc};
    use chrono::TimeDelta;
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatlease_testing::mocks::FixedClock;
    /// use seatlease_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and give another
    /// to the service under test.
    ///
    /// # Example
    ///
    /// ```
    /// use seatlease_testing::ManualClock;
    /// use seatlease_core::environment::Clock;
    /// use chrono::TimeDelta;
    ///
    /// let clock = ManualClock::default();
    /// let start = clock.now();
    /// clock.advance(TimeDelta::seconds(300));
    /// assert_eq!(clock.now() - start, TimeDelta::seconds(300));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock stopped at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward by `delta`
        pub fn advance(&self, delta: TimeDelta) {
            let mut time = self.time.write().unwrap();
            *time += delta;
        }

        /// Jump the clock to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap() = time;
        }
    }

    impl Default for ManualClock {
        /// Starts at 2025-01-01 00:00:00 UTC, like [`test_clock`]
        fn default() -> Self {
            Self::new(test_clock().now())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }
}

/// Test helpers and utilities
pub mod helpers {
    #![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
    #![allow(clippy::missing_panics_doc)] // Panics only on fixture setup failure

    use crate::mocks::ManualClock;
    use crate::store_mocks::InMemoryLeaseStore;
    use chrono::TimeDelta;
    use seatlease_core::{CollectionId, HolderId, ResourceId, ResourceKey};
    use seatlease_runtime::{LeaseConfig, LeasingService};
    use std::sync::Arc;
    use tracing_subscriber::EnvFilter;

    /// Collection used by the standard scenario
    pub const SCENARIO_COLLECTION: &str = "C1";

    /// Resources provisioned by [`TestHarness::scenario`]
    pub const SCENARIO_RESOURCES: [&str; 5] = ["S1", "S2", "S3", "S4", "S5"];

    /// Shorthand for a holder identity
    #[must_use]
    pub fn holder(name: &str) -> HolderId {
        HolderId::new(name)
    }

    /// Shorthand for a resource key
    #[must_use]
    pub fn key(collection: &str, resource: &str) -> ResourceKey {
        ResourceKey::new(collection, resource)
    }

    /// Shorthand for a list of resource ids
    #[must_use]
    pub fn ids(ids: &[&str]) -> Vec<ResourceId> {
        ids.iter().copied().map(ResourceId::new).collect()
    }

    /// Install a test-writer tracing subscriber once per process.
    ///
    /// Honours `RUST_LOG`, defaulting to `seatlease=debug`.
    pub fn init_tracing() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| "seatlease=debug".into()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    }

    /// A leasing service over an in-memory store and a manual clock.
    #[derive(Debug)]
    pub struct TestHarness {
        /// Service under test
        pub service: Arc<LeasingService>,
        /// Clock shared with the service
        pub clock: ManualClock,
        /// Store shared with the service
        pub store: InMemoryLeaseStore,
    }

    impl TestHarness {
        /// Empty store, default configuration
        #[must_use]
        pub fn new() -> Self {
            Self::with_config(LeaseConfig::default())
        }

        /// Empty store, custom configuration
        #[must_use]
        pub fn with_config(config: LeaseConfig) -> Self {
            let clock = ManualClock::default();
            let store = InMemoryLeaseStore::new();
            let service = LeasingService::new(
                Arc::new(store.clone()),
                Arc::new(clock.clone()),
                config,
            )
            .unwrap();
            Self {
                service: Arc::new(service),
                clock,
                store,
            }
        }

        /// Collection `C1` with available resources `S1`..`S5`
        pub async fn scenario() -> Self {
            let harness = Self::new();
            harness
                .service
                .provision_collection(
                    &CollectionId::new(SCENARIO_COLLECTION),
                    ids(&SCENARIO_RESOURCES),
                )
                .await
                .unwrap();
            harness
        }

        /// Move the shared clock forward
        pub fn advance_secs(&self, seconds: i64) {
            self.clock.advance(TimeDelta::seconds(seconds));
        }
    }

    impl Default for TestHarness {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// One randomly generated leasing operation.
    ///
    /// Holders, resources and allocations are indices into whatever pools the
    /// test sets up, so sequences shrink to small readable cases.
    #[derive(Clone, Debug)]
    pub enum LeaseOp {
        /// Acquire or renew a hold
        Acquire {
            /// Holder index
            holder: usize,
            /// Resource index
            resource: usize,
        },
        /// Release a hold
        Release {
            /// Holder index
            holder: usize,
            /// Resource index
            resource: usize,
        },
        /// Commit a set of resources
        Commit {
            /// Holder index
            holder: usize,
            /// Resource indices, possibly repeated
            resources: Vec<usize>,
        },
        /// Cancel a previously committed allocation
        Cancel {
            /// Holder index
            holder: usize,
            /// Index into the allocations committed so far
            allocation: usize,
        },
        /// Move the clock forward
        Advance {
            /// Seconds to advance
            seconds: i64,
        },
        /// Run an expiry sweep
        Sweep,
    }

    /// Strategy for one operation over `holders` identities and `resources` resources
    pub fn lease_op(holders: usize, resources: usize) -> impl Strategy<Value = LeaseOp> {
        let holder = 0..holders.max(1);
        let resource = 0..resources.max(1);
        prop_oneof![
            4 => (holder.clone(), resource.clone())
                .prop_map(|(holder, resource)| LeaseOp::Acquire { holder, resource }),
            2 => (holder.clone(), resource.clone())
                .prop_map(|(holder, resource)| LeaseOp::Release { holder, resource }),
            2 => (holder.clone(), prop::collection::vec(resource, 1..4))
                .prop_map(|(holder, resources)| LeaseOp::Commit { holder, resources }),
            1 => (holder, 0..8usize)
                .prop_map(|(holder, allocation)| LeaseOp::Cancel { holder, allocation }),
            2 => (1..400i64).prop_map(|seconds| LeaseOp::Advance { seconds }),
            1 => Just(LeaseOp::Sweep),
        ]
    }

    /// Strategy for a sequence of up to `max_len` operations
    pub fn lease_ops(
        holders: usize,
        resources: usize,
        max_len: usize,
    ) -> impl Strategy<Value = Vec<LeaseOp>> {
        prop::collection::vec(lease_op(holders, resources), 1..max_len.max(2))
    }
}

// Re-export commonly used items
pub use helpers::{TestHarness, holder, ids, init_tracing, key};
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use store_mocks::InMemoryLeaseStore;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::default();
        let handle = clock.clone();
        let start = clock.now();

        handle.advance(TimeDelta::seconds(42));
        assert_eq!(clock.now() - start, TimeDelta::seconds(42));

        clock.set(start);
        assert_eq!(handle.now(), start);
    }
}
