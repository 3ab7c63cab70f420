//! Expiry reclamation.
//!
//! A hold whose expiry has passed is treated as available by every read the
//! moment it expires, whether or not it has been written back yet. Two paths
//! make that physical:
//!
//! - **Lazy**: any operation that touches an expired hold returns it to the pool
//!   under the resource lock before deciding
//! - **Sweep**: [`ExpiryReclaimer::sweep`] scans every held resource and returns the
//!   expired ones, optionally on a timer via [`ExpiryReclaimer::spawn`]
//!
//! Both paths write with a version-keyed compare-and-swap after re-reading under the
//! lock, so a hold renewed or allocated between the scan and the write is never
//! reclaimed.

use crate::metrics::ReclaimMetrics;
use crate::registry::ResourceRegistry;
use chrono::{DateTime, Utc};
use seatlease_core::{
    CasOutcome, HoldInfo, HolderId, LeaseError, Resource, ResourceKey, ResourceState, Transition,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

/// Which path reclaimed a hold
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReclaimMode {
    Lazy,
    Sweep,
}

impl ReclaimMode {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Lazy => "lazy",
            Self::Sweep => "sweep",
        }
    }
}

/// A resource after reclamation was attempted
pub(crate) struct Settled {
    /// Current record
    pub resource: Resource,
    /// The expired hold that was removed, if this call removed one
    pub reclaimed: Option<HoldInfo>,
}

/// Return `observed` to the pool if its hold has expired at `now`.
///
/// The caller must hold the resource lock. A resource that is not reclaimable is
/// returned untouched; a lost compare-and-swap returns the current record.
pub(crate) async fn settle(
    registry: &ResourceRegistry,
    observed: Resource,
    now: DateTime<Utc>,
    mode: ReclaimMode,
) -> Result<Settled, LeaseError> {
    let Some(expired) = observed
        .state
        .hold()
        .filter(|hold| hold.is_expired(now))
        .cloned()
    else {
        return Ok(Settled {
            resource: observed,
            reclaimed: None,
        });
    };

    match registry
        .compare_and_swap(Transition::new(&observed, ResourceState::Available))
        .await?
    {
        CasOutcome::Swapped(resource) => {
            ReclaimMetrics::record_reclaimed(mode.as_str());
            match mode {
                ReclaimMode::Lazy => tracing::debug!(
                    key = %resource.key,
                    previous_holder = %expired.holder,
                    expired_at = %expired.expires_at,
                    "Reclaimed expired hold"
                ),
                ReclaimMode::Sweep => tracing::info!(
                    key = %resource.key,
                    previous_holder = %expired.holder,
                    expired_at = %expired.expires_at,
                    "Reclaimed expired hold"
                ),
            }
            Ok(Settled {
                resource,
                reclaimed: Some(expired),
            })
        }
        CasOutcome::Conflict(current) => Ok(Settled {
            resource: current,
            reclaimed: None,
        }),
    }
}

// ============================================================================
// Sweep
// ============================================================================

/// One hold returned to the pool by a sweep
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimedHold {
    /// Resource that was held
    pub key: ResourceKey,
    /// Identity whose hold expired
    pub previous_holder: HolderId,
    /// When the hold expired
    pub expired_at: DateTime<Utc>,
}

/// Result of one sweep
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// When the sweep started, per the service clock
    pub started_at: DateTime<Utc>,
    /// Held resources examined
    pub scanned: usize,
    /// Holds returned to the pool
    pub reclaimed: Vec<ReclaimedHold>,
}

impl SweepReport {
    const fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            scanned: 0,
            reclaimed: Vec::new(),
        }
    }

    /// Number of holds returned to the pool
    #[must_use]
    pub fn reclaimed_count(&self) -> usize {
        self.reclaimed.len()
    }
}

/// Scans for expired holds and returns them to the pool.
pub struct ExpiryReclaimer {
    registry: Arc<ResourceRegistry>,
    last_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl ExpiryReclaimer {
    /// Creates a reclaimer over `registry`
    #[must_use]
    pub const fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self {
            registry,
            last_sweep: Mutex::new(None),
        }
    }

    /// When the most recent sweep completed, per the service clock
    #[must_use]
    pub fn last_sweep(&self) -> Option<DateTime<Utc>> {
        *self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return every expired hold to the pool.
    ///
    /// Each candidate is re-read under its lock and only reclaimed if it is still
    /// expired at that point. Non-expired holds, available and allocated resources
    /// are never touched. Safe to run concurrently with any other operation.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] if the store fails; holds reclaimed before the
    /// failure stay reclaimed.
    pub async fn sweep(&self) -> Result<SweepReport, LeaseError> {
        let started = Instant::now();
        let mut report = SweepReport::new(self.registry.now());

        let held = self.registry.store().list_held().await?;
        report.scanned = held.len();

        for candidate in held {
            let now = self.registry.now();
            if !candidate.is_reclaimable(now) {
                continue;
            }

            let _guard = self.registry.lock(&candidate.key).await;
            let Some(current) = self.registry.find(&candidate.key).await? else {
                continue;
            };
            let settled = settle(&self.registry, current, now, ReclaimMode::Sweep).await?;
            if let Some(hold) = settled.reclaimed {
                report.reclaimed.push(ReclaimedHold {
                    key: candidate.key,
                    previous_holder: hold.holder,
                    expired_at: hold.expires_at,
                });
            }
        }

        self.registry.prune_locks();
        *self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner) = Some(self.registry.now());
        ReclaimMetrics::record_sweep(report.scanned, started.elapsed());

        if report.reclaimed.is_empty() {
            tracing::debug!(scanned = report.scanned, "Expiry sweep found nothing to reclaim");
        } else {
            tracing::info!(
                scanned = report.scanned,
                reclaimed = report.reclaimed.len(),
                "Expiry sweep completed"
            );
        }
        Ok(report)
    }

    /// Run [`ExpiryReclaimer::sweep`] every `interval` on a background task.
    ///
    /// The first sweep runs immediately. A slow sweep delays the next tick rather
    /// than bunching missed ticks. Sweep errors are logged and the loop continues.
    /// The task stops when the returned handle is shut down or dropped.
    #[must_use]
    pub fn spawn(self: Arc<Self>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval = ?interval, "Expiry sweeper started");

            while !*shutdown_rx.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::error!(error = %e, "Expiry sweep failed");
                        }
                    }

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::info!("Shutdown signal received");
                            break;
                        }
                    }
                }
            }

            tracing::info!("Expiry sweeper stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

impl std::fmt::Debug for ExpiryReclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryReclaimer")
            .field("last_sweep", &self.last_sweep())
            .finish_non_exhaustive()
    }
}

/// Handle to a background sweeper task
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it.
    ///
    /// A sweep in progress finishes first.
    ///
    /// # Errors
    ///
    /// Returns the [`JoinError`] if the sweeper task panicked.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.shutdown.send(true).ok();
        self.task.await
    }

    /// Whether the sweeper task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
