//! Health reporting for the leasing service.
//!
//! Two components are checked: the lease store (reachable, and how many resources
//! it currently reports as held) and the expiry sweeper (how long ago it last ran).

use chrono::{DateTime, TimeDelta, Utc};
use seatlease_core::StoreError;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Component name of the store check
pub const LEASE_STORE: &str = "lease_store";

/// Component name of the sweeper check
pub const EXPIRY_SWEEPER: &str = "expiry_sweeper";

/// The sweeper is degraded once its last sweep is more than this many intervals old
pub const STALE_SWEEP_INTERVALS: i32 = 3;

/// Health of one component, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Fully operational
    Healthy,
    /// Serving, but expired holds may linger longer than configured
    Degraded,
    /// Not serving
    Unhealthy,
}

impl HealthStatus {
    /// Lowercase name used in logs and reports
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Whether this is [`HealthStatus::Healthy`]
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of checking one component
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// [`LEASE_STORE`] or [`EXPIRY_SWEEPER`]
    pub component: &'static str,
    /// Outcome
    pub status: HealthStatus,
    /// Why the component is not healthy
    pub message: Option<String>,
    /// Extra detail (`held`, `last_sweep`)
    pub metadata: BTreeMap<&'static str, String>,
}

impl HealthCheck {
    const fn new(component: &'static str, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            component,
            status,
            message,
            metadata: BTreeMap::new(),
        }
    }

    /// Store check from a scan of held resources.
    ///
    /// Any store error makes the store unhealthy; otherwise the held count is
    /// reported as `held`.
    #[must_use]
    pub fn lease_store(held: Result<usize, StoreError>) -> Self {
        match held {
            Ok(count) => Self::new(LEASE_STORE, HealthStatus::Healthy, None)
                .with_metadata("held", count.to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "Lease store health check failed");
                Self::new(LEASE_STORE, HealthStatus::Unhealthy, Some(e.to_string()))
            }
        }
    }

    /// Sweeper check from the time of its last completed sweep.
    ///
    /// Degraded before the first sweep and once the last one is more than
    /// [`STALE_SWEEP_INTERVALS`] intervals behind `now`.
    #[must_use]
    pub fn expiry_sweeper(
        last_sweep: Option<DateTime<Utc>>,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let Some(last_sweep) = last_sweep else {
            return Self::new(
                EXPIRY_SWEEPER,
                HealthStatus::Degraded,
                Some("No sweep has completed yet".to_string()),
            );
        };

        let stale_after = TimeDelta::from_std(interval)
            .ok()
            .and_then(|interval| interval.checked_mul(STALE_SWEEP_INTERVALS))
            .unwrap_or(TimeDelta::MAX);

        let check = if now - last_sweep > stale_after {
            Self::new(
                EXPIRY_SWEEPER,
                HealthStatus::Degraded,
                Some(format!(
                    "Last sweep at {last_sweep} is older than {STALE_SWEEP_INTERVALS} intervals"
                )),
            )
        } else {
            Self::new(EXPIRY_SWEEPER, HealthStatus::Healthy, None)
        };
        check.with_metadata("last_sweep", last_sweep.to_rfc3339())
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.metadata.insert(key, value.into());
        self
    }

    /// Look up a metadata value
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Every component check, rolled up to the worst status.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Worst status of all checks; healthy when there are none
    pub status: HealthStatus,
    /// Individual component checks
    pub checks: Vec<HealthCheck>,
    /// When the report was taken, read from the service clock
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Roll up `checks` taken at `timestamp`
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>, timestamp: DateTime<Utc>) -> Self {
        let status = checks
            .iter()
            .map(|check| check.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            checks,
            timestamp,
        }
    }

    /// The check for one component
    #[must_use]
    pub fn check(&self, component: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|check| check.component == component)
    }

    /// Whether every component is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy)
    }

    /// Whether the worst component is degraded
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self.status, HealthStatus::Degraded)
    }

    /// Whether any component is unhealthy
    #[must_use]
    pub const fn is_unhealthy(&self) -> bool {
        matches!(self.status, HealthStatus::Unhealthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(30);

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + TimeDelta::seconds(seconds)
    }

    #[test]
    fn sweeper_goes_stale_after_three_intervals() {
        let never = HealthCheck::expiry_sweeper(None, INTERVAL, at(0));
        assert_eq!(never.status, HealthStatus::Degraded);
        assert!(never.metadata("last_sweep").is_none());

        let fresh = HealthCheck::expiry_sweeper(Some(at(0)), INTERVAL, at(90));
        assert_eq!(fresh.status, HealthStatus::Healthy);
        assert_eq!(fresh.metadata("last_sweep"), Some(at(0).to_rfc3339().as_str()));

        let stale = HealthCheck::expiry_sweeper(Some(at(0)), INTERVAL, at(91));
        assert_eq!(stale.status, HealthStatus::Degraded);
        assert!(stale.message.is_some());
    }

    #[test]
    fn store_errors_make_the_report_unhealthy() {
        let store = HealthCheck::lease_store(Err(StoreError::Backend("down".to_string())));
        let sweeper = HealthCheck::expiry_sweeper(None, INTERVAL, at(0));
        let report = HealthReport::new(vec![store, sweeper], at(0));

        assert!(report.is_unhealthy());
        assert_eq!(
            report.check(EXPIRY_SWEEPER).map(|check| check.status),
            Some(HealthStatus::Degraded)
        );
        assert!(HealthReport::new(Vec::new(), at(0)).is_healthy());
    }

    #[test]
    fn store_check_reports_held_count() {
        let check = HealthCheck::lease_store(Ok(4));
        assert!(check.status.is_healthy());
        assert_eq!(check.metadata("held"), Some("4"));
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
    }
}
