//! Runtime configuration.
//!
//! Loaded from environment variables with defaults:
//!
//! | Variable                 | Default | Meaning                                   |
//! |--------------------------|---------|-------------------------------------------|
//! | `LEASE_DURATION_SECS`    | 300     | How long a granted hold lasts             |
//! | `SWEEP_INTERVAL_SECS`    | 60      | Period of the background expiry sweep     |
//! | `LEASE_MAX_CAS_ATTEMPTS` | 3       | Compare-and-swap retries before giving up |

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default hold duration (5 minutes)
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(300);

/// Default sweep period
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default compare-and-swap attempts per operation
pub const DEFAULT_MAX_CAS_ATTEMPTS: u32 = 3;

/// Longest hold duration accepted by [`LeaseConfig::validate`] (7 days)
pub const MAX_LEASE_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Invalid configuration values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Holds would expire the instant they are granted
    #[error("Lease duration must be greater than zero")]
    ZeroLeaseDuration,

    /// Hold duration exceeds [`MAX_LEASE_DURATION`]
    #[error("Lease duration {0:?} exceeds the maximum of {MAX_LEASE_DURATION:?}")]
    LeaseTooLong(Duration),

    /// The sweeper would spin
    #[error("Sweep interval must be greater than zero")]
    ZeroSweepInterval,

    /// Operations could never write
    #[error("Max CAS attempts must be at least 1")]
    ZeroCasAttempts,
}

/// Leasing configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// How long a granted or renewed hold lasts
    pub lease_duration: Duration,
    /// Period of the background expiry sweep
    pub sweep_interval: Duration,
    /// Compare-and-swap attempts per operation before failing with `Contention`
    pub max_cas_attempts: u32,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
        }
    }
}

impl LeaseConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults. Call
    /// [`LeaseConfig::validate`] before use.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            lease_duration: env_secs("LEASE_DURATION_SECS").unwrap_or(DEFAULT_LEASE_DURATION),
            sweep_interval: env_secs("SWEEP_INTERVAL_SECS").unwrap_or(DEFAULT_SWEEP_INTERVAL),
            max_cas_attempts: env::var("LEASE_MAX_CAS_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_CAS_ATTEMPTS),
        }
    }

    /// Set the hold duration
    #[must_use]
    pub const fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    /// Set the sweep period
    #[must_use]
    pub const fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Set the compare-and-swap attempt budget
    #[must_use]
    pub const fn with_max_cas_attempts(mut self, max_cas_attempts: u32) -> Self {
        self.max_cas_attempts = max_cas_attempts;
        self
    }

    /// Check every value is usable.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_duration.is_zero() {
            return Err(ConfigError::ZeroLeaseDuration);
        }
        if self.lease_duration > MAX_LEASE_DURATION {
            return Err(ConfigError::LeaseTooLong(self.lease_duration));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if self.max_cas_attempts == 0 {
            return Err(ConfigError::ZeroCasAttempts);
        }
        Ok(())
    }

    /// Hold duration as a calendar delta.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn lease_ttl(&self) -> Result<TimeDelta, ConfigError> {
        self.validate()?;
        TimeDelta::from_std(self.lease_duration)
            .map_err(|_| ConfigError::LeaseTooLong(self.lease_duration))
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}
