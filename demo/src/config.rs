//! Configuration for the demo, loaded from environment variables with defaults.

use seatlease_runtime::LeaseConfig;
use std::env;
use std::net::SocketAddr;

/// Demo configuration
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Leasing parameters (`LEASE_DURATION_SECS`, `SWEEP_INTERVAL_SECS`, `LEASE_MAX_CAS_ATTEMPTS`)
    pub lease: LeaseConfig,
    /// Collection the seats are provisioned in (`DEMO_COLLECTION`)
    pub collection: String,
    /// Seat rows (`DEMO_ROWS`)
    pub rows: usize,
    /// Seats per row (`DEMO_SEATS_PER_ROW`)
    pub seats_per_row: u32,
    /// Identities racing for one seat in the contention burst (`DEMO_CONTENDERS`)
    pub contenders: usize,
    /// Use `PostgreSQL` instead of the in-memory store (`DATABASE_URL`)
    pub database_url: Option<String>,
    /// Serve Prometheus metrics and keep running until Ctrl+C (`METRICS_ADDR`)
    pub metrics_addr: Option<SocketAddr>,
}

impl DemoConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            lease: LeaseConfig::from_env(),
            collection: env::var("DEMO_COLLECTION").unwrap_or_else(|_| "concert".to_string()),
            rows: env::var("DEMO_ROWS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            seats_per_row: env::var("DEMO_SEATS_PER_ROW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            contenders: env::var("DEMO_CONTENDERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(25),
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            metrics_addr: env::var("METRICS_ADDR").ok().and_then(|v| v.parse().ok()),
        }
    }
}
