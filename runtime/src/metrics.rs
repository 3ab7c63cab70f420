//! Prometheus metrics for leasing operations.
//!
//! This module provides metric collection for:
//! - Hold grants, renewals, rejections and releases
//! - Per-resource lock wait time
//! - Commits, commit failures and cancellations
//! - Expiry reclamation (lazy and swept)
//!
//! # Example
//!
//! ```rust,no_run
//! use seatlease_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and start the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                let addr = self.addr;
                tokio::spawn(async move {
                    // The exporter's error type carries no formatting.
                    if exporter.await.is_err() {
                        tracing::error!(addr = %addr, "Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(_) => {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(())
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Holds
    describe_counter!(
        "lease_holds_granted_total",
        "Total number of holds granted (renewed=true for extensions)"
    );
    describe_counter!(
        "lease_holds_rejected_total",
        "Total number of hold requests rejected, by reason"
    );
    describe_counter!(
        "lease_holds_released_total",
        "Total number of holds released by their holder"
    );
    describe_counter!(
        "lease_cas_conflicts_total",
        "Total number of compare-and-swap writes that lost to a concurrent writer"
    );
    describe_histogram!(
        "lease_lock_wait_duration_seconds",
        "Time spent waiting for per-resource locks"
    );

    // Allocations
    describe_counter!(
        "lease_allocations_committed_total",
        "Total number of allocations committed"
    );
    describe_histogram!(
        "lease_allocation_size",
        "Number of resources per committed allocation"
    );
    describe_counter!(
        "lease_commits_failed_total",
        "Total number of commits rejected with a partial failure"
    );
    describe_counter!(
        "lease_allocations_cancelled_total",
        "Total number of allocations cancelled"
    );
    describe_counter!(
        "lease_consistency_violations_total",
        "Total number of internal consistency violations detected"
    );

    // Reclamation
    describe_counter!(
        "lease_holds_reclaimed_total",
        "Total number of expired holds returned to the pool, by mode"
    );
    describe_histogram!(
        "lease_sweep_duration_seconds",
        "Time taken by one expiry sweep"
    );
    describe_gauge!(
        "lease_sweep_last_scanned",
        "Held resources examined by the most recent sweep"
    );
}

/// Hold metrics recorder.
pub struct LeaseMetrics;

impl LeaseMetrics {
    /// Record a granted hold.
    pub fn record_granted(renewed: bool) {
        let renewed = if renewed { "true" } else { "false" };
        counter!("lease_holds_granted_total", "renewed" => renewed).increment(1);
    }

    /// Record a rejected hold request.
    pub fn record_rejected(reason: &'static str) {
        counter!("lease_holds_rejected_total", "reason" => reason).increment(1);
    }

    /// Record a release.
    pub fn record_released() {
        counter!("lease_holds_released_total").increment(1);
    }

    /// Record a lost compare-and-swap.
    pub fn record_cas_conflict() {
        counter!("lease_cas_conflicts_total").increment(1);
    }

    /// Record time spent acquiring per-resource locks.
    pub fn record_lock_wait(duration: Duration) {
        histogram!("lease_lock_wait_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Allocation metrics recorder.
pub struct AllocationMetrics;

impl AllocationMetrics {
    /// Record a committed allocation.
    #[allow(clippy::cast_precision_loss)] // allocation sizes are small
    pub fn record_committed(size: usize) {
        counter!("lease_allocations_committed_total").increment(1);
        histogram!("lease_allocation_size").record(size as f64);
    }

    /// Record a rejected commit.
    pub fn record_commit_failed() {
        counter!("lease_commits_failed_total").increment(1);
    }

    /// Record a cancellation.
    pub fn record_cancelled() {
        counter!("lease_allocations_cancelled_total").increment(1);
    }

    /// Record a detected consistency violation.
    pub fn record_consistency_violation() {
        counter!("lease_consistency_violations_total").increment(1);
    }
}

/// Reclamation metrics recorder.
pub struct ReclaimMetrics;

impl ReclaimMetrics {
    /// Record one reclaimed hold.
    pub fn record_reclaimed(mode: &'static str) {
        counter!("lease_holds_reclaimed_total", "mode" => mode).increment(1);
    }

    /// Record a completed sweep.
    #[allow(clippy::cast_precision_loss)] // scan counts are far below 2^52
    pub fn record_sweep(scanned: usize, duration: Duration) {
        gauge!("lease_sweep_last_scanned").set(scanned as f64);
        histogram!("lease_sweep_duration_seconds").record(duration.as_secs_f64());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        LeaseMetrics::record_granted(false);
        AllocationMetrics::record_committed(3);
        ReclaimMetrics::record_reclaimed("sweep");

        // If another test installed the recorder first, handle is None.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("lease_holds_granted_total"));
            assert!(rendered.contains("lease_allocations_committed_total"));
            assert!(rendered.contains("lease_holds_reclaimed_total"));
        }
    }

    #[tokio::test]
    async fn test_second_server_skips_recorder_install() {
        let mut first = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        let mut second = MetricsServer::new("127.0.0.1:0".parse().unwrap());

        first.start().unwrap();
        second.start().unwrap();

        // Only one global recorder exists per process.
        assert!(second.handle().is_none());
        tokio::task::yield_now().await;
    }
}
