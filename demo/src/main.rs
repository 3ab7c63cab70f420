//! Seatlease demo.
//!
//! Provisions a seat grid, plays two customers against each other, then lets a
//! crowd race for one seat. Runs on the in-memory store unless `DATABASE_URL` is
//! set. With `METRICS_ADDR` set, serves Prometheus metrics until Ctrl+C.

mod config;

use anyhow::Context;
use config::DemoConfig;
use futures::future::join_all;
use seatlease_core::environment::SystemClock;
use seatlease_core::{
    CollectionId, HolderId, LeaseError, LeaseStore, ResourceId, ResourceKey, StoreError,
};
use seatlease_postgres::PostgresLeaseStore;
use seatlease_runtime::metrics::MetricsServer;
use seatlease_runtime::LeasingService;
use seatlease_testing::InMemoryLeaseStore;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seatlease=info,seatlease_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DemoConfig::from_env();
    info!(
        collection = %config.collection,
        rows = config.rows,
        seats_per_row = config.seats_per_row,
        lease_duration = ?config.lease.lease_duration,
        sweep_interval = ?config.lease.sweep_interval,
        "Configuration loaded"
    );

    let mut metrics_server = None;
    if let Some(addr) = config.metrics_addr {
        let mut server = MetricsServer::new(addr);
        server.start().context("Failed to start metrics server")?;
        metrics_server = Some(server);
    }

    let store: Arc<dyn LeaseStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to lease store database...");
            let store = PostgresLeaseStore::connect(url).await?;
            store.migrate().await?;
            info!("Lease store connected");
            Arc::new(store)
        }
        None => {
            info!("Using in-memory lease store");
            Arc::new(InMemoryLeaseStore::new())
        }
    };

    let service = Arc::new(LeasingService::new(
        store,
        Arc::new(SystemClock),
        config.lease.clone(),
    )?);
    let collection = CollectionId::new(config.collection.clone());

    match service
        .provision_grid(&collection, config.rows, config.seats_per_row)
        .await
    {
        Ok(seats) => info!(seats = seats.len(), "Seat grid provisioned"),
        Err(LeaseError::Store(StoreError::Duplicate(key))) => {
            warn!(%key, "Seats already provisioned, reusing them");
        }
        Err(e) => return Err(e.into()),
    }

    let sweeper = service.spawn_sweeper();

    two_customers(&service, &collection).await?;
    contention_burst(&service, &collection, config.contenders).await?;

    let summary = service.collection_summary(&collection).await?;
    info!(
        total = summary.total,
        available = summary.available,
        held = summary.held,
        allocated = summary.allocated,
        "Collection summary"
    );

    let health = service.health().await;
    for check in &health.checks {
        info!(component = %check.component, status = %check.status, message = ?check.message, "Health check");
    }

    if metrics_server.is_some() {
        info!("Serving metrics; press Ctrl+C to stop");
        shutdown_signal().await;
    }

    sweeper.shutdown().await?;
    info!("Demo finished");
    Ok(())
}

/// Alice holds two seats and commits them while Bob is turned away, then
/// Alice cancels and Bob gets his seat.
async fn two_customers(service: &LeasingService, collection: &CollectionId) -> anyhow::Result<()> {
    let alice = HolderId::new("alice");
    let bob = HolderId::new("bob");
    let a1 = ResourceKey::new(collection.clone(), "A1");
    let a2 = ResourceKey::new(collection.clone(), "A2");

    let hold = service.acquire_hold(&a1, &alice).await?;
    info!(seat = %hold.resource, expires_at = %hold.expires_at, "Alice holds a seat");
    service.acquire_hold(&a2, &alice).await?;

    if let Err(e) = service.acquire_hold(&a1, &bob).await {
        info!(error = %e, "Bob is turned away");
    }

    let allocation = service
        .commit(collection, &[ResourceId::new("A1"), ResourceId::new("A2")], &alice)
        .await?;
    info!(allocation_id = %allocation.id, seats = allocation.resources.len(), "Alice committed");

    if let Err(e) = service.acquire_hold(&a1, &bob).await {
        info!(error = %e, kind = ?e.kind(), "Bob is turned away again");
    }

    service.cancel_allocation(allocation.id, &alice).await?;
    let hold = service.acquire_hold(&a1, &bob).await?;
    info!(seat = %hold.resource, "Bob holds the seat after Alice cancelled");
    service.release_hold(&a1, &bob).await?;

    Ok(())
}

/// Many identities race for the same seat; exactly one wins.
async fn contention_burst(
    service: &Arc<LeasingService>,
    collection: &CollectionId,
    contenders: usize,
) -> anyhow::Result<()> {
    let seat = ResourceKey::new(collection.clone(), "B1");

    let tasks = (0..contenders).map(|i| {
        let service = Arc::clone(service);
        let seat = seat.clone();
        tokio::spawn(async move {
            service
                .acquire_hold(&seat, &HolderId::new(format!("fan-{i}")))
                .await
        })
    });

    let mut winners = Vec::new();
    for joined in join_all(tasks).await {
        if let Ok(hold) = joined? {
            winners.push(hold);
        }
    }

    info!(contenders, winners = winners.len(), seat = %seat, "Contention burst finished");
    Ok(())
}

/// Graceful shutdown signal handler.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
