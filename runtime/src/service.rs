//! The caller-facing leasing API.
//!
//! [`LeasingService`] wires the registry, lease manager, committer, ledger and
//! reclaimer together over one store and one clock, and speaks in views rather
//! than raw records.

use crate::commit::AllocationCommitter;
use crate::config::{ConfigError, LeaseConfig};
use crate::health::{HealthCheck, HealthReport};
use crate::lease::LeaseManager;
use crate::ledger::AllocationLedger;
use crate::reclaim::{ExpiryReclaimer, SweepReport, SweeperHandle};
use crate::registry::{ResourceRegistry, seat_grid};
use seatlease_core::environment::Clock;
use seatlease_core::{
    AllocationId, AllocationView, CollectionId, CollectionSummary, HoldView, HolderId, LeaseError,
    LeaseStore, ReleaseOutcome, ResourceId, ResourceKey, ResourceView,
};
use std::sync::Arc;

/// Leasing operations over one store.
///
/// # Example
///
/// ```ignore
/// let service = LeasingService::new(store, Arc::new(SystemClock), LeaseConfig::from_env())?;
/// service.provision_grid(&CollectionId::new("concert"), 6, 10).await?;
///
/// let alice = HolderId::new("alice");
/// service.acquire_hold(&ResourceKey::new("concert", "A1"), &alice).await?;
/// let allocation = service
///     .commit(&CollectionId::new("concert"), &[ResourceId::new("A1")], &alice)
///     .await?;
/// ```
#[derive(Debug)]
pub struct LeasingService {
    config: LeaseConfig,
    registry: Arc<ResourceRegistry>,
    leases: LeaseManager,
    committer: AllocationCommitter,
    ledger: AllocationLedger,
    reclaimer: Arc<ExpiryReclaimer>,
}

impl LeasingService {
    /// Creates a service over `store`, reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        config: LeaseConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Arc::new(ResourceRegistry::new(store, clock));
        Ok(Self {
            leases: LeaseManager::new(Arc::clone(&registry), &config)?,
            committer: AllocationCommitter::new(Arc::clone(&registry)),
            ledger: AllocationLedger::new(Arc::clone(&registry)),
            reclaimer: Arc::new(ExpiryReclaimer::new(Arc::clone(&registry))),
            registry,
            config,
        })
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Shared registry
    #[must_use]
    pub const fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Hold manager
    #[must_use]
    pub const fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    /// Allocation ledger
    #[must_use]
    pub const fn ledger(&self) -> &AllocationLedger {
        &self.ledger
    }

    /// Expiry reclaimer
    #[must_use]
    pub const fn reclaimer(&self) -> &Arc<ExpiryReclaimer> {
        &self.reclaimer
    }

    // ========================================================================
    // Provisioning
    // ========================================================================

    /// Add available resources to `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] if any id already exists or the store fails.
    pub async fn provision_collection(
        &self,
        collection: &CollectionId,
        resources: impl IntoIterator<Item = ResourceId>,
    ) -> Result<usize, LeaseError> {
        self.registry.provision(collection, resources).await
    }

    /// Add a `rows` × `seats_per_row` grid of seats (`A1`, `A2`, …, `B1`, …).
    ///
    /// Returns the created seat ids.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] if any seat already exists or the store fails.
    pub async fn provision_grid(
        &self,
        collection: &CollectionId,
        rows: usize,
        seats_per_row: u32,
    ) -> Result<Vec<ResourceId>, LeaseError> {
        let seats = seat_grid(rows, seats_per_row);
        self.registry.provision(collection, seats.clone()).await?;
        Ok(seats)
    }

    // ========================================================================
    // Caller-facing operations
    // ========================================================================

    /// Every resource of `collection` as seen by `caller`.
    ///
    /// Expired holds are reclaimed before the listing is returned.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] if the store fails.
    pub async fn list_resources(
        &self,
        collection: &CollectionId,
        caller: Option<&HolderId>,
    ) -> Result<Vec<ResourceView>, LeaseError> {
        let resources = self.registry.list(collection).await?;
        let now = self.registry.now();
        Ok(resources
            .iter()
            .map(|resource| ResourceView::project(resource, caller, now))
            .collect())
    }

    /// Availability counts for `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] if the store fails.
    pub async fn collection_summary(
        &self,
        collection: &CollectionId,
    ) -> Result<CollectionSummary, LeaseError> {
        let resources = self.registry.list(collection).await?;
        Ok(CollectionSummary::tally(&resources, self.registry.now()))
    }

    /// Grant or renew a hold.
    ///
    /// # Errors
    ///
    /// See [`LeaseManager::acquire_hold`].
    pub async fn acquire_hold(
        &self,
        key: &ResourceKey,
        holder: &HolderId,
    ) -> Result<HoldView, LeaseError> {
        self.leases.acquire_hold(key, holder).await.map(HoldView::from)
    }

    /// Release a hold.
    ///
    /// # Errors
    ///
    /// See [`LeaseManager::release_hold`].
    pub async fn release_hold(
        &self,
        key: &ResourceKey,
        holder: &HolderId,
    ) -> Result<ReleaseOutcome, LeaseError> {
        self.leases.release_hold(key, holder).await
    }

    /// Commit held resources into one allocation.
    ///
    /// # Errors
    ///
    /// See [`AllocationCommitter::commit`].
    pub async fn commit(
        &self,
        collection: &CollectionId,
        resources: &[ResourceId],
        holder: &HolderId,
    ) -> Result<AllocationView, LeaseError> {
        self.committer
            .commit(collection, resources, holder)
            .await
            .map(AllocationView::from)
    }

    /// Cancel an allocation and return its resources to the pool.
    ///
    /// # Errors
    ///
    /// See [`AllocationLedger::cancel`].
    pub async fn cancel_allocation(
        &self,
        id: AllocationId,
        requester: &HolderId,
    ) -> Result<AllocationView, LeaseError> {
        self.ledger
            .cancel(id, requester)
            .await
            .map(AllocationView::from)
    }

    /// Allocations owned by `holder`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] if the store fails.
    pub async fn list_allocations(
        &self,
        holder: &HolderId,
    ) -> Result<Vec<AllocationView>, LeaseError> {
        let allocations = self.ledger.list_for(holder).await?;
        Ok(allocations.into_iter().map(AllocationView::from).collect())
    }

    // ========================================================================
    // Reclamation
    // ========================================================================

    /// Run one expiry sweep now.
    ///
    /// # Errors
    ///
    /// See [`ExpiryReclaimer::sweep`].
    pub async fn sweep_expired(&self) -> Result<SweepReport, LeaseError> {
        self.reclaimer.sweep().await
    }

    /// Start the background sweeper at the configured interval.
    #[must_use]
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        Arc::clone(&self.reclaimer).spawn(self.config.sweep_interval)
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Store reachability and sweeper freshness.
    pub async fn health(&self) -> HealthReport {
        let now = self.registry.now();
        let held = self
            .registry
            .store()
            .list_held()
            .await
            .map(|held| held.len());

        HealthReport::new(
            vec![
                HealthCheck::lease_store(held),
                HealthCheck::expiry_sweeper(
                    self.reclaimer.last_sweep(),
                    self.config.sweep_interval,
                    now,
                ),
            ],
            now,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;
    use chrono::TimeDelta;
    use seatlease_core::ResourceStatus;
    use seatlease_testing::{InMemoryLeaseStore, ManualClock};
    use std::time::Duration;

    fn service(clock: &ManualClock) -> LeasingService {
        LeasingService::new(
            Arc::new(InMemoryLeaseStore::new()),
            Arc::new(clock.clone()),
            LeaseConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = LeasingService::new(
            Arc::new(InMemoryLeaseStore::new()),
            Arc::new(ManualClock::default()),
            LeaseConfig::default().with_lease_duration(Duration::ZERO),
        );
        assert!(matches!(result, Err(ConfigError::ZeroLeaseDuration)));
    }

    #[tokio::test]
    async fn listing_hides_other_holders() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let concert = CollectionId::new("concert");
        service.provision_grid(&concert, 1, 2).await.unwrap();

        let alice = HolderId::new("alice");
        let bob = HolderId::new("bob");
        service
            .acquire_hold(&ResourceKey::new("concert", "A1"), &alice)
            .await
            .unwrap();

        let for_bob = service.list_resources(&concert, Some(&bob)).await.unwrap();
        assert_eq!(for_bob.len(), 2);
        assert!(for_bob[0].is_held);
        assert!(!for_bob[0].holder_is_caller);
        assert_eq!(for_bob[1].status, ResourceStatus::Available);

        let for_alice = service.list_resources(&concert, Some(&alice)).await.unwrap();
        assert!(for_alice[0].holder_is_caller);
    }

    #[tokio::test]
    async fn summary_counts_after_expiry() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let concert = CollectionId::new("concert");
        service.provision_grid(&concert, 2, 2).await.unwrap();

        let alice = HolderId::new("alice");
        service
            .acquire_hold(&ResourceKey::new("concert", "A1"), &alice)
            .await
            .unwrap();
        service
            .acquire_hold(&ResourceKey::new("concert", "A2"), &alice)
            .await
            .unwrap();
        service
            .commit(&concert, &[ResourceId::new("A2")], &alice)
            .await
            .unwrap();

        let summary = service.collection_summary(&concert).await.unwrap();
        assert_eq!((summary.total, summary.available, summary.held, summary.allocated), (4, 2, 1, 1));

        clock.advance(TimeDelta::seconds(300));
        let summary = service.collection_summary(&concert).await.unwrap();
        assert_eq!((summary.available, summary.held), (3, 0));
    }

    #[tokio::test]
    async fn health_tracks_sweeper_freshness() {
        let clock = ManualClock::default();
        let service = service(&clock);

        let report = service.health().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.check("lease_store").unwrap().status.is_healthy());

        service.sweep_expired().await.unwrap();
        assert!(service.health().await.is_healthy());

        clock.advance(TimeDelta::seconds(181));
        let report = service.health().await;
        assert!(report.is_degraded());
        assert!(report.check("expiry_sweeper").unwrap().metadata("last_sweep").is_some());
    }
}
