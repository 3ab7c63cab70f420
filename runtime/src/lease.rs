//! Hold acquisition, renewal and release.
//!
//! Every decision is made under the resource's lock from a fresh read, and written
//! with a compare-and-swap keyed on the version that was read. Under the lock the
//! swap only loses when another process shares the store; the manager then
//! re-reads and decides again, up to the configured attempt budget.

use crate::config::{ConfigError, LeaseConfig};
use crate::metrics::LeaseMetrics;
use crate::reclaim::{self, ReclaimMode};
use crate::registry::ResourceRegistry;
use chrono::{DateTime, TimeDelta, Utc};
use seatlease_core::{
    CasOutcome, Hold, HoldInfo, HolderId, LeaseError, ReleaseOutcome, Resource, ResourceKey,
    ResourceState, Transition,
};
use std::sync::Arc;

/// Grants and releases holds.
#[derive(Debug)]
pub struct LeaseManager {
    registry: Arc<ResourceRegistry>,
    lease_ttl: TimeDelta,
    max_cas_attempts: u32,
}

/// What to do with the current record of an acquire target
enum Grant {
    New,
    Renew,
}

impl LeaseManager {
    /// Creates a lease manager.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` is invalid.
    pub fn new(registry: Arc<ResourceRegistry>, config: &LeaseConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            registry,
            lease_ttl: config.lease_ttl()?,
            max_cas_attempts: config.max_cas_attempts,
        })
    }

    /// Grant `holder` a hold on `key`, or extend the hold it already has.
    ///
    /// An expired hold, whoever owned it, is reclaimed first and the resource is
    /// treated as available. A renewal restarts the hold at the current time.
    ///
    /// # Errors
    ///
    /// - [`LeaseError::ResourceNotFound`]: no such resource
    /// - [`LeaseError::AlreadyAllocated`]: the resource is permanently allocated
    /// - [`LeaseError::AlreadyHeld`]: another identity has an unexpired hold
    /// - [`LeaseError::Contention`]: kept losing the write to another process
    /// - [`LeaseError::Store`]: the store failed
    pub async fn acquire_hold(
        &self,
        key: &ResourceKey,
        holder: &HolderId,
    ) -> Result<Hold, LeaseError> {
        let _guard = self.registry.lock(key).await;

        for attempt in 1..=self.max_cas_attempts {
            let now = self.registry.now();
            let observed = self.registry.load(key).await?;
            let resource = reclaim::settle(&self.registry, observed, now, ReclaimMode::Lazy)
                .await?
                .resource;
            if resource.is_reclaimable(now) {
                continue;
            }

            let grant = Self::decide_grant(&resource, holder)?;
            let info = self.hold_info(holder, now);
            let transition = Transition::new(&resource, ResourceState::Held(info.clone()));

            match self.registry.compare_and_swap(transition).await? {
                CasOutcome::Swapped(_) => {
                    let renewed = matches!(grant, Grant::Renew);
                    LeaseMetrics::record_granted(renewed);
                    tracing::info!(
                        key = %key,
                        holder = %holder,
                        expires_at = %info.expires_at,
                        renewed,
                        "Hold granted"
                    );
                    return Ok(Hold::from_info(key.clone(), &info, renewed));
                }
                CasOutcome::Conflict(_) => {
                    tracing::debug!(key = %key, attempt, "Hold write conflicted, re-reading");
                }
            }
        }

        LeaseMetrics::record_rejected("contention");
        Err(LeaseError::Contention(key.clone()))
    }

    /// Release `holder`'s hold on `key`.
    ///
    /// The caller's own hold is released whether or not it has expired. Releasing
    /// a resource the caller held last and that is already available succeeds
    /// with [`ReleaseOutcome::AlreadyReleased`].
    ///
    /// # Errors
    ///
    /// - [`LeaseError::ResourceNotFound`]: no such resource
    /// - [`LeaseError::NotHeldByCaller`]: held by someone else, allocated, or never
    ///   held by the caller
    /// - [`LeaseError::Contention`]: kept losing the write to another process
    /// - [`LeaseError::Store`]: the store failed
    pub async fn release_hold(
        &self,
        key: &ResourceKey,
        holder: &HolderId,
    ) -> Result<ReleaseOutcome, LeaseError> {
        let _guard = self.registry.lock(key).await;

        for attempt in 1..=self.max_cas_attempts {
            let now = self.registry.now();
            let resource = self.registry.load(key).await?;

            match &resource.state {
                ResourceState::Held(hold) if &hold.holder == holder => {
                    let transition = Transition::new(&resource, ResourceState::Available);
                    match self.registry.compare_and_swap(transition).await? {
                        CasOutcome::Swapped(_) => {
                            LeaseMetrics::record_released();
                            tracing::info!(key = %key, holder = %holder, "Hold released");
                            return Ok(ReleaseOutcome::Released);
                        }
                        CasOutcome::Conflict(_) => {
                            tracing::debug!(key = %key, attempt, "Release conflicted, re-reading");
                        }
                    }
                }
                ResourceState::Held(_) => {
                    if resource.is_reclaimable(now) {
                        reclaim::settle(&self.registry, resource, now, ReclaimMode::Lazy).await?;
                    }
                    return Err(Self::not_held(key, holder));
                }
                ResourceState::Available if resource.last_holder.as_ref() == Some(holder) => {
                    tracing::debug!(key = %key, holder = %holder, "Hold already released");
                    return Ok(ReleaseOutcome::AlreadyReleased);
                }
                ResourceState::Available | ResourceState::Allocated(_) => {
                    return Err(Self::not_held(key, holder));
                }
            }
        }

        Err(LeaseError::Contention(key.clone()))
    }

    /// Whether `key` is under an unexpired hold right now.
    ///
    /// # Errors
    ///
    /// - [`LeaseError::ResourceNotFound`]: no such resource
    /// - [`LeaseError::Store`]: the store failed
    pub async fn is_held(&self, key: &ResourceKey) -> Result<bool, LeaseError> {
        let resource = self.registry.get(key).await?;
        Ok(resource.is_held(self.registry.now()))
    }

    /// Configured hold duration
    #[must_use]
    pub const fn lease_ttl(&self) -> TimeDelta {
        self.lease_ttl
    }

    fn decide_grant(resource: &Resource, holder: &HolderId) -> Result<Grant, LeaseError> {
        match &resource.state {
            ResourceState::Available => Ok(Grant::New),
            ResourceState::Held(hold) if &hold.holder == holder => Ok(Grant::Renew),
            ResourceState::Held(hold) => {
                LeaseMetrics::record_rejected("held");
                tracing::debug!(
                    key = %resource.key,
                    requester = %holder,
                    current_holder = %hold.holder,
                    expires_at = %hold.expires_at,
                    "Hold refused: held by another identity"
                );
                Err(LeaseError::AlreadyHeld {
                    key: resource.key.clone(),
                    expires_at: hold.expires_at,
                })
            }
            ResourceState::Allocated(_) => {
                LeaseMetrics::record_rejected("allocated");
                tracing::debug!(key = %resource.key, requester = %holder, "Hold refused: already allocated");
                Err(LeaseError::AlreadyAllocated(resource.key.clone()))
            }
        }
    }

    fn hold_info(&self, holder: &HolderId, now: DateTime<Utc>) -> HoldInfo {
        HoldInfo {
            holder: holder.clone(),
            granted_at: now,
            expires_at: now + self.lease_ttl,
        }
    }

    fn not_held(key: &ResourceKey, holder: &HolderId) -> LeaseError {
        tracing::debug!(key = %key, holder = %holder, "Release refused: not held by caller");
        LeaseError::NotHeldByCaller {
            key: key.clone(),
            holder: holder.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use seatlease_core::{CollectionId, ResourceId, ResourceStatus};
    use seatlease_testing::{InMemoryLeaseStore, ManualClock};

    async fn manager() -> (LeaseManager, Arc<ResourceRegistry>, ManualClock) {
        let clock = ManualClock::default();
        let registry = Arc::new(ResourceRegistry::new(
            Arc::new(InMemoryLeaseStore::new()),
            Arc::new(clock.clone()),
        ));
        registry
            .provision(&CollectionId::new("C1"), [ResourceId::new("S1")])
            .await
            .unwrap();
        let manager = LeaseManager::new(Arc::clone(&registry), &LeaseConfig::default()).unwrap();
        (manager, registry, clock)
    }

    fn s1() -> ResourceKey {
        ResourceKey::new("C1", "S1")
    }

    #[tokio::test]
    async fn acquire_then_renew_restarts_the_hold() {
        let (manager, _registry, clock) = manager().await;
        let alice = HolderId::new("alice");

        let first = manager.acquire_hold(&s1(), &alice).await.unwrap();
        assert!(!first.renewed);
        assert_eq!(first.expires_at - first.granted_at, TimeDelta::seconds(300));

        clock.advance(TimeDelta::seconds(100));
        let renewed = manager.acquire_hold(&s1(), &alice).await.unwrap();
        assert!(renewed.renewed);
        assert_eq!(renewed.expires_at, first.expires_at + TimeDelta::seconds(100));
    }

    #[tokio::test]
    async fn second_identity_is_refused_until_expiry() {
        let (manager, _registry, clock) = manager().await;
        let alice = HolderId::new("alice");
        let bob = HolderId::new("bob");

        let first = manager.acquire_hold(&s1(), &alice).await.unwrap();
        let refused = manager.acquire_hold(&s1(), &bob).await.unwrap_err();
        assert!(matches!(
            refused,
            LeaseError::AlreadyHeld { expires_at, .. } if expires_at == first.expires_at
        ));
        assert!(!refused.to_string().contains(alice.as_str()));

        clock.advance(TimeDelta::seconds(300));
        let taken = manager.acquire_hold(&s1(), &bob).await.unwrap();
        assert_eq!(taken.holder, bob);
        assert!(!taken.renewed);
    }

    #[tokio::test]
    async fn release_is_owner_only_and_idempotent() {
        let (manager, registry, _clock) = manager().await;
        let alice = HolderId::new("alice");
        let bob = HolderId::new("bob");

        manager.acquire_hold(&s1(), &alice).await.unwrap();
        assert!(matches!(
            manager.release_hold(&s1(), &bob).await,
            Err(LeaseError::NotHeldByCaller { .. })
        ));

        assert_eq!(
            manager.release_hold(&s1(), &alice).await.unwrap(),
            ReleaseOutcome::Released
        );
        assert_eq!(
            manager.release_hold(&s1(), &alice).await.unwrap(),
            ReleaseOutcome::AlreadyReleased
        );
        assert!(matches!(
            manager.release_hold(&s1(), &bob).await,
            Err(LeaseError::NotHeldByCaller { .. })
        ));
        assert_eq!(
            registry.get(&s1()).await.unwrap().status(),
            ResourceStatus::Available
        );
    }

    #[tokio::test]
    async fn releasing_an_expired_hold_reclaims_it() {
        let (manager, registry, clock) = manager().await;
        let alice = HolderId::new("alice");
        let bob = HolderId::new("bob");

        manager.acquire_hold(&s1(), &alice).await.unwrap();
        clock.advance(TimeDelta::seconds(301));

        assert!(manager.release_hold(&s1(), &bob).await.is_err());
        assert_eq!(
            registry.find(&s1()).await.unwrap().unwrap().status(),
            ResourceStatus::Available
        );
        assert_eq!(
            manager.release_hold(&s1(), &alice).await.unwrap(),
            ReleaseOutcome::AlreadyReleased
        );
    }

    #[tokio::test]
    async fn own_expired_hold_can_still_be_released() {
        let (manager, registry, clock) = manager().await;
        let alice = HolderId::new("alice");

        manager.acquire_hold(&s1(), &alice).await.unwrap();
        clock.advance(TimeDelta::seconds(500));

        assert_eq!(
            manager.release_hold(&s1(), &alice).await.unwrap(),
            ReleaseOutcome::Released
        );
        assert_eq!(
            registry.get(&s1()).await.unwrap().status(),
            ResourceStatus::Available
        );
    }

    #[tokio::test]
    async fn unknown_resource_is_not_found() {
        let (manager, _registry, _clock) = manager().await;
        let missing = ResourceKey::new("C1", "S99");
        assert!(matches!(
            manager.acquire_hold(&missing, &HolderId::new("alice")).await,
            Err(LeaseError::ResourceNotFound(_))
        ));
        assert!(matches!(
            manager.is_held(&missing).await,
            Err(LeaseError::ResourceNotFound(_))
        ));
    }
}
