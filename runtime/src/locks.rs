//! Per-key mutual exclusion.
//!
//! [`KeyedLocks`] hands out one async mutex per key, created on first use and
//! dropped again once nobody holds or waits for it. Unrelated keys never contend.
//!
//! # Lock Order
//!
//! [`KeyedLocks::lock_all`] acquires keys in ascending `Ord` order. Every caller
//! that needs more than one key goes through it, so two overlapping requests can
//! never wait on each other in a cycle.
//!
//! # Cancellation
//!
//! Waiting is cancel-safe: dropping a pending `lock` future abandons the wait
//! without affecting the current holder or other waiters. Callers that need a
//! deadline wrap the call in `tokio::time::timeout`.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;
type SlotTable<K> = Arc<Mutex<HashMap<K, Slot>>>;

/// Table of per-key async mutexes.
pub struct KeyedLocks<K> {
    slots: SlotTable<K>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Ord + Clone,
{
    /// Creates an empty lock table
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> KeyGuard<K> {
        let slot = self.slot(key);
        let guard = slot.lock_owned().await;
        KeyGuard {
            key: key.clone(),
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Wait for exclusive access to every key, acquired in ascending order.
    ///
    /// Duplicate keys are locked once. Guards are returned in acquisition order.
    pub async fn lock_all(&self, keys: impl IntoIterator<Item = K>) -> Vec<KeyGuard<K>> {
        let ordered: BTreeSet<K> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for key in &ordered {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Drop table entries nobody holds or waits for.
    ///
    /// Returns how many entries were removed. Only needed to clean up after
    /// cancelled waiters; released guards remove their own entry.
    pub fn prune(&self) -> usize {
        let mut slots = self.table();
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - slots.len()
    }

    /// Number of keys currently tracked
    #[must_use]
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Whether no key is currently tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    fn slot(&self, key: &K) -> Slot {
        let mut slots = self.table();
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<K, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Ord + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for KeyedLocks<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tracked = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("KeyedLocks").field("tracked", &tracked).finish()
    }
}

/// Exclusive access to one key; released on drop.
pub struct KeyGuard<K>
where
    K: Eq + Hash,
{
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    slots: SlotTable<K>,
}

impl<K> KeyGuard<K>
where
    K: Eq + Hash,
{
    /// The locked key
    pub const fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        // Release first so the slot's only remaining reference may be the table's.
        drop(self.guard.take());

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock(&"S1".to_string()).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let _first = locks.lock(&"S1".to_string()).await;

        let second = tokio::time::timeout(Duration::from_millis(200), locks.lock(&"S2".to_string())).await;
        assert!(second.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn overlapping_multi_key_requests_do_not_deadlock() {
        let locks = Arc::new(KeyedLocks::new());

        let mut tasks = Vec::new();
        for round in 0..50 {
            let locks = Arc::clone(&locks);
            tasks.push(tokio::spawn(async move {
                let keys = if round % 2 == 0 {
                    vec!["S3", "S1", "S2"]
                } else {
                    vec!["S2", "S3", "S1"]
                };
                let guards = locks.lock_all(keys.into_iter().map(String::from)).await;
                let order: Vec<&str> = guards.iter().map(|g| g.key().as_str()).collect();
                assert_eq!(order, vec!["S1", "S2", "S3"]);
                tokio::task::yield_now().await;
            }));
        }

        let all = futures::future::join_all(tasks);
        let results = tokio::time::timeout(Duration::from_secs(5), all).await.unwrap();
        assert!(results.into_iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn duplicate_keys_are_locked_once() {
        let locks = KeyedLocks::new();
        let guards = locks
            .lock_all(vec!["S1".to_string(), "S1".to_string()])
            .await;
        assert_eq!(guards.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_lock_usable() {
        let locks = Arc::new(KeyedLocks::new());
        let key = "S1".to_string();
        let held = locks.lock(&key).await;

        let waiter = tokio::time::timeout(Duration::from_millis(20), locks.lock(&key)).await;
        assert!(waiter.is_err(), "waiter should time out while the key is held");

        drop(held);
        let reacquired = tokio::time::timeout(Duration::from_millis(200), locks.lock(&key)).await;
        assert!(reacquired.is_ok());
        drop(reacquired);

        locks.prune();
        assert!(locks.is_empty());
    }
}
