//! Concurrency stress tests for holds, commits and sweeps.
//!
//! These run on the multi-threaded runtime so contending tasks really interleave.
//!
//! Run with: `cargo test -p seatlease-runtime --test concurrency_test`

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use futures::future::join_all;
use seatlease_core::{CollectionId, LeaseError, ResourceStatus};
use seatlease_testing::{TestHarness, holder, ids, init_tracing, key};
use std::collections::HashSet;
use std::sync::Arc;

/// Test: N identities race for one resource; exactly one wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_acquire_single_winner() {
    init_tracing();
    let harness = TestHarness::scenario().await;
    let contenders = 50;

    let tasks = (0..contenders).map(|i| {
        let service = Arc::clone(&harness.service);
        tokio::spawn(async move {
            service
                .acquire_hold(&key("C1", "S1"), &holder(&format!("user-{i}")))
                .await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let already_held = results
        .iter()
        .filter(|r| matches!(r, Err(LeaseError::AlreadyHeld { .. })))
        .count();

    assert_eq!(winners, 1, "exactly one contender should win the hold");
    assert_eq!(already_held, contenders - 1);
}

/// Test: overlapping commits never allocate a resource twice.
///
/// Each identity holds a disjoint resource, then everyone commits its own plus a
/// shared one it does not hold. All such commits must fail without side effects.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_commits_are_all_or_nothing() {
    init_tracing();
    let harness = TestHarness::new();
    let collection = CollectionId::new("hall");
    harness
        .service
        .provision_grid(&collection, 1, 9)
        .await
        .unwrap();

    // A1 is held by "owner"; A2..A9 by one identity each.
    harness
        .service
        .acquire_hold(&key("hall", "A1"), &holder("owner"))
        .await
        .unwrap();
    for seat in 2..=9 {
        harness
            .service
            .acquire_hold(&key("hall", &format!("A{seat}")), &holder(&format!("user-{seat}")))
            .await
            .unwrap();
    }

    let tasks = (2..=9).map(|seat| {
        let service = Arc::clone(&harness.service);
        let collection = collection.clone();
        tokio::spawn(async move {
            service
                .commit(
                    &collection,
                    &ids(&["A1", &format!("A{seat}")]),
                    &holder(&format!("user-{seat}")),
                )
                .await
        })
    });
    for joined in join_all(tasks).await {
        let err = joined.unwrap().unwrap_err();
        assert_eq!(err.failed_resources().len(), 1);
        assert_eq!(err.failed_resources()[0].as_str(), "A1");
    }

    let summary = harness.service.collection_summary(&collection).await.unwrap();
    assert_eq!(summary.allocated, 0);
    assert_eq!(summary.held, 9);
    assert_eq!(harness.store.allocation_count(), 0);
}

/// Test: many identities commit overlapping pairs; allocated resources stay disjoint.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_commits_yield_disjoint_allocations() {
    init_tracing();
    let harness = TestHarness::new();
    let collection = CollectionId::new("hall");
    let seats = harness
        .service
        .provision_grid(&collection, 2, 10)
        .await
        .unwrap();

    // Each user tries to grab two adjacent seats, hold them, then commit.
    let tasks = (0..seats.len() - 1).map(|i| {
        let service = Arc::clone(&harness.service);
        let collection = collection.clone();
        let pair = vec![seats[i].clone(), seats[i + 1].clone()];
        tokio::spawn(async move {
            let user = holder(&format!("user-{i}"));
            for seat in &pair {
                let resource_key = seatlease_core::ResourceKey::new(collection.clone(), seat.clone());
                if service.acquire_hold(&resource_key, &user).await.is_err() {
                    return None;
                }
            }
            service.commit(&collection, &pair, &user).await.ok()
        })
    });

    let allocations: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .filter_map(|joined| joined.unwrap())
        .collect();

    let mut allocated = HashSet::new();
    for allocation in &allocations {
        for seat in &allocation.resources {
            assert!(allocated.insert(seat.clone()), "{seat} allocated twice");
        }
    }

    let listed = harness.service.list_resources(&collection, None).await.unwrap();
    let allocated_in_store = listed
        .iter()
        .filter(|view| view.status == ResourceStatus::Allocated)
        .count();
    assert_eq!(allocated_in_store, allocated.len());
}

/// Test: sweeps racing acquires never hand out a resource twice.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_racing_acquire() {
    init_tracing();
    let harness = TestHarness::scenario().await;
    for resource in ["S1", "S2", "S3", "S4", "S5"] {
        harness
            .service
            .acquire_hold(&key("C1", resource), &holder("alice"))
            .await
            .unwrap();
    }
    harness.advance_secs(301);

    let sweeps = (0..4).map(|_| {
        let service = Arc::clone(&harness.service);
        tokio::spawn(async move { service.sweep_expired().await.unwrap().reclaimed_count() })
    });
    let acquires = (0..20).map(|i| {
        let service = Arc::clone(&harness.service);
        tokio::spawn(async move {
            let resource = format!("S{}", i % 5 + 1);
            service
                .acquire_hold(&key("C1", &resource), &holder(&format!("user-{i}")))
                .await
                .ok()
                .map(|hold| hold.resource)
        })
    });

    let (swept, acquired) = tokio::join!(join_all(sweeps), join_all(acquires));
    let swept: usize = swept.into_iter().map(|joined| joined.unwrap()).sum();
    let acquired: Vec<_> = acquired
        .into_iter()
        .filter_map(|joined| joined.unwrap())
        .collect();

    // Each expired hold is reclaimed once, by whichever path got there first.
    assert!(swept <= 5);
    let unique: HashSet<_> = acquired.iter().cloned().collect();
    assert_eq!(unique.len(), acquired.len(), "a resource was granted twice");
    assert_eq!(acquired.len(), 5);
}

/// Test: concurrent renewals by the holder while others contend.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_renewal_under_contention() {
    init_tracing();
    let harness = TestHarness::scenario().await;
    harness
        .service
        .acquire_hold(&key("C1", "S1"), &holder("alice"))
        .await
        .unwrap();

    let tasks = (0..40).map(|i| {
        let service = Arc::clone(&harness.service);
        tokio::spawn(async move {
            let who = if i % 2 == 0 { "alice".to_string() } else { format!("user-{i}") };
            service.acquire_hold(&key("C1", "S1"), &holder(&who)).await
        })
    });

    for (i, joined) in join_all(tasks).await.into_iter().enumerate() {
        let result = joined.unwrap();
        if i % 2 == 0 {
            assert!(result.unwrap().renewed);
        } else {
            assert!(matches!(result, Err(LeaseError::AlreadyHeld { .. })));
        }
    }

    // Idle per-resource locks are released once nobody waits on them.
    assert_eq!(harness.service.registry().tracked_locks(), 0);
}
