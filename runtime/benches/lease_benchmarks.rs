//! Leasing performance benchmarks
//!
//! Measures the per-operation cost of the leasing path over the in-memory store:
//! - Hold acquire/release cycle, and renewal
//! - Commit followed by cancellation
//! - Listing a large collection
//! - Sweeping a store full of unexpired holds
//! - Many identities contending for a handful of seats
//!
//! Run with: `cargo bench -p seatlease-runtime`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use seatlease_core::{CollectionId, ResourceId, ResourceKey};
use seatlease_testing::{TestHarness, holder, key};
use std::sync::Arc;

fn current_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

/// Benchmark single-resource hold operations
fn benchmark_holds(c: &mut Criterion) {
    let mut group = c.benchmark_group("holds");
    group.throughput(Throughput::Elements(1));
    let runtime = current_thread_runtime();

    group.bench_function("acquire_release", |b| {
        let harness = runtime.block_on(TestHarness::scenario());
        let resource = key("C1", "S1");
        let alice = holder("alice");

        b.to_async(&runtime).iter(|| async {
            harness
                .service
                .acquire_hold(black_box(&resource), &alice)
                .await
                .expect("acquire failed");
            harness
                .service
                .release_hold(&resource, &alice)
                .await
                .expect("release failed");
        });
    });

    group.bench_function("renew", |b| {
        let harness = runtime.block_on(TestHarness::scenario());
        let resource = key("C1", "S1");
        let alice = holder("alice");

        b.to_async(&runtime).iter(|| async {
            harness
                .service
                .acquire_hold(black_box(&resource), &alice)
                .await
                .expect("renew failed");
        });
    });

    group.finish();
}

/// Benchmark commit and cancellation of multi-resource allocations
fn benchmark_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");
    let runtime = current_thread_runtime();

    for size in [1usize, 4, 10] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("commit_cancel", size), &size, |b, &size| {
            let harness = TestHarness::new();
            let collection = CollectionId::new("hall");
            let seats = runtime
                .block_on(harness.service.provision_grid(&collection, 1, 10))
                .expect("provision failed");
            let members: Vec<ResourceId> = seats.into_iter().take(size).collect();
            let alice = holder("alice");

            b.to_async(&runtime).iter(|| async {
                for seat in &members {
                    harness
                        .service
                        .acquire_hold(&ResourceKey::new(collection.clone(), seat.clone()), &alice)
                        .await
                        .expect("acquire failed");
                }
                let allocation = harness
                    .service
                    .commit(&collection, black_box(&members), &alice)
                    .await
                    .expect("commit failed");
                harness
                    .service
                    .cancel_allocation(allocation.id, &alice)
                    .await
                    .expect("cancel failed");
            });
        });
    }

    group.finish();
}

/// Benchmark reads and sweeps over a 1000-seat hall
fn benchmark_collection_scans(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection_scans");
    let runtime = current_thread_runtime();

    let harness = TestHarness::new();
    let collection = CollectionId::new("hall");
    let seats = runtime
        .block_on(harness.service.provision_grid(&collection, 20, 50))
        .expect("provision failed");
    runtime.block_on(async {
        for (i, seat) in seats.iter().enumerate().step_by(2) {
            harness
                .service
                .acquire_hold(
                    &ResourceKey::new(collection.clone(), seat.clone()),
                    &holder(&format!("user-{i}")),
                )
                .await
                .expect("acquire failed");
        }
    });

    group.throughput(Throughput::Elements(seats.len() as u64));
    group.bench_function("list_resources", |b| {
        b.to_async(&runtime).iter(|| async {
            harness
                .service
                .list_resources(black_box(&collection), None)
                .await
                .expect("list failed")
        });
    });

    group.bench_function("sweep_nothing_expired", |b| {
        b.to_async(&runtime).iter(|| async {
            harness.service.sweep_expired().await.expect("sweep failed")
        });
    });

    group.finish();
}

/// Benchmark contended acquires on the multi-threaded runtime
fn benchmark_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    for contenders in [10usize, 100] {
        group.throughput(Throughput::Elements(contenders as u64));
        group.bench_with_input(
            BenchmarkId::new("acquire_same_seat", contenders),
            &contenders,
            |b, &contenders| {
                b.to_async(&runtime).iter(|| async move {
                    let harness = TestHarness::scenario().await;
                    let mut handles = Vec::with_capacity(contenders);
                    for i in 0..contenders {
                        let service = Arc::clone(&harness.service);
                        handles.push(tokio::spawn(async move {
                            service
                                .acquire_hold(&key("C1", "S1"), &holder(&format!("user-{i}")))
                                .await
                                .is_ok()
                        }));
                    }
                    for handle in handles {
                        handle.await.expect("Task failed");
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_holds,
    benchmark_commit,
    benchmark_collection_scans,
    benchmark_contention,
);
criterion_main!(benches);
