//! Throughput benchmarks for sockit.
//!
//! These benchmarks measure the raw message throughput of the codec and the
//! mesh's routing and membership paths.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sockit_bench::{join_clients, roomy_config, sample_message, DrainBehavior};
use sockit_core::{BroadcastBehavior, Mesh};
use sockit_protocol::codec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

/// Benchmark envelope encoding.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for size in [64usize, 1024, 32 * 1024] {
        let message = sample_message("lobby", size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &message, |b, message| {
            b.iter(|| codec::encode(black_box(message)))
        });
    }

    group.finish();
}

/// Benchmark envelope decoding.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for size in [64usize, 1024, 32 * 1024] {
        let encoded = codec::encode(&sample_message("lobby", size)).unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| codec::decode(black_box(encoded)))
        });
    }

    group.finish();
}

/// Benchmark dispatch from the mesh queue into a single room's runner.
fn bench_dispatch(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_room", |b| {
        let received = Arc::new(AtomicU64::new(0));
        let mesh = rt.block_on(async {
            let mesh = Mesh::with_config(
                "bench",
                roomy_config(),
                Arc::new(DrainBehavior::new(Arc::clone(&received))),
            );
            mesh.create_room("arena", "bench-client").await.unwrap();
            mesh
        });
        let message = sample_message("arena", 64);

        b.iter_custom(|iters| {
            rt.block_on(async {
                let target = received.load(Ordering::Relaxed) + iters;
                let start = Instant::now();
                for _ in 0..iters {
                    mesh.submit(message.clone()).await.unwrap();
                }
                while received.load(Ordering::Relaxed) < target {
                    tokio::task::yield_now().await;
                }
                start.elapsed()
            })
        });

        mesh.shutdown();
    });

    group.finish();
}

/// Benchmark join/leave through the coordinator.
fn bench_membership(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("membership");

    group.bench_function("join_leave", |b| {
        let (mesh, _clients) = rt.block_on(async {
            let mesh =
                Mesh::with_config("bench", roomy_config(), Arc::new(DrainBehavior::default()));
            let clients = join_clients(&mesh, "lobby", 1, 1).await;
            (mesh, clients)
        });

        b.iter_custom(|iters| {
            rt.block_on(async {
                let start = Instant::now();
                for i in 0..iters {
                    let room = format!("room-{}", i % 64);
                    mesh.join_room(&room, "client-0").await.unwrap();
                    mesh.leave_room(&room, "client-0").await.unwrap();
                }
                start.elapsed()
            })
        });

        mesh.shutdown();
    });

    group.finish();
}

/// Benchmark broadcast fan-out to every member of a room.
fn bench_fanout(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("fanout");

    for size in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let (mesh, mut clients) = rt.block_on(async {
                let mesh = Mesh::with_config("bench", roomy_config(), Arc::new(BroadcastBehavior));
                let clients = join_clients(&mesh, "broadcast", size, 4).await;
                (mesh, clients)
            });
            let message = sample_message("broadcast", 64);

            b.iter_custom(|iters| {
                rt.block_on(async {
                    let start = Instant::now();
                    for _ in 0..iters {
                        mesh.submit(message.clone()).await.unwrap();
                        for client in &mut clients {
                            client.outbound.recv().await.unwrap();
                        }
                    }
                    start.elapsed()
                })
            });

            mesh.shutdown();
        });
    }

    group.finish();
}

/// Benchmark the read-side snapshot accessors.
fn bench_snapshots(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("snapshots");

    let (mesh, _clients) = rt.block_on(async {
        let mesh = Mesh::with_config("bench", roomy_config(), Arc::new(DrainBehavior::default()));
        let clients = join_clients(&mesh, "lobby", 100, 1).await;
        for i in 0..1000 {
            mesh.join_room(&format!("room-{i}"), &format!("client-{}", i % 100))
                .await
                .unwrap();
        }
        (mesh, clients)
    });

    group.bench_function("room_members", |b| {
        let mut i = 0;
        b.iter(|| {
            let room = format!("room-{}", i % 1000);
            i += 1;
            mesh.room_members(black_box(&room))
        });
    });

    group.bench_function("memberships", |b| b.iter(|| mesh.memberships()));

    group.bench_function("stats", |b| b.iter(|| mesh.stats()));

    group.finish();
    mesh.shutdown();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_dispatch,
    bench_membership,
    bench_fanout,
    bench_snapshots,
);
criterion_main!(benches);
