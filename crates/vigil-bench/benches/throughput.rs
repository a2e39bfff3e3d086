//! Throughput benchmarks for Vigil.
//!
//! These benchmarks measure broadcast fan-out and registry operations over
//! the in-memory transport.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;
use vigil_core::{
    ChannelKind, ConnectionHandle, ConnectionManager, DataProviders, ManagerConfig, RejectAll,
    Registry,
};
use vigil_protocol::ServerMessage;
use vigil_transport::memory::duplex;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// A manager with `size` members on the violations channel whose peers
/// discard everything they receive.
fn populated_manager(rt: &Runtime, size: usize) -> ConnectionManager {
    rt.block_on(async {
        let manager = ConnectionManager::new(
            ManagerConfig {
                capacity_per_channel: size,
                ..ManagerConfig::default()
            },
            Arc::new(RejectAll),
            DataProviders::with_defaults(),
        );

        for _ in 0..size {
            let (sink, _stream, mut peer) = duplex();
            let handle = ConnectionHandle::spawn(Box::new(sink), 64);
            manager
                .registry()
                .register(handle, ChannelKind::Violations, None)
                .unwrap();
            tokio::spawn(async move { while peer.recv().await.is_some() {} });
        }
        manager
    })
}

/// Benchmark fan-out scenarios.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    let rt = runtime();
    let message = ServerMessage::NewViolation {
        data: json!({"id": 42, "plate": "ABC123", "type": "red_light"}),
    };

    for size in [1, 10, 100, 1000].iter() {
        let manager = populated_manager(&rt, *size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                rt.block_on(manager.broadcast_to_channel(ChannelKind::Violations, black_box(&message)))
            });
        });
    }

    group.finish();
}

/// Benchmark registry operations.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    let rt = runtime();
    let _guard = rt.enter();

    group.bench_function("register_unregister", |b| {
        let registry = Registry::with_capacity(usize::MAX);
        let (sink, _stream, _peer) = duplex();
        let handle = ConnectionHandle::spawn(Box::new(sink), 8);
        b.iter(|| {
            let id = registry
                .register(handle.clone(), ChannelKind::LiveFeed, None)
                .unwrap();
            registry.unregister(black_box(id))
        });
    });

    group.bench_function("snapshot_100", |b| {
        let registry = Registry::new();
        let (sink, _stream, _peer) = duplex();
        let handle = ConnectionHandle::spawn(Box::new(sink), 8);
        for _ in 0..100 {
            registry
                .register(handle.clone(), ChannelKind::Analytics, None)
                .unwrap();
        }
        b.iter(|| registry.snapshot_members(black_box(ChannelKind::Analytics)));
    });

    group.bench_function("stats_400", |b| {
        let registry = Registry::new();
        let (sink, _stream, _peer) = duplex();
        let handle = ConnectionHandle::spawn(Box::new(sink), 8);
        for kind in ChannelKind::ALL {
            for _ in 0..100 {
                registry.register(handle.clone(), kind, None).unwrap();
            }
        }
        b.iter(|| registry.stats());
    });

    group.finish();
}

criterion_group!(benches, bench_fanout, bench_registry);
criterion_main!(benches);
