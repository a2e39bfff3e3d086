//! Latency benchmarks for Vigil.
//!
//! These benchmarks measure control message handling, both in isolation and
//! through a full session over the in-memory transport.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Instant;
use vigil_core::{run_session, ConnectionManager, DataProviders, ManagerConfig, RejectAll};
use vigil_transport::memory::duplex;
use vigil_transport::InboundFrame;

fn manager() -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        ManagerConfig::default(),
        Arc::new(RejectAll),
        DataProviders::with_defaults(),
    ))
}

/// Benchmark decoding and answering one frame without any transport.
fn bench_handle_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("handle_frame");
    let rt = tokio::runtime::Runtime::new().unwrap();

    let manager = manager();
    let (sink, _stream, _peer) = duplex();
    let id = rt
        .block_on(manager.admit(Box::new(sink), "system_status", None))
        .unwrap()
        .connection_id;

    for (name, frame) in [
        ("ping", r#"{"type":"ping","data":{"seq":1}}"#),
        ("heartbeat", r#"{"type":"heartbeat"}"#),
        ("subscribe", r#"{"type":"subscribe","channels":["alerts","system_metrics"]}"#),
        ("current_status", r#"{"type":"request_data","request_type":"current_status"}"#),
        ("invalid_json", "{not json"),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| manager.handle_frame(id, InboundFrame::Text(black_box(frame).to_string())))
        });
    }

    group.finish();
}

/// Benchmark ping to pong through a running session.
fn bench_session_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_round_trip");
    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("ping", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let manager = manager();
                let (sink, stream, mut peer) = duplex();
                let id = manager
                    .admit(Box::new(sink), "violations", None)
                    .await
                    .unwrap()
                    .connection_id;
                tokio::spawn(run_session(Arc::clone(&manager), id, Box::new(stream)));
                peer.recv_text().await.unwrap();

                let start = Instant::now();
                for _ in 0..iters {
                    peer.send_text(r#"{"type":"ping"}"#);
                    black_box(peer.recv_text().await);
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_handle_frame, bench_session_round_trip);
criterion_main!(benches);
