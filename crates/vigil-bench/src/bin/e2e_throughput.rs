//! End-to-end throughput benchmark for Vigil.
//!
//! Opens many WebSocket clients against a running server and measures how
//! many ping/pong exchanges it sustains over real network I/O.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8000/ws";
const CHANNELS: [&str; 4] = ["live_feed", "violations", "system_status", "analytics"];
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Vigil End-to-End Throughput Benchmark                ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_ping_benchmark(num_clients).await;
}

async fn run_ping_benchmark(num_clients: usize) {
    println!("📊 Ping/Pong Benchmark: {} clients", num_clients);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let pong_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    // Spread clients over the channels; each channel holds 100 at most
    for client_id in 0..num_clients {
        let pongs = Arc::clone(&pong_count);
        let barrier = Arc::clone(&barrier);
        let channel = CHANNELS[client_id % CHANNELS.len()];

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(channel, pongs, Arc::clone(&barrier)).await {
                eprintln!("Client {} error: {}", client_id, e);
                barrier.wait().await;
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("✓ All {} clients connected", num_clients);

    // Warmup phase
    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    // Reset counter and start measurement
    pong_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = pong_count.load(Ordering::SeqCst);

    let per_sec = total as f64 / elapsed.as_secs_f64();
    let per_sec_per_client = per_sec / num_clients as f64;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Round Trips:          {:>10}                           ║",
        total
    );
    println!(
        "║  Throughput:           {:>10.0} msg/s                    ║",
        per_sec
    );
    println!(
        "║  Per-Client:           {:>10.0} msg/s                    ║",
        per_sec_per_client
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    // Signal clients to stop
    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    channel: &str,
    pong_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(format!("{SERVER_URL}/{channel}")).await?;
    let (mut sender, mut receiver) = ws.split();

    // Wait for the welcome message
    match receiver.next().await {
        Some(Ok(Message::Text(text))) if text.contains("\"connection\"") => {}
        Some(Ok(Message::Close(frame))) => {
            return Err(format!("rejected: {:?}", frame).into());
        }
        other => return Err(format!("unexpected welcome: {:?}", other).into()),
    }

    // Wait for all clients to be ready
    barrier.wait().await;

    let ping = Message::Text(r#"{"type":"ping","data":"bench"}"#.to_string());

    // One exchange in flight per client; server heartbeats are skipped
    loop {
        sender.send(ping.clone()).await?;
        loop {
            match receiver.next().await {
                Some(Ok(Message::Text(text))) if text.contains("\"pong\"") => {
                    pong_count.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            }
        }
    }
}
