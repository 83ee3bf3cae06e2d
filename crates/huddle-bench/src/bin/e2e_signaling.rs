//! End-to-end signaling benchmark for Huddle.
//!
//! Clients join one room over real WebSockets, then hammer the server with
//! `getProducers` requests while measuring round-trip latency.

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{codec, Frame, Request};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:3000/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Default)]
struct Counters {
    replies: AtomicU64,
    errors: AtomicU64,
    latency_micros: AtomicU64,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let room = args.get(2).cloned().unwrap_or_else(|| "bench".to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Huddle End-to-End Signaling Benchmark                ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_signaling_benchmark(num_clients, room).await;
}

async fn run_signaling_benchmark(num_clients: usize, room: String) {
    println!("📊 Signaling Benchmark: {} clients in room '{}'", num_clients, room);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let counters = Arc::clone(&counters);
        let barrier = Arc::clone(&barrier);
        let room = room.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(room, counters, Arc::clone(&barrier)).await {
                eprintln!("Client {} error: {}", client_id, e);
                // Keep the barrier count right so the run still completes.
                barrier.wait().await;
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to join
    barrier.wait().await;
    println!("✓ All {} clients joined", num_clients);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    counters.replies.store(0, Ordering::SeqCst);
    counters.errors.store(0, Ordering::SeqCst);
    counters.latency_micros.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let replies = counters.replies.load(Ordering::SeqCst);
    let errors = counters.errors.load(Ordering::SeqCst);
    let latency_micros = counters.latency_micros.load(Ordering::SeqCst);

    let requests_per_sec = replies as f64 / elapsed.as_secs_f64();
    let mean_latency = if replies > 0 {
        latency_micros as f64 / replies as f64
    } else {
        0.0
    };

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
        "║  Replies:              {:>10}                           ║",
        replies
    );
    println!(
        "║  Error replies:        {:>10}                           ║",
        errors
    );
    println!(
        "║  Throughput:           {:>10.0} req/s                    ║",
        requests_per_sec
    );
    println!(
        "║  Mean round trip:      {:>10.1} µs                       ║",
        mean_latency
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

/// Read frames until one with a request id arrives. Events are skipped.
async fn next_reply<S>(receiver: &mut S, buf: &mut BytesMut) -> Result<Frame, BoxError>
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        while let Some(frame) = codec::decode_from(buf)? {
            if matches!(frame, Frame::Response { .. } | Frame::Error { .. }) {
                return Ok(frame);
            }
        }
        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => buf.extend_from_slice(&data),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => return Err("connection closed".into()),
        }
    }
}

async fn run_client(
    room: String,
    counters: Arc<Counters>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(SERVER_URL).await?;
    let (mut sender, mut receiver) = ws.split();
    let mut buf = BytesMut::with_capacity(65536);

    // connection-success is sent as JSON before the client picks an encoding.
    if let Some(Ok(_connected)) = receiver.next().await {}

    let join = Frame::request(1, Request::JoinRoom { room_name: room });
    sender
        .send(Message::Binary(codec::encode(&join)?.to_vec()))
        .await?;
    if let Frame::Error { message, .. } = next_reply(&mut receiver, &mut buf).await? {
        return Err(message.into());
    }

    barrier.wait().await;

    let mut request_id = 1u64;
    loop {
        request_id += 1;
        let request = Frame::request(request_id, Request::GetProducers);
        let start = Instant::now();
        sender
            .send(Message::Binary(codec::encode(&request)?.to_vec()))
            .await?;

        let reply = next_reply(&mut receiver, &mut buf).await?;
        counters
            .latency_micros
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        counters.replies.fetch_add(1, Ordering::Relaxed);
        if matches!(reply, Frame::Error { .. }) {
            counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}
