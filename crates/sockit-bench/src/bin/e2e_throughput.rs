//! End-to-end throughput benchmark for sockit.
//!
//! Connects websocket clients to a running server, joins them all to one
//! room and measures how many broadcast messages come back.
//!
//! ```bash
//! sockit &
//! e2e_throughput 16 ws://127.0.0.1:8080/ws
//! ```

use futures_util::{SinkExt, StreamExt};
use sockit_bench::{sample_message, setup_then_wait};
use sockit_protocol::{codec, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Barrier;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";
const ROOM: &str = "benchmark";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("sockit end-to-end throughput benchmark");
    println!("server: {url} (start it first: cargo run --release --bin sockit)");
    println!();

    run_room_benchmark(num_clients, url).await;
}

async fn run_room_benchmark(num_clients: usize, url: String) {
    println!("Room broadcast: {} clients in '{}'", num_clients, ROOM);
    println!("Warmup: {}s, measurement: {}s", WARMUP_SECS, BENCH_SECS);

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let count = Arc::clone(&message_count);
        let barrier = Arc::clone(&barrier);
        let url = format!("{url}?slug=bench-{client_id}");

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(&url, count, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    barrier.wait().await;
    println!("All {} clients joined", num_clients);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);
    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();

    println!();
    println!("clients:        {:>10}", num_clients);
    println!("duration:       {:>10.2}s", elapsed.as_secs_f64());
    println!("received:       {:>10}", total_messages);
    println!("throughput:     {:>10.0} msg/s", msgs_per_sec);
    println!(
        "per client:     {:>10.0} msg/s",
        msgs_per_sec / num_clients as f64
    );

    for handle in handles {
        handle.abort();
    }
}

fn text_frame(message: &Message) -> Result<WsMessage, BoxError> {
    let data = codec::encode(message)?;
    Ok(WsMessage::Text(String::from_utf8(data.to_vec())?))
}

async fn connect_and_join(url: &str) -> Result<WsStream, BoxError> {
    let (mut ws, _) = connect_async(url).await?;
    ws.send(text_frame(&Message::to_room("join-room", ROOM))?)
        .await?;
    Ok(ws)
}

async fn run_client(
    url: &str,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let ws = setup_then_wait(connect_and_join(url), &barrier).await?;
    let (mut sender, mut receiver) = ws.split();

    let publish = text_frame(&sample_message(ROOM, 64))?;

    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            if let Ok(WsMessage::Text(text)) = result {
                if codec::decode(text.as_bytes()).is_ok() {
                    message_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    loop {
        if sender.send(publish.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
