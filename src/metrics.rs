// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Connection / room metrics --------
pub static CONNECTIONS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("connections_active", "open websocket connections").unwrap());

pub static ROOM_MEMBERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("room_members", "subscribers per symbol room"),
        &["symbol"],
    )
    .unwrap()
});

// -------- Price feed metrics --------
pub static TICKS_BY_SYMBOL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticks_total_by_symbol", "price ticks per symbol"),
        &["symbol"],
    )
    .unwrap()
});

pub static CURRENT_PRICE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("current_price", "last tick price per symbol"),
        &["symbol"],
    )
    .unwrap()
});

pub static FEEDS_RUNNING: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("feeds_running", "active price tickers").unwrap());

// -------- Trading metrics --------
pub static TRANSACTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "transactions_total",
            "trades processed (labels: action, status)",
        ),
        &["action", "status"],
    )
    .unwrap()
});

pub static TRADE_REJECTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("trade_rejects_total", "trades rejected by validation").unwrap());

// -------- Fan-out health --------
pub static EVENTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "events_dropped_total",
        "outbound events dropped on full per-connection queues",
    )
    .unwrap()
});

pub fn init() {
    for m in [
        REGISTRY.register(Box::new(CONNECTIONS.clone())),
        REGISTRY.register(Box::new(ROOM_MEMBERS.clone())),
        REGISTRY.register(Box::new(TICKS_BY_SYMBOL.clone())),
        REGISTRY.register(Box::new(CURRENT_PRICE.clone())),
        REGISTRY.register(Box::new(FEEDS_RUNNING.clone())),
        REGISTRY.register(Box::new(TRANSACTIONS.clone())),
        REGISTRY.register(Box::new(TRADE_REJECTS.clone())),
        REGISTRY.register(Box::new(EVENTS_DROPPED.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                eprintln!("metrics bind {} failed: {}", addr, e);
                return;
            }
        };
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
