// ===============================
// src/main.rs
// ===============================
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stocksim_server::{api, config, hub, metrics, server};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // ---- Load config ----
    let (args, feed_cfg) = config::load();

    // ---- Metrics ----
    metrics::init();
    metrics::serve_metrics(args.metrics_port);

    info!(
        ws_port = args.ws_port,
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        tick_ms = feed_cfg.tick_ms,
        base_price = feed_cfg.base_price,
        max_step = feed_cfg.max_step,
        stop_idle_feeds = feed_cfg.stop_idle_feeds,
        "startup config"
    );

    // ---- Hub (owns rooms, wallets, prices) ----
    let (cmd_tx, cmd_rx) = mpsc::channel::<hub::Command>(4096);
    tokio::spawn(hub::run(cmd_rx, cmd_tx.clone(), feed_cfg));

    // ---- WebSocket transport ----
    let ws_listener = match server::bind(args.ws_port).await {
        Ok(l) => l,
        Err(e) => {
            error!(?e, port = args.ws_port, "ws bind failed");
            return;
        }
    };
    info!(port = args.ws_port, "ws server listening");
    tokio::spawn(server::run(ws_listener, cmd_tx.clone()));

    // ---- Stateless transaction endpoint ----
    let api_addr: SocketAddr = ([0, 0, 0, 0], args.api_port).into();
    match api::serve(api_addr, cmd_tx.clone()) {
        Ok((addr, srv)) => {
            info!(%addr, "transaction api listening");
            tokio::spawn(async move {
                if let Err(e) = srv.await {
                    error!(?e, "transaction api stopped");
                }
            });
        }
        Err(e) => {
            error!(?e, port = args.api_port, "api bind failed");
            return;
        }
    }

    // ---- Heartbeat until shutdown ----
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                info!(
                    connections = metrics::CONNECTIONS.get(),
                    feeds = metrics::FEEDS_RUNNING.get(),
                    "heartbeat"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }
}
