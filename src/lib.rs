//! Realtime trading-simulation server.
//!
//! Per-symbol synthetic price feeds (random walk, bounded history),
//! room-based price broadcast over WebSocket, and buy/sell execution
//! against in-memory per-user wallets. One hub actor owns all mutable
//! state; transports and per-symbol tickers reach it over a single
//! command channel.
//!
//! All state is in memory and resets on restart; identity is an opaque
//! per-connection id with no authentication.

pub mod api;
pub mod config;
pub mod domain;
pub mod feed;
pub mod hub;
pub mod metrics;
pub mod rooms;
pub mod server;
pub mod wallet;
