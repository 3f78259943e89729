// ===============================
// src/hub.rs
// ===============================
//
// Connection hub: the single actor that owns every piece of shared mutable
// state (identities, wallets, rooms, prices, ticker handles). Transports
// and tickers talk to it over one command channel, so wallet execution,
// membership changes and price mutation are all serialized here. Outbound
// fan-out uses bounded per-connection queues with try_send, so a slow
// client can never stall a tick or another client.
//

use ahash::AHashMap as HashMap;
use chrono::Utc;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FeedCfg;
use crate::domain::{ConnId, ServerEvent, TradeOrder, TradeOutcome, TradeStatus};
use crate::feed::{self, PriceState};
use crate::metrics::{
    CONNECTIONS, CURRENT_PRICE, EVENTS_DROPPED, FEEDS_RUNNING, ROOM_MEMBERS, TICKS_BY_SYMBOL,
    TRADE_REJECTS, TRANSACTIONS,
};
use crate::rooms::RoomRegistry;
use crate::wallet::{self, TradeError, WalletLedger};

/// Per-connection outbound queue depth. Full queue = event dropped for
/// that connection only.
pub const OUTBOUND_QUEUE: usize = 64;

const NAMES: [&str; 15] = [
    "Sayan", "Aakash", "Amey", "Rahul", "Priya",
    "Neha", "Vikram", "Anjali", "Rohan", "Kavita",
    "Arjun", "Divya", "Karan", "Meera", "Rajiv",
];

#[derive(Debug)]
pub enum Command {
    Connect {
        conn: ConnId,
        name_hint: Option<String>,
        outbound: mpsc::Sender<ServerEvent>,
    },
    Disconnect { conn: ConnId },
    Join { conn: ConnId, symbol: String },
    Leave { conn: ConnId },
    Trade { conn: ConnId, order: TradeOrder },
    /// Stateless HTTP path; same semantics as Trade, routed by explicit id.
    HttpTrade {
        user_id: ConnId,
        order: TradeOrder,
        resp: oneshot::Sender<Result<TradeOutcome, TradeError>>,
    },
    Tick { symbol: String },
}

struct ConnEntry {
    name: String,
    outbound: mpsc::Sender<ServerEvent>,
}

struct Hub {
    cfg: FeedCfg,
    cmd_tx: mpsc::Sender<Command>,
    conns: HashMap<ConnId, ConnEntry>,
    rooms: RoomRegistry,
    ledger: WalletLedger,
    prices: HashMap<String, PriceState>,
    tickers: HashMap<String, JoinHandle<()>>,
}

pub async fn run(mut cmd_rx: mpsc::Receiver<Command>, cmd_tx: mpsc::Sender<Command>, cfg: FeedCfg) {
    let mut hub = Hub {
        cfg,
        cmd_tx,
        conns: HashMap::new(),
        rooms: RoomRegistry::new(),
        ledger: WalletLedger::new(),
        prices: HashMap::new(),
        tickers: HashMap::new(),
    };

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Connect { conn, name_hint, outbound } => hub.on_connect(conn, name_hint, outbound),
            Command::Disconnect { conn } => hub.on_disconnect(&conn),
            Command::Join { conn, symbol } => hub.on_join(&conn, &symbol),
            Command::Leave { conn } => hub.on_leave(&conn),
            Command::Trade { conn, order } => hub.on_trade(&conn, order),
            Command::HttpTrade { user_id, order, resp } => {
                let out = hub.execute_trade(&user_id, &order);
                let _ = resp.send(out);
            }
            Command::Tick { symbol } => hub.on_tick(&symbol),
        }
    }

    // channel closed: tear down the tickers
    for (_, handle) in hub.tickers.drain() {
        handle.abort();
    }
    info!("hub stopped");
}

impl Hub {
    fn on_connect(&mut self, conn: ConnId, name_hint: Option<String>, outbound: mpsc::Sender<ServerEvent>) {
        let name = name_hint
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| NAMES[rand::thread_rng().gen_range(0..NAMES.len())].to_string());

        let wallet = self.ledger.open(&conn, wallet::starting_balance());
        self.conns.insert(conn.clone(), ConnEntry { name: name.clone(), outbound });
        CONNECTIONS.inc();
        info!(conn = %conn, user = %name, balance = wallet.balance, "user connected");

        // USER_INFO always precedes any other traffic on this connection
        self.emit(&conn, ServerEvent::UserInfo { user_id: conn.clone(), user_name: name, wallet });
    }

    fn on_disconnect(&mut self, conn: &str) {
        self.notify_departure(conn);
        let name = self.conns.remove(conn).map(|e| e.name).unwrap_or_default();
        self.ledger.close(conn);
        CONNECTIONS.dec();
        info!(conn = %conn, user = %name, "user disconnected");
    }

    fn on_join(&mut self, conn: &str, symbol: &str) {
        let name = match self.conns.get(conn) {
            Some(e) => e.name.clone(),
            None => return,
        };

        let out = self.rooms.join(conn, symbol);
        if let Some((old, remaining)) = &out.left {
            ROOM_MEMBERS.with_label_values(&[old]).set(remaining.len() as i64);
            self.notify(remaining, format!("{name} left the room"));
            self.maybe_stop_feed(old);
        }
        ROOM_MEMBERS
            .with_label_values(&[symbol])
            .set(self.rooms.member_count(symbol) as i64);

        // unknown symbols are valid: price state is created on demand
        let base = self.cfg.base_price;
        let state = self.prices.entry(symbol.to_string()).or_insert_with(|| PriceState::new(base));

        // idempotent feed start on first subscriber
        if !self.tickers.contains_key(symbol) {
            state.seed_history(Utc::now(), self.cfg.tick_ms);
            let handle = tokio::spawn(feed::run_ticker(
                symbol.to_string(),
                self.cmd_tx.clone(),
                self.cfg.tick_ms,
            ));
            self.tickers.insert(symbol.to_string(), handle);
            FEEDS_RUNNING.inc();
            info!(%symbol, "price feed started");
        }

        let snapshot = ServerEvent::StockPrice {
            stock_name: symbol.to_string(),
            price: state.current_price,
            history: state.history.iter().cloned().collect(),
        };
        self.emit(conn, snapshot);
        self.notify(&out.peers, format!("{name} joined the room"));
        info!(conn = %conn, user = %name, %symbol, "joined room");
    }

    fn on_leave(&mut self, conn: &str) {
        self.notify_departure(conn);
    }

    fn on_trade(&mut self, conn: &str, order: TradeOrder) {
        match self.execute_trade(conn, &order) {
            Ok(outcome) => self.emit(conn, ServerEvent::TransactionResult(outcome)),
            Err(e) => {
                // validation failure: nothing mutated, caller only
                let Some(entry) = self.conns.get(conn) else { return };
                let name = entry.name.clone();
                let wallet = self.ledger.get(conn).cloned().unwrap_or_default();
                warn!(conn = %conn, %e, "trade rejected");
                self.emit(
                    conn,
                    ServerEvent::TransactionResult(TradeOutcome {
                        transaction: crate::domain::TransactionRecord {
                            symbol: order.symbol.clone(),
                            price: order.price,
                            quantity: order.quantity,
                            action: order.action,
                            timestamp: Utc::now().to_rfc3339(),
                            status: TradeStatus::Failed,
                            user: name,
                        },
                        wallet,
                        failure_reason: Some(e.to_string()),
                    }),
                );
            }
        }
    }

    /// Shared by the ws and HTTP paths: execute against the ledger and, on
    /// Passed, broadcast to the other members of the symbol's room.
    fn execute_trade(&mut self, conn: &str, order: &TradeOrder) -> Result<TradeOutcome, TradeError> {
        let user = self
            .conns
            .get(conn)
            .map(|e| e.name.clone())
            .ok_or(TradeError::UnknownUser)?;

        let outcome = self.ledger.execute(conn, order, &user, Utc::now()).map_err(|e| {
            TRADE_REJECTS.inc();
            e
        })?;

        let action = match order.action {
            crate::domain::TradeAction::Buy => "buy",
            crate::domain::TradeAction::Sell => "sell",
        };
        let status = match outcome.transaction.status {
            TradeStatus::Passed => "passed",
            TradeStatus::Failed => "failed",
        };
        TRANSACTIONS.with_label_values(&[action, status]).inc();

        if outcome.transaction.status == TradeStatus::Passed {
            let audience = self.rooms.peers(&order.symbol, conn);
            let ev = ServerEvent::LiveTransaction { transaction: outcome.transaction.clone() };
            for peer in &audience {
                self.emit(peer, ev.clone());
            }
            info!(user = %user, symbol = %order.symbol, action = ?order.action, qty = order.quantity, px = order.price, "trade passed");
        } else {
            debug!(user = %user, symbol = %order.symbol, reason = ?outcome.failure_reason, "trade failed");
        }
        Ok(outcome)
    }

    fn on_tick(&mut self, symbol: &str) {
        let Some(state) = self.prices.get_mut(symbol) else { return };
        let change = feed::draw_change(self.cfg.max_step);
        let update = state.apply_tick(symbol, change, Utc::now());

        TICKS_BY_SYMBOL.with_label_values(&[symbol]).inc();
        CURRENT_PRICE.with_label_values(&[symbol]).set(update.current_price);

        let ev = ServerEvent::StockPriceUpdate(update);
        for member in self.rooms.members(symbol) {
            self.emit(&member, ev.clone());
        }
    }

    /// Leave the current room (if any) and tell the remaining members.
    fn notify_departure(&mut self, conn: &str) {
        let name = self.conns.get(conn).map(|e| e.name.clone()).unwrap_or_default();
        if let Some((symbol, remaining)) = self.rooms.leave(conn) {
            ROOM_MEMBERS.with_label_values(&[&symbol]).set(remaining.len() as i64);
            self.notify(&remaining, format!("{name} left the room"));
            self.maybe_stop_feed(&symbol);
            info!(conn = %conn, user = %name, %symbol, "left room");
        }
    }

    fn maybe_stop_feed(&mut self, symbol: &str) {
        // policy flag: default keeps idle feeds ticking for chart continuity
        if !self.cfg.stop_idle_feeds || self.rooms.member_count(symbol) > 0 {
            return;
        }
        if let Some(handle) = self.tickers.remove(symbol) {
            handle.abort();
            FEEDS_RUNNING.dec();
            info!(%symbol, "price feed stopped (room empty)");
        }
    }

    fn notify(&self, audience: &[ConnId], message: String) {
        let ev = ServerEvent::Notification { message, timestamp: Utc::now().to_rfc3339() };
        for conn in audience {
            self.emit(conn, ev.clone());
        }
    }

    /// Best-effort delivery: never await the client.
    fn emit(&self, conn: &str, ev: ServerEvent) {
        if let Some(entry) = self.conns.get(conn) {
            if entry.outbound.try_send(ev).is_err() {
                EVENTS_DROPPED.inc();
                warn!(conn = %conn, "outbound queue full or gone, event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TradeAction;
    use tokio::time::{timeout, Duration};

    // tick_ms high enough that no ticker fires during a test
    fn quiet_cfg() -> FeedCfg {
        FeedCfg { tick_ms: 3_600_000, base_price: 500, max_step: 500, stop_idle_feeds: false }
    }

    struct TestClient {
        id: ConnId,
        rx: mpsc::Receiver<ServerEvent>,
    }

    async fn start_hub(cfg: FeedCfg) -> mpsc::Sender<Command> {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        tokio::spawn(run(cmd_rx, cmd_tx.clone(), cfg));
        cmd_tx
    }

    async fn connect(cmd_tx: &mpsc::Sender<Command>, id: &str, name: &str) -> TestClient {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        cmd_tx
            .send(Command::Connect {
                conn: id.to_string(),
                name_hint: Some(name.to_string()),
                outbound: tx,
            })
            .await
            .unwrap();
        TestClient { id: id.to_string(), rx }
    }

    async fn recv(client: &mut TestClient) -> ServerEvent {
        timeout(Duration::from_secs(2), client.rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("outbound channel closed")
    }

    #[tokio::test]
    async fn user_info_arrives_first() {
        let cmd_tx = start_hub(quiet_cfg()).await;
        let mut c = connect(&cmd_tx, "u1", "Sayan").await;

        match recv(&mut c).await {
            ServerEvent::UserInfo { user_id, user_name, wallet } => {
                assert_eq!(user_id, "u1");
                assert_eq!(user_name, "Sayan");
                assert!(wallet.balance >= wallet::BALANCE_MIN && wallet.balance < wallet::BALANCE_MAX);
                assert!(wallet.holdings.is_empty());
            }
            other => panic!("expected USER_INFO, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_join_delivers_seeded_snapshot() {
        let cmd_tx = start_hub(quiet_cfg()).await;
        let mut c = connect(&cmd_tx, "u1", "Sayan").await;
        recv(&mut c).await; // USER_INFO

        cmd_tx.send(Command::Join { conn: "u1".into(), symbol: "ACME".into() }).await.unwrap();
        match recv(&mut c).await {
            ServerEvent::StockPrice { stock_name, price, history } => {
                assert_eq!(stock_name, "ACME");
                assert_eq!(price, 500);
                assert_eq!(history.len(), crate::feed::SEED_POINTS);
            }
            other => panic!("expected STOCK_PRICE, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn peers_get_join_and_leave_notifications() {
        let cmd_tx = start_hub(quiet_cfg()).await;
        let mut a = connect(&cmd_tx, "u1", "Sayan").await;
        let mut b = connect(&cmd_tx, "u2", "Priya").await;
        recv(&mut a).await;
        recv(&mut b).await;

        cmd_tx.send(Command::Join { conn: "u1".into(), symbol: "ACME".into() }).await.unwrap();
        recv(&mut a).await; // snapshot

        cmd_tx.send(Command::Join { conn: "u2".into(), symbol: "ACME".into() }).await.unwrap();
        recv(&mut b).await; // snapshot
        match recv(&mut a).await {
            ServerEvent::Notification { message, .. } => assert_eq!(message, "Priya joined the room"),
            other => panic!("expected NOTIFICATION, got {other:?}"),
        }

        // switching rooms notifies the old room's remaining members
        cmd_tx.send(Command::Join { conn: "u2".into(), symbol: "GLOBO".into() }).await.unwrap();
        match recv(&mut a).await {
            ServerEvent::Notification { message, .. } => assert_eq!(message, "Priya left the room"),
            other => panic!("expected NOTIFICATION, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn passed_trade_reaches_peers_failed_stays_private() {
        let cmd_tx = start_hub(quiet_cfg()).await;
        let mut a = connect(&cmd_tx, "u1", "Sayan").await;
        let mut b = connect(&cmd_tx, "u2", "Priya").await;
        recv(&mut a).await;
        recv(&mut b).await;

        cmd_tx.send(Command::Join { conn: "u1".into(), symbol: "ACME".into() }).await.unwrap();
        recv(&mut a).await;
        cmd_tx.send(Command::Join { conn: "u2".into(), symbol: "ACME".into() }).await.unwrap();
        recv(&mut b).await;
        recv(&mut a).await; // join notification

        let buy = TradeOrder { symbol: "ACME".into(), price: 100, quantity: 10, action: TradeAction::Buy };
        cmd_tx.send(Command::Trade { conn: "u1".into(), order: buy }).await.unwrap();

        match recv(&mut a).await {
            ServerEvent::TransactionResult(out) => {
                assert_eq!(out.transaction.status, TradeStatus::Passed);
                assert_eq!(out.wallet.holdings.get("ACME"), Some(&10));
            }
            other => panic!("expected TRANSACTION_RESULT, got {other:?}"),
        }
        match recv(&mut b).await {
            ServerEvent::LiveTransaction { transaction } => {
                assert_eq!(transaction.user, "Sayan");
                assert_eq!(transaction.quantity, 10);
            }
            other => panic!("expected LIVE_TRANSACTION, got {other:?}"),
        }

        // a sell with no holdings fails and is never broadcast
        let sell = TradeOrder { symbol: "ACME".into(), price: 100, quantity: 999, action: TradeAction::Sell };
        cmd_tx.send(Command::Trade { conn: "u2".into(), order: sell }).await.unwrap();
        match recv(&mut b).await {
            ServerEvent::TransactionResult(out) => {
                assert_eq!(out.transaction.status, TradeStatus::Failed);
                assert_eq!(out.failure_reason.as_deref(), Some(wallet::REASON_HOLDINGS));
            }
            other => panic!("expected TRANSACTION_RESULT, got {other:?}"),
        }
        assert!(
            timeout(Duration::from_millis(200), a.rx.recv()).await.is_err(),
            "failed trade must not reach peers"
        );
    }

    #[tokio::test]
    async fn tick_broadcasts_to_all_room_members() {
        let cmd_tx = start_hub(quiet_cfg()).await;
        let mut a = connect(&cmd_tx, "u1", "Sayan").await;
        let mut b = connect(&cmd_tx, "u2", "Priya").await;
        recv(&mut a).await;
        recv(&mut b).await;

        cmd_tx.send(Command::Join { conn: "u1".into(), symbol: "ACME".into() }).await.unwrap();
        recv(&mut a).await;
        cmd_tx.send(Command::Join { conn: "u2".into(), symbol: "ACME".into() }).await.unwrap();
        recv(&mut b).await;
        recv(&mut a).await;

        cmd_tx.send(Command::Tick { symbol: "ACME".into() }).await.unwrap();
        for c in [&mut a, &mut b] {
            match recv(c).await {
                ServerEvent::StockPriceUpdate(u) => {
                    assert_eq!(u.stock_name, "ACME");
                    assert_eq!(u.previous_price, 500);
                    assert!(u.current_price >= 1);
                }
                other => panic!("expected STOCK_PRICE_UPDATE, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn disconnect_discards_wallet_and_notifies_room() {
        let cmd_tx = start_hub(quiet_cfg()).await;
        let mut a = connect(&cmd_tx, "u1", "Sayan").await;
        let mut b = connect(&cmd_tx, "u2", "Priya").await;
        recv(&mut a).await;
        recv(&mut b).await;

        cmd_tx.send(Command::Join { conn: "u1".into(), symbol: "ACME".into() }).await.unwrap();
        recv(&mut a).await;
        cmd_tx.send(Command::Join { conn: "u2".into(), symbol: "ACME".into() }).await.unwrap();
        recv(&mut b).await;
        recv(&mut a).await;

        cmd_tx.send(Command::Disconnect { conn: "u2".into() }).await.unwrap();
        match recv(&mut a).await {
            ServerEvent::Notification { message, .. } => assert_eq!(message, "Priya left the room"),
            other => panic!("expected NOTIFICATION, got {other:?}"),
        }

        // HTTP path for a discarded identity is a validation failure
        let (tx, rx) = oneshot::channel();
        let order = TradeOrder { symbol: "ACME".into(), price: 100, quantity: 1, action: TradeAction::Buy };
        cmd_tx
            .send(Command::HttpTrade { user_id: "u2".into(), order, resp: tx })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap().unwrap_err(), TradeError::UnknownUser);
    }

    #[tokio::test]
    async fn idle_feed_stops_and_restarts_without_reseeding() {
        let cfg = FeedCfg { tick_ms: 100, base_price: 500, max_step: 500, stop_idle_feeds: true };
        let cmd_tx = start_hub(cfg).await;
        let mut a = connect(&cmd_tx, "u1", "Sayan").await;
        recv(&mut a).await; // USER_INFO

        cmd_tx.send(Command::Join { conn: "u1".into(), symbol: "ACME".into() }).await.unwrap();
        match recv(&mut a).await {
            ServerEvent::StockPrice { history, .. } => {
                assert_eq!(history.len(), crate::feed::SEED_POINTS);
            }
            other => panic!("expected STOCK_PRICE, got {other:?}"),
        }

        // ticker is live while the room has a member
        match recv(&mut a).await {
            ServerEvent::StockPriceUpdate(_) => {}
            other => panic!("expected STOCK_PRICE_UPDATE, got {other:?}"),
        }

        // last member leaves: the room is empty, the ticker is aborted
        cmd_tx.send(Command::Leave { conn: "u1".into() }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;
        while a.rx.try_recv().is_ok() {} // drop updates queued before the leave

        cmd_tx.send(Command::Join { conn: "u1".into(), symbol: "ACME".into() }).await.unwrap();
        match recv(&mut a).await {
            ServerEvent::StockPrice { history, .. } => {
                // history kept across the idle gap, no re-seed
                assert!(history.len() > crate::feed::SEED_POINTS, "history reset on re-join");
                // and it did not grow while the room was empty (a stopped
                // ticker adds nothing over 8 tick periods)
                assert!(
                    history.len() <= crate::feed::SEED_POINTS + 4,
                    "ticker kept running while the room was empty: {} points",
                    history.len()
                );
            }
            other => panic!("expected STOCK_PRICE, got {other:?}"),
        }

        // re-join restarts the feed for the new subscriber
        match recv(&mut a).await {
            ServerEvent::StockPriceUpdate(_) => {}
            other => panic!("expected STOCK_PRICE_UPDATE, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_trade_broadcasts_like_ws() {
        let cmd_tx = start_hub(quiet_cfg()).await;
        let mut a = connect(&cmd_tx, "u1", "Sayan").await;
        let mut b = connect(&cmd_tx, "u2", "Priya").await;
        recv(&mut a).await;
        recv(&mut b).await;

        cmd_tx.send(Command::Join { conn: "u1".into(), symbol: "ACME".into() }).await.unwrap();
        recv(&mut a).await;
        cmd_tx.send(Command::Join { conn: "u2".into(), symbol: "ACME".into() }).await.unwrap();
        recv(&mut b).await;
        recv(&mut a).await;

        let (tx, rx) = oneshot::channel();
        let order = TradeOrder { symbol: "ACME".into(), price: 50, quantity: 2, action: TradeAction::Buy };
        cmd_tx
            .send(Command::HttpTrade { user_id: "u1".into(), order, resp: tx })
            .await
            .unwrap();
        let out = rx.await.unwrap().unwrap();
        assert_eq!(out.transaction.status, TradeStatus::Passed);

        match recv(&mut b).await {
            ServerEvent::LiveTransaction { transaction } => assert_eq!(transaction.price, 50),
            other => panic!("expected LIVE_TRANSACTION, got {other:?}"),
        }
    }
}
