// ===============================
// src/feed.rs
// ===============================
//
// Synthetic price feed:
// - PriceState  : random-walk price + bounded history per symbol
// - run_ticker  : per-symbol timer task, sends Tick commands to the hub
//
// The ticker owns no state; all price mutation happens on the hub task so a
// join snapshot always sees a consistent price/history pair.
//

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::domain::{PricePoint, PriceUpdate};
use crate::hub::Command;

/// Bounded history length; oldest point evicted first.
pub const HISTORY_CAP: usize = 100;
/// Points synthesized before the first tick so a joiner gets chart context.
pub const SEED_POINTS: usize = 10;

#[derive(Debug, Clone)]
pub struct PriceState {
    pub base_price: i64,
    pub current_price: i64,
    pub history: VecDeque<PricePoint>,
}

impl PriceState {
    pub fn new(base_price: i64) -> Self {
        Self { base_price, current_price: base_price, history: VecDeque::with_capacity(HISTORY_CAP) }
    }

    /// Synthesize SEED_POINTS historical points at tick-interval spacing,
    /// each `base - 100 + uniform[0, 200)`. No-op when history exists.
    pub fn seed_history(&mut self, now: DateTime<Utc>, tick_ms: u64) {
        if !self.history.is_empty() {
            return;
        }
        let step = ChronoDuration::milliseconds(tick_ms as i64);
        for i in 0..SEED_POINTS {
            // don't hold ThreadRng across .await in callers; draw per point
            let jitter = rand::thread_rng().gen_range(0..200);
            let ts = now - step * (SEED_POINTS - i) as i32;
            self.history.push_back(PricePoint {
                price: self.base_price - 100 + jitter,
                timestamp: ts.to_rfc3339(),
            });
        }
    }

    /// Apply one tick with the drawn `change`. New price floors at 1, never
    /// non-positive, so the percent change below cannot divide by zero.
    pub fn apply_tick(&mut self, symbol: &str, change: i64, now: DateTime<Utc>) -> PriceUpdate {
        let previous = self.current_price;
        let current = (previous + change).max(1);
        self.current_price = current;

        self.history.push_back(PricePoint { price: current, timestamp: now.to_rfc3339() });
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }

        PriceUpdate {
            stock_name: symbol.to_string(),
            previous_price: previous,
            current_price: current,
            change,
            percent_change: (current - previous) as f64 / previous as f64 * 100.0,
            timestamp: now.to_rfc3339(),
        }
    }
}

/// Draw a uniformly distributed tick change in [-max_step, max_step].
pub fn draw_change(max_step: i64) -> i64 {
    rand::thread_rng().gen_range(-max_step..=max_step)
}

/// Timer task for one symbol. Ends when the hub goes away (channel closed)
/// or when the hub aborts the handle.
pub async fn run_ticker(symbol: String, cmd_tx: mpsc::Sender<Command>, tick_ms: u64) {
    loop {
        sleep(Duration::from_millis(tick_ms)).await;
        if cmd_tx.send(Command::Tick { symbol: symbol.clone() }).await.is_err() {
            break;
        }
    }
}
