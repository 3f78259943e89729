// ===============================
// src/config.rs
// ===============================
use dotenvy::dotenv;
use std::env;

#[derive(Clone, Debug)]
pub struct Args {
    pub ws_port: u16,
    pub api_port: u16,
    pub metrics_port: u16,
}

/// Knobs for the synthetic price feed.
#[derive(Clone, Debug)]
pub struct FeedCfg {
    /// Tick interval in milliseconds.
    pub tick_ms: u64,
    /// Base price for a symbol started the first time.
    pub base_price: i64,
    /// Symmetric bound for the per-tick random change: [-max_step, max_step].
    pub max_step: i64,
    /// Stop a symbol's ticker once its room is empty. Off by default so a
    /// re-joined chart keeps its continuity.
    pub stop_idle_feeds: bool,
}

impl Default for FeedCfg {
    fn default() -> Self {
        Self { tick_ms: 5_000, base_price: 500, max_step: 500, stop_idle_feeds: false }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    matches!(
        env::var(key).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn load() -> (Args, FeedCfg) {
    // Read .env so WS_PORT, TICK_MS, etc. are picked up
    let _ = dotenv();

    let args = Args {
        ws_port: env_parse("WS_PORT", 8080),
        api_port: env_parse("API_PORT", 8081),
        metrics_port: env_parse("METRICS_PORT", 9898),
    };

    let dflt = FeedCfg::default();
    let feed = FeedCfg {
        tick_ms: env_parse("TICK_MS", dflt.tick_ms),
        base_price: env_parse("BASE_PRICE", dflt.base_price).max(1),
        max_step: env_parse("MAX_STEP", dflt.max_step).max(1),
        stop_idle_feeds: env_flag("STOP_IDLE_FEEDS"),
    };

    (args, feed)
}
