use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};

/// Which market feed drives the quoting snapshot. The trading venue's own
/// feed always runs; a secondary venue feed is spawned only when it is the
/// configured data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryFeed {
    Venue,
    Secondary,
}

/// Process configuration, loaded once at startup and read-only after.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub api_secret: String,
    pub symbol: String,
    pub category: String,
    pub rest_url: String,
    pub ws_public_url: String,
    pub ws_private_url: String,
    pub ws_secondary_url: String,
    pub primary_feed: PrimaryFeed,
    pub recv_window_ms: u64,
    pub tick_size: f64,
    pub lot_size: f64,
    pub qty_tolerance: f64,
    pub tick_interval: Duration,
    pub pending_timeout: Duration,
    pub base_spread_bps: f64,
    pub order_qty: f64,
    pub quote_levels: usize,
    pub inventory_limit: f64,
    pub log_path: String,
    pub log_max_bytes: u64,
    pub log_backups: usize,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow!("{key} is not a valid value: {raw}")),
        Err(_) => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("MMX_API_KEY").context("MMX_API_KEY is required")?;
        let api_secret = env::var("MMX_API_SECRET").context("MMX_API_SECRET is required")?;

        let primary_feed = match var_or("MMX_PRIMARY_FEED", "VENUE").to_uppercase().as_str() {
            "VENUE" => PrimaryFeed::Venue,
            "SECONDARY" => PrimaryFeed::Secondary,
            other => return Err(anyhow!("MMX_PRIMARY_FEED must be VENUE or SECONDARY, got {other}")),
        };

        let lot_size = parse_or("MMX_LOT_SIZE", 0.001)?;

        Ok(Self {
            api_key,
            api_secret,
            symbol: var_or("MMX_SYMBOL", "BTCUSDT"),
            category: var_or("MMX_CATEGORY", "linear"),
            rest_url: var_or("MMX_REST_URL", "https://api.bybit.com"),
            ws_public_url: var_or("MMX_WS_PUBLIC_URL", "wss://stream.bybit.com/v5/public/linear"),
            ws_private_url: var_or("MMX_WS_PRIVATE_URL", "wss://stream.bybit.com/v5/private"),
            ws_secondary_url: var_or("MMX_WS_SECONDARY_URL", ""),
            primary_feed,
            recv_window_ms: parse_or("MMX_RECV_WINDOW_MS", 5_000)?,
            tick_size: parse_or("MMX_TICK_SIZE", 0.1)?,
            lot_size,
            // Quantity drift below one lot is never worth an amend.
            qty_tolerance: parse_or("MMX_QTY_TOLERANCE", lot_size)?,
            tick_interval: Duration::from_millis(parse_or("MMX_TICK_INTERVAL_MS", 1_000)?),
            pending_timeout: Duration::from_millis(parse_or("MMX_PENDING_TIMEOUT_MS", 5_000)?),
            base_spread_bps: parse_or("MMX_BASE_SPREAD_BPS", 5.0)?,
            order_qty: parse_or("MMX_ORDER_QTY", 0.01)?,
            quote_levels: parse_or("MMX_QUOTE_LEVELS", 4)?,
            inventory_limit: parse_or("MMX_INVENTORY_LIMIT", 1.0)?,
            log_path: var_or("MMX_LOG_PATH", "mmx_events.log"),
            log_max_bytes: parse_or("MMX_LOG_MAX_BYTES", 10 * 1024 * 1024)?,
            log_backups: parse_or("MMX_LOG_BACKUPS", 5)?,
        })
    }

    pub fn secondary_required(&self) -> bool {
        self.primary_feed == PrimaryFeed::Secondary
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            api_key: "test-key".into(),
            api_secret: "test-secret".into(),
            symbol: "BTCUSDT".into(),
            category: "linear".into(),
            rest_url: String::new(),
            ws_public_url: String::new(),
            ws_private_url: String::new(),
            ws_secondary_url: String::new(),
            primary_feed: PrimaryFeed::Venue,
            recv_window_ms: 5_000,
            tick_size: 0.1,
            lot_size: 0.001,
            qty_tolerance: 0.001,
            tick_interval: Duration::from_secs(1),
            pending_timeout: Duration::from_secs(5),
            base_spread_bps: 5.0,
            order_qty: 0.01,
            quote_levels: 2,
            inventory_limit: 1.0,
            log_path: std::env::temp_dir()
                .join("mmx-test-events.log")
                .to_string_lossy()
                .into_owned(),
            log_max_bytes: 1 << 20,
            log_backups: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test so env mutation cannot race a parallel test run.
    #[test]
    fn test_from_env() {
        env::set_var("MMX_API_KEY", "k");
        env::set_var("MMX_API_SECRET", "s");
        env::set_var("MMX_TICK_SIZE", "0.5");
        env::remove_var("MMX_SYMBOL");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.symbol, "BTCUSDT");
        assert_eq!(settings.tick_size, 0.5);
        assert_eq!(settings.primary_feed, PrimaryFeed::Venue);
        assert!(!settings.secondary_required());
        // tolerance defaults to one lot
        assert_eq!(settings.qty_tolerance, settings.lot_size);

        env::set_var("MMX_PRIMARY_FEED", "BOGUS");
        assert!(Settings::from_env().is_err());
        env::set_var("MMX_PRIMARY_FEED", "SECONDARY");
        assert!(Settings::from_env().unwrap().secondary_required());
        env::remove_var("MMX_PRIMARY_FEED");
    }
}
