//! Environment-driven configuration.
//!
//! Every knob has a default except the market symbol and the signing key;
//! missing required keys fail startup with exit code 1.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;

/// Primary reference feed selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Binance,
    Coinbase,
    None,
}

impl FromStr for FeedKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(FeedKind::Binance),
            "coinbase" => Ok(FeedKind::Coinbase),
            "none" => Ok(FeedKind::None),
            other => anyhow::bail!("unknown reference feed {other:?} (binance|coinbase|none)"),
        }
    }
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Binance => "binance",
            FeedKind::Coinbase => "coinbase",
            FeedKind::None => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Market base symbol, e.g. "BTC" (matches "BTC-PERP" on the venue).
    pub symbol: String,
    pub reference_feed: FeedKind,
    pub enable_feed_failover: bool,
    /// Normal-mode half-spread in basis points.
    pub spread_bps: Decimal,
    /// Close-mode half-spread in basis points.
    pub take_profit_bps: Decimal,
    /// Keep an existing order when the new price is within this many bps.
    pub requote_threshold_bps: Decimal,
    pub min_order_age_ms: u64,
    pub order_size_usd: Decimal,
    pub close_threshold_usd: Decimal,
    /// Seconds of fair-price samples required before quoting.
    pub warmup_seconds: u64,
    pub update_throttle_ms: u64,
    pub order_sync_interval_ms: u64,
    pub position_sync_interval_ms: u64,
    pub status_interval_ms: u64,
    pub fair_price_window_ms: u64,
    pub api_url: String,
    pub ws_url: String,
    pub api_key: String,
    pub api_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            symbol: required_env("MM_SYMBOL")?,
            reference_feed: env::var("MM_REFERENCE_FEED")
                .unwrap_or_else(|_| "binance".into())
                .parse()?,
            enable_feed_failover: bool_env("MM_ENABLE_FEED_FAILOVER", true),
            spread_bps: decimal_env("MM_SPREAD_BPS", Decimal::from(10))?,
            take_profit_bps: decimal_env("MM_TAKE_PROFIT_BPS", Decimal::from(5))?,
            requote_threshold_bps: decimal_env("MM_REQUOTE_THRESHOLD_BPS", Decimal::from(3))?,
            min_order_age_ms: u64_env("MM_MIN_ORDER_AGE_MS", 10_000),
            order_size_usd: decimal_env("MM_ORDER_SIZE_USD", Decimal::from(100))?,
            close_threshold_usd: decimal_env("MM_CLOSE_THRESHOLD_USD", Decimal::from(10))?,
            warmup_seconds: u64_env("MM_WARMUP_SECONDS", 10),
            update_throttle_ms: u64_env("MM_UPDATE_THROTTLE_MS", 100),
            order_sync_interval_ms: u64_env("MM_ORDER_SYNC_INTERVAL_MS", 3_000),
            position_sync_interval_ms: u64_env("MM_POSITION_SYNC_INTERVAL_MS", 5_000),
            status_interval_ms: u64_env("MM_STATUS_INTERVAL_MS", 1_000),
            fair_price_window_ms: u64_env("MM_FAIR_PRICE_WINDOW_MS", 300_000),
            api_url: env::var("MM_API_URL")
                .unwrap_or_else(|_| "https://api.perp.exchange".into()),
            ws_url: env::var("MM_WS_URL").unwrap_or_else(|_| "wss://ws.perp.exchange/ws".into()),
            api_key: required_env("MM_API_KEY")?,
            api_secret: required_env("MM_API_SECRET")?,
        })
    }

    pub fn update_throttle(&self) -> Duration {
        Duration::from_millis(self.update_throttle_ms)
    }

    pub fn min_order_age(&self) -> Duration {
        Duration::from_millis(self.min_order_age_ms)
    }
}

fn required_env(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("set the {name} environment variable"))
}

fn decimal_env(name: &str, default: Decimal) -> Result<Decimal> {
    match env::var(name) {
        Ok(value) => {
            Decimal::from_str(&value).with_context(|| format!("{name} is not a decimal: {value}"))
        }
        Err(_) => Ok(default),
    }
}

fn u64_env(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn bool_env(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
