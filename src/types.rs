//! Core strategy types shared across the quoting pipeline.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Quote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

/// A mid-price observation with the top of book it was derived from.
///
/// `timestamp_ms` is stamped on receive, so it is monotone per source even
/// when the upstream venue delivers out of order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidPrice {
    pub mid: Decimal,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub timestamp_ms: u64,
}

impl MidPrice {
    pub fn from_bbo(best_bid: Decimal, best_ask: Decimal, timestamp_ms: u64) -> Option<Self> {
        if best_bid <= Decimal::ZERO || best_ask <= Decimal::ZERO {
            return None;
        }
        Some(Self {
            mid: (best_bid + best_ask) / Decimal::TWO,
            best_bid,
            best_ask,
            timestamp_ms,
        })
    }
}

/// A desired resting order: one per side, tick/lot aligned by the quoter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// Mirror of a live resting order on the venue. Identity is `order_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedOrder {
    pub order_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

impl CachedOrder {
    /// True when this order is an exact (side, price, size) match for the quote.
    pub fn matches(&self, quote: &Quote) -> bool {
        self.side == quote.side && self.price == quote.price && self.size == quote.size
    }
}

/// A fill delivered by the account stream, exactly once per fill.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub order_id: String,
    pub market_id: i64,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub remaining: Decimal,
}

/// Wall-clock milliseconds since the epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
