//! Re-quote suppression: keep a live order when the proposed replacement is
//! too close in price or the order has not rested long enough.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tokio::time::Instant;

use crate::types::{CachedOrder, Quote};

/// First-seen times by order id. Owned by the orchestrator; entries are
/// pruned whenever their id leaves the live set.
#[derive(Debug, Default)]
pub struct OrderAges {
    first_seen: HashMap<String, Instant>,
}

impl OrderAges {
    pub fn observe(&mut self, order_id: &str, now: Instant) {
        self.first_seen.entry(order_id.to_string()).or_insert(now);
    }

    pub fn age(&self, order_id: &str, now: Instant) -> Option<std::time::Duration> {
        self.first_seen
            .get(order_id)
            .map(|seen| now.duration_since(*seen))
    }

    /// Drop every id not in the live set.
    pub fn retain_live<'a>(&mut self, live: impl Iterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = live.collect();
        self.first_seen.retain(|id, _| keep.contains(id.as_str()));
    }
}

#[derive(Debug, Clone)]
pub struct RequoteGuard {
    threshold_bps: Decimal,
    min_order_age: std::time::Duration,
}

impl RequoteGuard {
    pub fn new(threshold_bps: Decimal, min_order_age: std::time::Duration) -> Self {
        Self {
            threshold_bps,
            min_order_age,
        }
    }

    /// For each proposed quote with a live same-side order, substitute the
    /// live order's price/size (a "keep") when the order is younger than the
    /// minimum age or the price moved no more than the threshold. The
    /// planner's exact diff then turns a keep into a no-op.
    pub fn filter(
        &self,
        quotes: Vec<Quote>,
        live: &[CachedOrder],
        ages: &OrderAges,
        now: Instant,
    ) -> Vec<Quote> {
        quotes
            .into_iter()
            .map(|quote| {
                let existing = match live.iter().find(|o| o.side == quote.side) {
                    Some(order) => order,
                    None => return quote,
                };

                let too_young = ages
                    .age(&existing.order_id, now)
                    .map(|age| age < self.min_order_age)
                    .unwrap_or(false);
                let within_threshold =
                    diff_bps(existing.price, quote.price) <= self.threshold_bps;

                if too_young || within_threshold {
                    Quote {
                        side: quote.side,
                        price: existing.price,
                        size: existing.size,
                    }
                } else {
                    quote
                }
            })
            .collect()
    }
}

/// Symmetric relative difference in basis points.
fn diff_bps(a: Decimal, b: Decimal) -> Decimal {
    let mean = (a.abs() + b.abs()) / Decimal::TWO;
    if mean.is_zero() {
        return Decimal::ZERO;
    }
    (a - b).abs() / mean * Decimal::from(10_000)
}
