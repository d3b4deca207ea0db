//! Position tracking: optimistic fill deltas corrected by authoritative
//! server reconciles.

use rust_decimal::Decimal;
use tracing::warn;

use crate::types::Side;

/// Drift beyond this many base units (0.0001) snaps local state to the server.
fn drift_tolerance() -> Decimal {
    Decimal::new(1, 4)
}

/// Snapshot of the position at a given fair price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionState {
    pub size_base: Decimal,
    pub size_usd: Decimal,
    pub is_long: bool,
    pub is_close_mode: bool,
}

/// Inputs the quoter needs for one update cycle.
#[derive(Debug, Clone, Copy)]
pub struct QuotingContext {
    pub fair_price: Decimal,
    pub position: PositionState,
    pub allow_bid: bool,
    pub allow_ask: bool,
}

impl QuotingContext {
    pub fn allows(&self, side: Side) -> bool {
        match side {
            Side::Bid => self.allow_bid,
            Side::Ask => self.allow_ask,
        }
    }
}

/// Single-writer holder of the canonical base position.
#[derive(Debug)]
pub struct PositionTracker {
    base_size: Decimal,
    close_threshold_usd: Decimal,
}

impl PositionTracker {
    pub fn new(close_threshold_usd: Decimal) -> Self {
        Self {
            base_size: Decimal::ZERO,
            close_threshold_usd,
        }
    }

    pub fn base_size(&self) -> Decimal {
        self.base_size
    }

    /// Optimistic update from a fill. The fill price is informational only;
    /// cost basis is not tracked.
    pub fn apply_fill(&mut self, side: Side, size: Decimal, _price: Decimal) {
        match side {
            Side::Bid => self.base_size += size,
            Side::Ask => self.base_size -= size,
        }
    }

    /// Snap to the authoritative server position when drift exceeds the
    /// tolerance. Returns true when a snap occurred.
    pub fn reconcile(&mut self, server_size: Decimal) -> bool {
        let drift = (self.base_size - server_size).abs();
        if drift > drift_tolerance() {
            warn!(
                local = %self.base_size,
                server = %server_size,
                drift = %drift,
                "[POSITION] drift detected, snapping to server"
            );
            self.base_size = server_size;
            true
        } else {
            false
        }
    }

    pub fn state(&self, fair_price: Decimal) -> PositionState {
        let size_usd = self.base_size * fair_price;
        PositionState {
            size_base: self.base_size,
            size_usd,
            is_long: self.base_size > Decimal::ZERO,
            is_close_mode: size_usd.abs() >= self.close_threshold_usd,
        }
    }

    pub fn is_close_mode(&self, fair_price: Decimal) -> bool {
        self.state(fair_price).is_close_mode
    }

    /// Close mode restricts quoting to the reducing side.
    pub fn quoting_context(&self, fair_price: Decimal) -> QuotingContext {
        let position = self.state(fair_price);
        let (allow_bid, allow_ask) = if position.is_close_mode {
            if position.is_long {
                (false, true)
            } else {
                (true, false)
            }
        } else {
            (true, true)
        };
        QuotingContext {
            fair_price,
            position,
            allow_bid,
            allow_ask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fills_move_the_base_size() {
        let mut tracker = PositionTracker::new(dec!(10));
        tracker.apply_fill(Side::Bid, dec!(0.5), dec!(100));
        tracker.apply_fill(Side::Ask, dec!(0.2), dec!(101));
        assert_eq!(tracker.base_size(), dec!(0.3));
    }

    #[test]
    fn close_mode_at_exact_threshold() {
        let mut tracker = PositionTracker::new(dec!(10));
        tracker.apply_fill(Side::Bid, dec!(0.0001), dec!(0));
        // 0.0001 * 100000 = 10 USD, exactly at the threshold.
        assert!(tracker.is_close_mode(dec!(100000)));
        assert!(!tracker.is_close_mode(dec!(99999)));
    }

    #[test]
    fn close_mode_restricts_to_reducing_side() {
        let mut long = PositionTracker::new(dec!(10));
        long.apply_fill(Side::Bid, dec!(0.0002), dec!(0));
        let ctx = long.quoting_context(dec!(100000));
        assert!(!ctx.allow_bid);
        assert!(ctx.allow_ask);

        let mut short = PositionTracker::new(dec!(10));
        short.apply_fill(Side::Ask, dec!(0.0002), dec!(0));
        let ctx = short.quoting_context(dec!(100000));
        assert!(ctx.allow_bid);
        assert!(!ctx.allow_ask);
    }

    #[test]
    fn normal_mode_allows_both_sides() {
        let tracker = PositionTracker::new(dec!(10));
        let ctx = tracker.quoting_context(dec!(100000));
        assert!(ctx.allow_bid && ctx.allow_ask);
        assert!(!ctx.position.is_close_mode);
    }

    #[test]
    fn reconcile_snaps_only_past_tolerance() {
        let mut tracker = PositionTracker::new(dec!(10));
        tracker.apply_fill(Side::Bid, dec!(1.0), dec!(0));

        assert!(!tracker.reconcile(dec!(1.00005)));
        assert_eq!(tracker.base_size(), dec!(1.0));

        assert!(tracker.reconcile(dec!(0.8)));
        assert_eq!(tracker.base_size(), dec!(0.8));
    }
}
