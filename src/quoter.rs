//! Quote generation: symmetric half-spread around fair price, aligned to the
//! market's tick and lot, clamped so resting quotes never cross the book.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::position::QuotingContext;
use crate::types::{Quote, Side};

#[derive(Debug, Clone)]
pub struct Quoter {
    price_decimals: u32,
    size_decimals: u32,
    spread_bps: Decimal,
    take_profit_bps: Decimal,
    order_size_usd: Decimal,
}

impl Quoter {
    pub fn new(
        price_decimals: u32,
        size_decimals: u32,
        spread_bps: Decimal,
        take_profit_bps: Decimal,
        order_size_usd: Decimal,
    ) -> Self {
        Self {
            price_decimals,
            size_decimals,
            spread_bps,
            take_profit_bps,
            order_size_usd,
        }
    }

    /// One price increment of the market.
    pub fn tick(&self) -> Decimal {
        Decimal::new(1, self.price_decimals)
    }

    fn floor_tick(&self, price: Decimal) -> Decimal {
        price.round_dp_with_strategy(self.price_decimals, RoundingStrategy::ToNegativeInfinity)
    }

    fn ceil_tick(&self, price: Decimal) -> Decimal {
        price.round_dp_with_strategy(self.price_decimals, RoundingStrategy::ToPositiveInfinity)
    }

    fn align_lot(&self, size: Decimal) -> Decimal {
        size.round_dp_with_strategy(self.size_decimals, RoundingStrategy::ToZero)
    }

    /// Build at most one quote per allowed side.
    pub fn quotes(&self, ctx: &QuotingContext, bbo: Option<(Decimal, Decimal)>) -> Vec<Quote> {
        let fair = ctx.fair_price;
        let spread_bps = if ctx.position.is_close_mode {
            self.take_profit_bps
        } else {
            self.spread_bps
        };
        let spread = fair * spread_bps / Decimal::from(10_000);

        let size = if ctx.position.is_close_mode {
            self.align_lot(ctx.position.size_base.abs())
        } else {
            self.align_lot(self.order_size_usd / fair)
        };
        if size <= Decimal::ZERO {
            return Vec::new();
        }

        let mut quotes = Vec::with_capacity(2);

        if ctx.allows(Side::Bid) {
            let mut bid = self.floor_tick(fair - spread);
            if let Some((_, best_ask)) = bbo {
                if bid >= best_ask {
                    bid = self.floor_tick(best_ask - self.tick());
                }
            }
            if bid > Decimal::ZERO {
                quotes.push(Quote {
                    side: Side::Bid,
                    price: bid,
                    size,
                });
            }
        }

        if ctx.allows(Side::Ask) {
            let mut ask = self.ceil_tick(fair + spread);
            if let Some((best_bid, _)) = bbo {
                if ask <= best_bid {
                    ask = self.ceil_tick(best_bid + self.tick());
                }
            }
            if ask > Decimal::ZERO {
                quotes.push(Quote {
                    side: Side::Ask,
                    price: ask,
                    size,
                });
            }
        }

        quotes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PositionTracker;
    use rust_decimal_macros::dec;

    fn quoter() -> Quoter {
        // tick 0.01, lot 0.0001
        Quoter::new(2, 4, dec!(10), dec!(5), dec!(100))
    }

    fn normal_ctx(fair: Decimal) -> QuotingContext {
        PositionTracker::new(dec!(10)).quoting_context(fair)
    }

    #[test]
    fn two_sided_quotes_around_fair() {
        let quotes = quoter().quotes(&normal_ctx(dec!(100000)), None);
        assert_eq!(
            quotes,
            vec![
                Quote {
                    side: Side::Bid,
                    price: dec!(99900.00),
                    size: dec!(0.0010),
                },
                Quote {
                    side: Side::Ask,
                    price: dec!(100100.00),
                    size: dec!(0.0010),
                },
            ]
        );
    }

    #[test]
    fn alignment_floors_bid_and_ceils_ask() {
        // fair 33333.335, 10 bps spread -> raw bid 33300.00166..., raw ask
        // 33366.66833...; bid floors, ask ceils to the 0.01 tick.
        let quotes = quoter().quotes(&normal_ctx(dec!(33333.335)), None);
        assert_eq!(quotes[0].price, dec!(33300.00));
        assert_eq!(quotes[1].price, dec!(33366.67));
    }

    #[test]
    fn no_cross_clamp_applies_only_when_crossing() {
        // Wide book: no clamp needed.
        let quotes = quoter().quotes(&normal_ctx(dec!(100000)), Some((dec!(99950), dec!(99990))));
        assert_eq!(quotes[0].price, dec!(99900.00));
        assert_eq!(quotes[1].price, dec!(100100.00));

        // Tight ask: bid_raw 99900 >= best_ask 99895 -> one tick under.
        let quotes = quoter().quotes(&normal_ctx(dec!(100000)), Some((dec!(99800), dec!(99895))));
        assert_eq!(quotes[0].price, dec!(99894.99));
        assert_eq!(quotes[1].price, dec!(100100.00));
    }

    #[test]
    fn ask_clamps_above_best_bid() {
        // ask_raw 100100 <= best_bid 100200 -> one tick above.
        let quotes = quoter().quotes(&normal_ctx(dec!(100000)), Some((dec!(100200), dec!(100300))));
        assert_eq!(quotes[1].price, dec!(100200.01));
    }

    #[test]
    fn close_mode_quotes_reducing_side_at_take_profit() {
        let mut tracker = PositionTracker::new(dec!(10));
        tracker.apply_fill(Side::Bid, dec!(0.0002), dec!(0));
        let ctx = tracker.quoting_context(dec!(100000));

        let quotes = quoter().quotes(&ctx, None);
        assert_eq!(
            quotes,
            vec![Quote {
                side: Side::Ask,
                price: dec!(100050.00),
                size: dec!(0.0002),
            }]
        );
    }

    #[test]
    fn dust_size_yields_no_quotes() {
        // 100 USD at a fair of 2,000,000 is 0.00005 base, under one lot.
        let quotes = quoter().quotes(&normal_ctx(dec!(2000000)), None);
        assert!(quotes.is_empty());
    }

    #[test]
    fn clamped_to_non_positive_is_dropped() {
        // Best ask at one hundredth: the clamped bid lands at zero and is
        // dropped; the ask side still quotes.
        let quotes = quoter().quotes(&normal_ctx(dec!(0.02)), Some((dec!(0.005), dec!(0.01))));
        assert!(quotes.iter().all(|q| q.side == Side::Ask));
        assert!(quotes.iter().all(|q| q.price > Decimal::ZERO));
    }

    #[test]
    fn emitted_quotes_are_aligned_and_positive() {
        let q = quoter();
        for fair in [dec!(123.456789), dec!(98765.4321), dec!(0.0305)] {
            for quote in q.quotes(&normal_ctx(fair), None) {
                assert_eq!(quote.price, quote.price.round_dp(2));
                assert_eq!(quote.size, quote.size.round_dp(4));
                assert!(quote.price > Decimal::ZERO);
                assert!(quote.size > Decimal::ZERO);
            }
        }
    }
}
