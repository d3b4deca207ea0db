//! Atomic order planning: minimal cancel/place diff between live orders and
//! desired quotes, submitted in bounded atomic batches.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::exchange::rest::RestClient;
use crate::exchange::types::{OrderAction, MAX_ATOMIC_ACTIONS};
use crate::types::{CachedOrder, Quote};

/// Result of diffing live orders against target quotes.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDiff {
    pub kept: Vec<CachedOrder>,
    pub cancels: Vec<CachedOrder>,
    pub places: Vec<Quote>,
}

impl OrderDiff {
    pub fn is_empty(&self) -> bool {
        self.cancels.is_empty() && self.places.is_empty()
    }
}

/// Exact-match diff: a live order survives only as a full
/// (side, price, size) match of some target; everything else is cancelled
/// and every unmatched target is placed.
pub fn diff(live: &[CachedOrder], targets: &[Quote]) -> OrderDiff {
    let mut kept: Vec<CachedOrder> = Vec::new();
    let mut places: Vec<Quote> = Vec::new();

    for quote in targets {
        let matched = live.iter().find(|order| {
            order.matches(quote) && !kept.iter().any(|k| k.order_id == order.order_id)
        });
        match matched {
            Some(order) => kept.push(order.clone()),
            None => places.push(quote.clone()),
        }
    }

    let cancels = live
        .iter()
        .filter(|order| !kept.iter().any(|k| k.order_id == order.order_id))
        .cloned()
        .collect();

    OrderDiff {
        kept,
        cancels,
        places,
    }
}

pub struct OrderPlanner {
    rest: Arc<RestClient>,
    market_id: i64,
}

impl OrderPlanner {
    pub fn new(rest: Arc<RestClient>, market_id: i64) -> Self {
        Self { rest, market_id }
    }

    /// Reconcile live orders to the target quotes and return the new cached
    /// set (kept orders plus successful placements). Cancels go first in the
    /// action sequence so capacity is freed before it is consumed; chunks of
    /// at most [`MAX_ATOMIC_ACTIONS`] are submitted strictly sequentially.
    pub async fn reconcile(
        &self,
        live: Vec<CachedOrder>,
        targets: &[Quote],
    ) -> Result<Vec<CachedOrder>> {
        let plan = diff(&live, targets);
        if plan.is_empty() {
            return Ok(live);
        }

        info!(
            kept = plan.kept.len(),
            cancels = plan.cancels.len(),
            places = plan.places.len(),
            "[PLAN] reconciling orders"
        );

        let mut actions: Vec<OrderAction> = Vec::with_capacity(plan.cancels.len() + plan.places.len());
        for order in &plan.cancels {
            actions.push(OrderAction::Cancel {
                order_id: order.order_id.clone(),
            });
        }
        for quote in &plan.places {
            actions.push(OrderAction::Place {
                market_id: self.market_id,
                side: quote.side,
                price: quote.price,
                size: quote.size,
                post_only: true,
            });
        }

        let mut cached = plan.kept;
        for chunk in actions.chunks(MAX_ATOMIC_ACTIONS) {
            let response = self.rest.submit_atomic(chunk).await?;
            cached.extend(collect_placements(chunk, &response.results));
        }
        Ok(cached)
    }

    /// Cancel every live order, in bounded batches.
    pub async fn cancel_all(&self, live: &[CachedOrder]) -> Result<()> {
        if live.is_empty() {
            return Ok(());
        }
        let actions: Vec<OrderAction> = live
            .iter()
            .map(|order| OrderAction::Cancel {
                order_id: order.order_id.clone(),
            })
            .collect();
        info!(count = actions.len(), "[PLAN] cancel-all");
        for chunk in actions.chunks(MAX_ATOMIC_ACTIONS) {
            self.rest.submit_atomic(chunk).await?;
        }
        Ok(())
    }
}

/// Pair one chunk's per-action results (in submission order) with its place
/// actions and build the cached entries for successful placements.
fn collect_placements(
    chunk: &[OrderAction],
    results: &[crate::exchange::types::ActionResult],
) -> Vec<CachedOrder> {
    let mut placed = Vec::new();
    for (action, result) in chunk.iter().zip(results.iter()) {
        match action {
            OrderAction::Place {
                side, price, size, ..
            } => {
                if !result.ok {
                    warn!(
                        side = side.as_str(),
                        price = %price,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "[PLAN] place rejected"
                    );
                    continue;
                }
                match result.order_id.as_ref() {
                    Some(order_id) => placed.push(CachedOrder {
                        order_id: order_id.clone(),
                        side: *side,
                        price: *price,
                        size: *size,
                    }),
                    None => warn!(
                        side = side.as_str(),
                        price = %price,
                        "[PLAN] place succeeded without an order id"
                    ),
                }
            }
            OrderAction::Cancel { order_id } => {
                if !result.ok {
                    warn!(
                        order_id = %order_id,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "[PLAN] cancel rejected"
                    );
                }
            }
        }
    }
    placed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::ActionResult;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn order(id: &str, side: Side, price: &str, size: &str) -> CachedOrder {
        CachedOrder {
            order_id: id.into(),
            side,
            price: price.parse().unwrap(),
            size: size.parse().unwrap(),
        }
    }

    fn quote(side: Side, price: &str, size: &str) -> Quote {
        Quote {
            side,
            price: price.parse().unwrap(),
            size: size.parse().unwrap(),
        }
    }

    #[test]
    fn identical_sets_diff_to_nothing() {
        let live = vec![
            order("b1", Side::Bid, "99900.00", "0.0010"),
            order("a1", Side::Ask, "100100.00", "0.0010"),
        ];
        let targets = vec![
            quote(Side::Bid, "99900.00", "0.0010"),
            quote(Side::Ask, "100100.00", "0.0010"),
        ];
        let plan = diff(&live, &targets);
        assert!(plan.is_empty());
        assert_eq!(plan.kept.len(), 2);
    }

    #[test]
    fn price_move_cancels_and_places() {
        let live = vec![
            order("b1", Side::Bid, "99900.00", "0.0010"),
            order("a1", Side::Ask, "100100.00", "0.0010"),
        ];
        let targets = vec![
            quote(Side::Bid, "99910.00", "0.0010"),
            quote(Side::Ask, "100100.00", "0.0010"),
        ];
        let plan = diff(&live, &targets);
        assert_eq!(plan.kept.len(), 1);
        assert_eq!(plan.kept[0].order_id, "a1");
        assert_eq!(plan.cancels.len(), 1);
        assert_eq!(plan.cancels[0].order_id, "b1");
        assert_eq!(plan.places.len(), 1);
        assert_eq!(plan.places[0].price, dec!(99910.00));
    }

    #[test]
    fn size_change_is_a_replacement() {
        let live = vec![order("b1", Side::Bid, "99900.00", "0.0010")];
        let targets = vec![quote(Side::Bid, "99900.00", "0.0020")];
        let plan = diff(&live, &targets);
        assert!(plan.kept.is_empty());
        assert_eq!(plan.cancels.len(), 1);
        assert_eq!(plan.places.len(), 1);
    }

    #[test]
    fn stray_orders_are_cancelled() {
        let live = vec![
            order("b1", Side::Bid, "99900.00", "0.0010"),
            order("b2", Side::Bid, "99800.00", "0.0010"),
        ];
        let targets = vec![quote(Side::Bid, "99900.00", "0.0010")];
        let plan = diff(&live, &targets);
        assert_eq!(plan.kept.len(), 1);
        assert_eq!(plan.cancels.len(), 1);
        assert_eq!(plan.cancels[0].order_id, "b2");
    }

    #[test]
    fn duplicate_live_orders_keep_only_one() {
        let live = vec![
            order("b1", Side::Bid, "99900.00", "0.0010"),
            order("b2", Side::Bid, "99900.00", "0.0010"),
        ];
        let targets = vec![quote(Side::Bid, "99900.00", "0.0010")];
        let plan = diff(&live, &targets);
        assert_eq!(plan.kept.len(), 1);
        assert_eq!(plan.cancels.len(), 1);
    }

    #[test]
    fn empty_targets_cancel_everything() {
        let live = vec![
            order("b1", Side::Bid, "99900.00", "0.0010"),
            order("a1", Side::Ask, "100100.00", "0.0010"),
        ];
        let plan = diff(&live, &[]);
        assert!(plan.kept.is_empty());
        assert_eq!(plan.cancels.len(), 2);
        assert!(plan.places.is_empty());
    }

    #[test]
    fn cancels_precede_places_across_chunks() {
        // Five cancels and three places: the action sequence must be all
        // cancels, then all places, split 4 + 4.
        let cancels: Vec<OrderAction> = (0..5)
            .map(|i| OrderAction::Cancel {
                order_id: format!("c{i}"),
            })
            .collect();
        let places: Vec<OrderAction> = (0..3)
            .map(|_| OrderAction::Place {
                market_id: 1,
                side: Side::Bid,
                price: dec!(99900),
                size: dec!(0.001),
                post_only: true,
            })
            .collect();
        let actions: Vec<OrderAction> = cancels.iter().chain(places.iter()).cloned().collect();

        let chunks: Vec<&[OrderAction]> = actions.chunks(MAX_ATOMIC_ACTIONS).collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].iter().all(|a| !a.is_place()));
        assert_eq!(chunks[1].iter().filter(|a| a.is_place()).count(), 3);

        // Order is preserved: no place ever precedes a cancel.
        let first_place = actions.iter().position(|a| a.is_place()).unwrap();
        assert!(actions[..first_place].iter().all(|a| !a.is_place()));
    }

    fn ok_place(order_id: &str) -> ActionResult {
        ActionResult {
            ok: true,
            order_id: Some(order_id.into()),
            error: None,
        }
    }

    fn ok_cancel() -> ActionResult {
        ActionResult {
            ok: true,
            order_id: None,
            error: None,
        }
    }

    #[test]
    fn successful_places_grow_the_cached_set_by_exactly_that_many() {
        let chunk = vec![
            OrderAction::Cancel {
                order_id: "c1".into(),
            },
            OrderAction::Place {
                market_id: 1,
                side: Side::Bid,
                price: dec!(99900.00),
                size: dec!(0.0010),
                post_only: true,
            },
            OrderAction::Place {
                market_id: 1,
                side: Side::Ask,
                price: dec!(100100.00),
                size: dec!(0.0010),
                post_only: true,
            },
        ];
        let results = vec![ok_cancel(), ok_place("n1"), ok_place("n2")];

        let placed = collect_placements(&chunk, &results);
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].order_id, "n1");
        assert_eq!(placed[0].side, Side::Bid);
        assert_eq!(placed[1].order_id, "n2");
        assert_eq!(placed[1].side, Side::Ask);
        // Ids are unique and attributed in order.
        assert_ne!(placed[0].order_id, placed[1].order_id);
    }

    #[test]
    fn rejected_place_is_not_cached() {
        let chunk = vec![OrderAction::Place {
            market_id: 1,
            side: Side::Bid,
            price: dec!(99900.00),
            size: dec!(0.0010),
            post_only: true,
        }];
        let results = vec![ActionResult {
            ok: false,
            order_id: None,
            error: Some("post-only would cross".into()),
        }];
        assert!(collect_placements(&chunk, &results).is_empty());
    }
}
