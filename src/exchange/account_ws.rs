//! Authenticated account stream: placements, fills, and cancels.
//!
//! Maintains a mirror of the account's resting orders and forwards each fill
//! to the orchestrator exactly once. On reconnect the mirror is reseeded
//! from a fresh user snapshot before resubscribing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::rest::RestClient;
use super::types::{AccountDelta, UserInfo};
use crate::types::{FillEvent, Side};

const PING_EVERY: Duration = Duration::from_secs(30);
const STALE_AFTER: Duration = Duration::from_secs(60);
const STALE_CHECK_EVERY: Duration = Duration::from_secs(10);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

/// A resting order as seen by the account stream; `size` is the remaining
/// quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOrder {
    pub order_id: String,
    pub market_id: i64,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// Pure mirror of tracked orders; the socket task drives it.
#[derive(Debug, Default)]
pub struct OrderMirror {
    orders: HashMap<String, TrackedOrder>,
}

impl OrderMirror {
    /// Reseed from an authoritative snapshot.
    pub fn sync(&mut self, user: &UserInfo) {
        self.orders = user
            .orders
            .iter()
            .map(|o| {
                (
                    o.order_id.clone(),
                    TrackedOrder {
                        order_id: o.order_id.clone(),
                        market_id: o.market_id,
                        side: o.side,
                        price: o.price,
                        size: o.remaining,
                    },
                )
            })
            .collect();
    }

    /// Apply one push: places insert, fills shrink or delete, cancels
    /// delete. Returns the fills to deliver, one event per fill.
    pub fn on_delta(&mut self, delta: AccountDelta) -> Vec<FillEvent> {
        for placed in delta.places {
            self.orders.insert(
                placed.order_id.clone(),
                TrackedOrder {
                    order_id: placed.order_id.clone(),
                    market_id: placed.market_id,
                    side: placed.side,
                    price: placed.price,
                    size: placed.remaining,
                },
            );
        }

        let mut events = Vec::new();
        for (order_id, fill) in delta.fills {
            if fill.quantity <= Decimal::ZERO {
                continue;
            }
            if fill.remaining <= Decimal::ZERO {
                self.orders.remove(&order_id);
            } else if let Some(order) = self.orders.get_mut(&order_id) {
                order.size = fill.remaining;
            }
            events.push(FillEvent {
                order_id,
                market_id: fill.market_id,
                side: fill.side,
                size: fill.quantity,
                price: fill.price,
                remaining: fill.remaining,
            });
        }

        for order_id in delta.cancels {
            self.orders.remove(&order_id);
        }

        events
    }

    pub fn orders_for_market(&self, market_id: i64) -> Vec<TrackedOrder> {
        self.orders
            .values()
            .filter(|o| o.market_id == market_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

pub struct AccountStream {
    ws_url: String,
    rest: Arc<RestClient>,
    mirror: Arc<RwLock<OrderMirror>>,
    fill_tx: UnboundedSender<FillEvent>,
    closing: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AccountStream {
    pub fn new(ws_url: String, rest: Arc<RestClient>, fill_tx: UnboundedSender<FillEvent>) -> Self {
        Self {
            ws_url,
            rest,
            mirror: Arc::new(RwLock::new(OrderMirror::default())),
            fill_tx,
            closing: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
        }
    }

    /// Reseed the mirror from a snapshot the caller already fetched.
    pub async fn sync_orders(&self, user: &UserInfo) {
        self.mirror.write().await.sync(user);
    }

    pub async fn orders_for_market(&self, market_id: i64) -> Vec<TrackedOrder> {
        self.mirror.read().await.orders_for_market(market_id)
    }

    pub fn connect(&self) {
        let ws_url = self.ws_url.clone();
        let rest = self.rest.clone();
        let mirror = self.mirror.clone();
        let fill_tx = self.fill_tx.clone();
        let closing = self.closing.clone();

        let handle = tokio::spawn(async move {
            while !closing.load(Ordering::Relaxed) {
                // Reseed before every (re)subscribe so fills missed while
                // disconnected are reflected in the mirror.
                match rest.user_info_shared().await {
                    Ok(user) => mirror.write().await.sync(&user),
                    Err(e) => warn!("[ACCOUNT] snapshot reseed failed: {e:#}"),
                }

                match run_connection(&ws_url, &rest, &mirror, &fill_tx).await {
                    Ok(()) => info!("[ACCOUNT] connection closed, reconnecting"),
                    Err(e) => warn!("[ACCOUNT] connection error: {e:#}, reconnecting"),
                }
                if closing.load(Ordering::Relaxed) {
                    break;
                }
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    pub fn close(&self) {
        self.closing.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

async fn run_connection(
    ws_url: &str,
    rest: &Arc<RestClient>,
    mirror: &Arc<RwLock<OrderMirror>>,
    fill_tx: &UnboundedSender<FillEvent>,
) -> Result<()> {
    let token = rest.ws_token().await?;
    let url = format!("{ws_url}?token={}", token.token);

    let (ws_stream, _) = connect_async(&url).await?;
    let (mut write, mut read) = ws_stream.split();
    info!("[ACCOUNT] connected");

    let sub = serde_json::json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "type": "subscribe",
        "topic": "account",
    });
    write.send(Message::Text(sub.to_string())).await?;

    let mut ping_timer = interval(PING_EVERY);
    let mut stale_timer = interval(STALE_CHECK_EVERY);
    let mut last_msg = Instant::now();

    loop {
        tokio::select! {
            _ = ping_timer.tick() => {
                let ping = serde_json::json!({"id": uuid::Uuid::new_v4().to_string(), "type": "ping"});
                if write.send(Message::Text(ping.to_string())).await.is_err() {
                    bail!("ping send failed");
                }
            }
            _ = stale_timer.tick() => {
                if last_msg.elapsed() >= STALE_AFTER {
                    bail!("no message for {}s, reconnecting", STALE_AFTER.as_secs());
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_msg = Instant::now();
                        if let Some(delta) = parse_account_delta(&text) {
                            let events = mirror.write().await.on_delta(delta);
                            for event in events {
                                debug!(
                                    order_id = %event.order_id,
                                    side = event.side.as_str(),
                                    size = %event.size,
                                    price = %event.price,
                                    "[FILL]"
                                );
                                let _ = fill_tx.send(event);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_msg = Instant::now();
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_msg = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        warn!("[ACCOUNT] server closed connection");
                        return Ok(());
                    }
                    Some(Err(e)) => bail!("websocket error: {e}"),
                    None => return Ok(()),
                    _ => {}
                }
            }
        }
    }
}

/// Parse errors are dropped, never fatal.
fn parse_account_delta(text: &str) -> Option<AccountDelta> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type").and_then(|t| t.as_str()) != Some("message") {
        return None;
    }
    serde_json::from_value(value.get("data")?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::{FillInfo, OpenOrder};
    use rust_decimal_macros::dec;

    fn open_order(order_id: &str, side: Side, price: Decimal, remaining: Decimal) -> OpenOrder {
        OpenOrder {
            order_id: order_id.into(),
            market_id: 1,
            side,
            price,
            size: remaining,
            remaining,
        }
    }

    fn fill(side: Side, quantity: Decimal, remaining: Decimal) -> FillInfo {
        FillInfo {
            market_id: 1,
            side,
            quantity,
            price: dec!(100000),
            remaining,
        }
    }

    #[test]
    fn placements_are_tracked() {
        let mut mirror = OrderMirror::default();
        let events = mirror.on_delta(AccountDelta {
            places: vec![open_order("o1", Side::Bid, dec!(99900), dec!(0.0010))],
            fills: HashMap::new(),
            cancels: Vec::new(),
        });
        assert!(events.is_empty());
        assert_eq!(mirror.orders_for_market(1).len(), 1);
    }

    #[test]
    fn partial_fill_updates_remaining() {
        let mut mirror = OrderMirror::default();
        mirror.on_delta(AccountDelta {
            places: vec![open_order("o1", Side::Bid, dec!(99900), dec!(0.0010))],
            fills: HashMap::new(),
            cancels: Vec::new(),
        });

        let mut fills = HashMap::new();
        fills.insert("o1".to_string(), fill(Side::Bid, dec!(0.0004), dec!(0.0006)));
        let events = mirror.on_delta(AccountDelta {
            places: Vec::new(),
            fills,
            cancels: Vec::new(),
        });

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].size, dec!(0.0004));
        let orders = mirror.orders_for_market(1);
        assert_eq!(orders[0].size, dec!(0.0006));
    }

    #[test]
    fn full_fill_deletes_the_order() {
        let mut mirror = OrderMirror::default();
        mirror.on_delta(AccountDelta {
            places: vec![open_order("o1", Side::Ask, dec!(100100), dec!(0.0010))],
            fills: HashMap::new(),
            cancels: Vec::new(),
        });

        let mut fills = HashMap::new();
        fills.insert("o1".to_string(), fill(Side::Ask, dec!(0.0010), dec!(0)));
        let events = mirror.on_delta(AccountDelta {
            places: Vec::new(),
            fills,
            cancels: Vec::new(),
        });

        assert_eq!(events.len(), 1);
        assert!(mirror.is_empty());
    }

    #[test]
    fn zero_quantity_fill_is_not_delivered() {
        let mut mirror = OrderMirror::default();
        let mut fills = HashMap::new();
        fills.insert("o1".to_string(), fill(Side::Bid, dec!(0), dec!(0.0010)));
        let events = mirror.on_delta(AccountDelta {
            places: Vec::new(),
            fills,
            cancels: Vec::new(),
        });
        assert!(events.is_empty());
    }

    #[test]
    fn cancel_deletes_the_order() {
        let mut mirror = OrderMirror::default();
        mirror.on_delta(AccountDelta {
            places: vec![open_order("o1", Side::Bid, dec!(99900), dec!(0.0010))],
            fills: HashMap::new(),
            cancels: Vec::new(),
        });
        mirror.on_delta(AccountDelta {
            places: Vec::new(),
            fills: HashMap::new(),
            cancels: vec!["o1".into()],
        });
        assert!(mirror.is_empty());
    }

    #[test]
    fn sync_replaces_the_mirror() {
        let mut mirror = OrderMirror::default();
        mirror.on_delta(AccountDelta {
            places: vec![open_order("stale", Side::Bid, dec!(1), dec!(1))],
            fills: HashMap::new(),
            cancels: Vec::new(),
        });

        let user = UserInfo {
            account_id: "a1".into(),
            orders: vec![
                open_order("o1", Side::Bid, dec!(99900), dec!(0.0010)),
                OpenOrder {
                    market_id: 2,
                    ..open_order("other-market", Side::Ask, dec!(5), dec!(1))
                },
            ],
            positions: Vec::new(),
        };
        mirror.sync(&user);

        assert_eq!(mirror.len(), 2);
        let market_one = mirror.orders_for_market(1);
        assert_eq!(market_one.len(), 1);
        assert_eq!(market_one[0].order_id, "o1");
    }
}
