//! Coinbase ticker-channel reference feed.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use super::ReferenceFeed;
use crate::types::{now_ms, MidPrice};

const WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";
const PING_EVERY: Duration = Duration::from_secs(30);
const PONG_WITHIN: Duration = Duration::from_secs(10);
const STALE_AFTER: Duration = Duration::from_secs(60);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

pub struct CoinbaseFeed {
    product_id: String,
    latest: Arc<RwLock<Option<MidPrice>>>,
    tx: UnboundedSender<MidPrice>,
    closing: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CoinbaseFeed {
    pub fn new(symbol: &str, tx: UnboundedSender<MidPrice>) -> Self {
        Self {
            product_id: format!("{}-USD", symbol.to_uppercase()),
            latest: Arc::new(RwLock::new(None)),
            tx,
            closing: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl ReferenceFeed for CoinbaseFeed {
    fn name(&self) -> &'static str {
        "coinbase"
    }

    fn connect(&self) {
        let product_id = self.product_id.clone();
        let latest = self.latest.clone();
        let tx = self.tx.clone();
        let closing = self.closing.clone();

        let handle = tokio::spawn(async move {
            while !closing.load(Ordering::Relaxed) {
                match run_connection(&product_id, &latest, &tx).await {
                    Ok(()) => info!("[COINBASE] connection closed, reconnecting"),
                    Err(e) => warn!("[COINBASE] connection error: {e:#}, reconnecting"),
                }
                if closing.load(Ordering::Relaxed) {
                    break;
                }
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    fn close(&self) {
        self.closing.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    async fn latest(&self) -> Option<MidPrice> {
        *self.latest.read().await
    }
}

async fn run_connection(
    product_id: &str,
    latest: &Arc<RwLock<Option<MidPrice>>>,
    tx: &UnboundedSender<MidPrice>,
) -> Result<()> {
    let (ws_stream, _) = connect_async(WS_URL).await?;
    let (mut write, mut read) = ws_stream.split();
    info!(product_id, "[COINBASE] connected");

    let sub = serde_json::json!({
        "type": "subscribe",
        "product_ids": [product_id],
        "channels": ["ticker"],
    });
    write.send(Message::Text(sub.to_string())).await?;

    let mut ping_timer = interval(PING_EVERY);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut pong_timer = interval(Duration::from_secs(1));
    let mut pong_deadline: Option<Instant> = None;
    let mut last_msg = Instant::now();

    loop {
        tokio::select! {
            _ = ping_timer.tick() => {
                if last_msg.elapsed() >= STALE_AFTER {
                    bail!("no message for {}s", STALE_AFTER.as_secs());
                }
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    bail!("ping send failed");
                }
                pong_deadline = Some(Instant::now() + PONG_WITHIN);
            }
            _ = pong_timer.tick() => {
                if let Some(deadline) = pong_deadline {
                    if Instant::now() >= deadline {
                        bail!("pong timeout");
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_msg = Instant::now();
                        if let Some(mid) = parse_ticker(&text) {
                            *latest.write().await = Some(mid);
                            let _ = tx.send(mid);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_msg = Instant::now();
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_msg = Instant::now();
                        pong_deadline = None;
                    }
                    Some(Ok(Message::Close(_))) => {
                        warn!("[COINBASE] server closed connection");
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

/// Ticker payload carries best bid/ask; `price` is the last-trade fallback
/// when the book fields are missing.
fn parse_ticker(text: &str) -> Option<MidPrice> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type").and_then(|t| t.as_str()) != Some("ticker") {
        return None;
    }
    let field = |name: &str| -> Option<Decimal> {
        Decimal::from_str(value.get(name)?.as_str()?).ok()
    };
    match (field("best_bid"), field("best_ask")) {
        (Some(bid), Some(ask)) => MidPrice::from_bbo(bid, ask, now_ms()),
        _ => {
            let last = field("price")?;
            MidPrice::from_bbo(last, last, now_ms())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ticker_parses_best_bid_ask() {
        let mid = parse_ticker(
            r#"{"type":"ticker","product_id":"BTC-USD","price":"100000.5","best_bid":"99999.00","best_ask":"100001.00"}"#,
        )
        .unwrap();
        assert_eq!(mid.mid, dec!(100000.00));
    }

    #[test]
    fn last_price_is_the_fallback() {
        let mid = parse_ticker(r#"{"type":"ticker","price":"100000.5"}"#).unwrap();
        assert_eq!(mid.mid, dec!(100000.5));
        assert_eq!(mid.best_bid, mid.best_ask);
    }

    #[test]
    fn non_ticker_messages_are_ignored() {
        assert!(parse_ticker(r#"{"type":"subscriptions","channels":[]}"#).is_none());
        assert!(parse_ticker("junk").is_none());
    }
}
