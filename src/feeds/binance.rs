//! Binance book-ticker reference feed.

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

const PING_EVERY: Duration = Duration::from_secs(30);
const PONG_WITHIN: Duration = Duration::from_secs(10);
const STALE_AFTER: Duration = Duration::from_secs(60);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

pub struct BinanceFeed {
    url: String,
    latest: Arc<RwLock<Option<MidPrice>>>,
    tx: UnboundedSender<MidPrice>,
    closing: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BinanceFeed {
    pub fn new(symbol: &str, tx: UnboundedSender<MidPrice>) -> Self {
        let stream = format!("{}usdt@bookTicker", symbol.to_lowercase());
        Self {
            url: format!("wss://stream.binance.com:9443/ws/{stream}"),
            latest: Arc::new(RwLock::new(None)),
            tx,
            closing: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl ReferenceFeed for BinanceFeed {
    fn name(&self) -> &'static str {
        "binance"
    }

    fn connect(&self) {
        let url = self.url.clone();
        let latest = self.latest.clone();
        let tx = self.tx.clone();
        let closing = self.closing.clone();

        let handle = tokio::spawn(async move {
            while !closing.load(Ordering::Relaxed) {
                match run_connection(&url, &latest, &tx).await {
                    Ok(()) => info!("[BINANCE] connection closed, reconnecting"),
                    Err(e) => warn!("[BINANCE] connection error: {e:#}, reconnecting"),
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
    url: &str,
    latest: &Arc<RwLock<Option<MidPrice>>>,
    tx: &UnboundedSender<MidPrice>,
) -> Result<()> {
    let (ws_stream, _) = connect_async(url).await?;
    let (mut write, mut read) = ws_stream.split();
    info!("[BINANCE] connected");

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
                        // Parse failures are dropped, not fatal.
                        if let Some(mid) = parse_book_ticker(&text) {
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
                        warn!("[BINANCE] server closed connection");
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

/// Book-ticker payload: `b`/`a` carry best bid/ask as strings.
fn parse_book_ticker(text: &str) -> Option<MidPrice> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let bid = Decimal::from_str(value.get("b")?.as_str()?).ok()?;
    let ask = Decimal::from_str(value.get("a")?.as_str()?).ok()?;
    MidPrice::from_bbo(bid, ask, now_ms())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn book_ticker_parses_to_mid() {
        let mid = parse_book_ticker(
            r#"{"u":400900217,"s":"BTCUSDT","b":"99999.00","B":"31.2","a":"100001.00","A":"40.1"}"#,
        )
        .unwrap();
        assert_eq!(mid.mid, dec!(100000.00));
        assert_eq!(mid.best_bid, dec!(99999.00));
        assert_eq!(mid.best_ask, dec!(100001.00));
    }

    #[test]
    fn garbage_is_dropped_silently() {
        assert!(parse_book_ticker("not json").is_none());
        assert!(parse_book_ticker(r#"{"b":"abc","a":"1"}"#).is_none());
        assert!(parse_book_ticker(r#"{"result":null,"id":1}"#).is_none());
    }

    #[test]
    fn stream_url_is_lowercased() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let feed = BinanceFeed::new("BTC", tx);
        assert!(feed.url.ends_with("/ws/btcusdt@bookTicker"));
    }
}
