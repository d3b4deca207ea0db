//! Local-venue orderbook stream.
//!
//! Initial consistency follows the snapshot-plus-buffered-deltas handshake:
//! subscribe first and buffer every delta, fetch the REST snapshot, load it
//! as authoritative, replay buffered deltas newer than the snapshot, then
//! require strictly increasing `update_id` forever after. A depth size of 0
//! deletes the level; non-zero sizes are absolute per price.

use std::str::FromStr;
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
use super::types::{BookDelta, BookSnapshot};
use crate::types::{now_ms, MidPrice};

/// Depth kept per side; levels beyond this are dropped after sort.
pub const MAX_LEVELS: usize = 100;

const STALE_AFTER: Duration = Duration::from_secs(60);
const STALE_CHECK_EVERY: Duration = Duration::from_secs(10);
const PING_EVERY: Duration = Duration::from_secs(30);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

/// Book synchronization state machine. Pure; the socket task drives it.
#[derive(Debug)]
pub struct BookSync {
    /// Descending by price.
    bids: Vec<(Decimal, Decimal)>,
    /// Ascending by price.
    asks: Vec<(Decimal, Decimal)>,
    buffered: Vec<BookDelta>,
    last_update_id: u64,
    snapshot_loaded: bool,
}

impl Default for BookSync {
    fn default() -> Self {
        Self::new()
    }
}

impl BookSync {
    pub fn new() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            buffered: Vec::new(),
            last_update_id: 0,
            snapshot_loaded: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn snapshot_loaded(&self) -> bool {
        self.snapshot_loaded
    }

    /// Feed one delta. Before the snapshot it is buffered; afterwards it is
    /// applied when its `update_id` advances the book. Returns true when the
    /// visible book changed.
    pub fn on_delta(&mut self, delta: BookDelta) -> bool {
        if !self.snapshot_loaded {
            self.buffered.push(delta);
            return false;
        }
        self.apply(delta)
    }

    /// Load the REST snapshot as authoritative and replay buffered deltas
    /// newer than it.
    pub fn load_snapshot(&mut self, snapshot: &BookSnapshot) {
        self.bids = parse_levels(&snapshot.bids);
        self.asks = parse_levels(&snapshot.asks);
        sort_and_trim(&mut self.bids, &mut self.asks);
        self.last_update_id = snapshot.update_id;
        self.snapshot_loaded = true;

        let buffered = std::mem::take(&mut self.buffered);
        let total = buffered.len();
        let mut replayed = 0usize;
        for delta in buffered {
            if self.apply(delta) {
                replayed += 1;
            }
        }
        debug!(
            update_id = self.last_update_id,
            replayed,
            discarded = total - replayed,
            "[BOOK] snapshot loaded"
        );
    }

    fn apply(&mut self, delta: BookDelta) -> bool {
        if delta.update_id <= self.last_update_id {
            return false;
        }
        for (price, size) in parse_levels(&delta.bids) {
            upsert(&mut self.bids, price, size);
        }
        for (price, size) in parse_levels(&delta.asks) {
            upsert(&mut self.asks, price, size);
        }
        sort_and_trim(&mut self.bids, &mut self.asks);
        self.last_update_id = delta.update_id;
        true
    }

    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.first().copied()
    }

    /// Best bid/ask prices; None until both sides are non-empty.
    pub fn bbo(&self) -> Option<(Decimal, Decimal)> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid, ask)),
            _ => None,
        }
    }

    pub fn mid(&self, timestamp_ms: u64) -> Option<MidPrice> {
        let (bid, ask) = self.bbo()?;
        MidPrice::from_bbo(bid, ask, timestamp_ms)
    }
}

fn parse_levels(raw: &[(String, String)]) -> Vec<(Decimal, Decimal)> {
    raw.iter()
        .filter_map(|(p, s)| {
            match (Decimal::from_str(p), Decimal::from_str(s)) {
                (Ok(price), Ok(size)) if price > Decimal::ZERO => Some((price, size)),
                _ => None,
            }
        })
        .collect()
}

fn upsert(levels: &mut Vec<(Decimal, Decimal)>, price: Decimal, size: Decimal) {
    if size.is_zero() {
        levels.retain(|(p, _)| *p != price);
    } else if let Some(level) = levels.iter_mut().find(|(p, _)| *p == price) {
        level.1 = size;
    } else {
        levels.push((price, size));
    }
}

fn sort_and_trim(bids: &mut Vec<(Decimal, Decimal)>, asks: &mut Vec<(Decimal, Decimal)>) {
    bids.sort_by(|a, b| b.0.cmp(&a.0));
    asks.sort_by(|a, b| a.0.cmp(&b.0));
    bids.truncate(MAX_LEVELS);
    asks.truncate(MAX_LEVELS);
}

/// Owns the depth subscription and keeps [`BookSync`] consistent across
/// reconnects.
pub struct OrderBookStream {
    ws_url: String,
    market_id: i64,
    rest: Arc<RestClient>,
    book: Arc<RwLock<BookSync>>,
    tx: UnboundedSender<MidPrice>,
    closing: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl OrderBookStream {
    pub fn new(
        ws_url: String,
        market_id: i64,
        rest: Arc<RestClient>,
        tx: UnboundedSender<MidPrice>,
    ) -> Self {
        Self {
            ws_url,
            market_id,
            rest,
            book: Arc::new(RwLock::new(BookSync::new())),
            tx,
            closing: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
        }
    }

    pub async fn mid(&self) -> Option<MidPrice> {
        self.book.read().await.mid(now_ms())
    }

    pub async fn bbo(&self) -> Option<(Decimal, Decimal)> {
        self.book.read().await.bbo()
    }

    /// Spawn the subscription task with its reconnect loop.
    pub fn connect(&self) {
        let ws_url = self.ws_url.clone();
        let market_id = self.market_id;
        let rest = self.rest.clone();
        let book = self.book.clone();
        let tx = self.tx.clone();
        let closing = self.closing.clone();

        let handle = tokio::spawn(async move {
            while !closing.load(Ordering::Relaxed) {
                match run_connection(&ws_url, market_id, &rest, &book, &tx).await {
                    Ok(()) => info!("[BOOK] connection closed, reconnecting"),
                    Err(e) => warn!("[BOOK] connection error: {e:#}, reconnecting"),
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
    market_id: i64,
    rest: &Arc<RestClient>,
    book: &Arc<RwLock<BookSync>>,
    tx: &UnboundedSender<MidPrice>,
) -> Result<()> {
    book.write().await.reset();

    let (ws_stream, _) = connect_async(ws_url).await?;
    let (mut write, mut read) = ws_stream.split();
    info!(market_id, "[BOOK] connected");

    // Subscribe before the snapshot so no delta is lost.
    let sub = serde_json::json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "type": "subscribe",
        "topic": format!("book:{market_id}"),
    });
    write.send(Message::Text(sub.to_string())).await?;

    let mut snapshot_fut = Box::pin(rest.book_snapshot(market_id));
    let mut snapshot_pending = true;

    let mut ping_timer = interval(PING_EVERY);
    let mut stale_timer = interval(STALE_CHECK_EVERY);
    let mut last_msg = Instant::now();

    loop {
        tokio::select! {
            snapshot = &mut snapshot_fut, if snapshot_pending => {
                let snapshot = snapshot?;
                snapshot_pending = false;
                let mut state = book.write().await;
                state.load_snapshot(&snapshot);
                if let Some(mid) = state.mid(now_ms()) {
                    let _ = tx.send(mid);
                }
            }
            _ = ping_timer.tick() => {
                let ping = serde_json::json!({"id": uuid::Uuid::new_v4().to_string(), "type": "ping"});
                if write.send(Message::Text(ping.to_string())).await.is_err() {
                    bail!("ping send failed");
                }
            }
            _ = stale_timer.tick() => {
                if last_msg.elapsed() >= STALE_AFTER {
                    bail!("no message for {}s, forcing resync", STALE_AFTER.as_secs());
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_msg = Instant::now();
                        if let Some(delta) = parse_delta(&text, market_id) {
                            let mut state = book.write().await;
                            if state.on_delta(delta) {
                                if let Some(mid) = state.mid(now_ms()) {
                                    let _ = tx.send(mid);
                                }
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
                        warn!("[BOOK] server closed connection");
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
fn parse_delta(text: &str, market_id: i64) -> Option<BookDelta> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type").and_then(|t| t.as_str()) != Some("message") {
        return None;
    }
    let delta: BookDelta = serde_json::from_value(value.get("data")?.clone()).ok()?;
    if delta.market_id != market_id {
        return None;
    }
    Some(delta)
}
