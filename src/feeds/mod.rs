//! External reference-price feeds.
//!
//! Every feed variant, including the degenerate "use the local mid", sits
//! behind the same capability so failover can swap the instance without the
//! orchestrator caring which venue is behind it.

pub mod binance;
pub mod coinbase;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::FeedKind;
use crate::exchange::orderbook_ws::OrderBookStream;
use crate::types::MidPrice;

#[async_trait]
pub trait ReferenceFeed: Send + Sync {
    fn name(&self) -> &'static str;

    /// Spawn the feed's subscription task (idempotent per instance).
    fn connect(&self);

    /// Tear the subscription down; the instance is not reusable afterwards.
    fn close(&self);

    /// Most recent price, if any has arrived.
    async fn latest(&self) -> Option<MidPrice>;
}

/// Failover order: the configured primary first, the other external venue as
/// fallback, then the local-mid degenerate.
pub fn priority_list(primary: FeedKind) -> Vec<FeedKind> {
    match primary {
        FeedKind::Binance => vec![FeedKind::Binance, FeedKind::Coinbase, FeedKind::None],
        FeedKind::Coinbase => vec![FeedKind::Coinbase, FeedKind::Binance, FeedKind::None],
        FeedKind::None => vec![FeedKind::None],
    }
}

pub fn build_feed(
    kind: FeedKind,
    symbol: &str,
    tx: UnboundedSender<MidPrice>,
    book: Arc<OrderBookStream>,
) -> Arc<dyn ReferenceFeed> {
    match kind {
        FeedKind::Binance => Arc::new(binance::BinanceFeed::new(symbol, tx)),
        FeedKind::Coinbase => Arc::new(coinbase::CoinbaseFeed::new(symbol, tx)),
        FeedKind::None => Arc::new(local::LocalMidFeed::new(book)),
    }
}
