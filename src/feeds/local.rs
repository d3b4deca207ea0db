//! Degenerate reference feed: the local venue's own mid.
//!
//! Used as the last failover candidate. It owns no socket; the orderbook
//! stream it mirrors already runs, and the orchestrator drives the trigger
//! from book events while this feed is active.

use std::sync::Arc;

use async_trait::async_trait;

use super::ReferenceFeed;
use crate::exchange::orderbook_ws::OrderBookStream;
use crate::types::MidPrice;

pub struct LocalMidFeed {
    book: Arc<OrderBookStream>,
}

impl LocalMidFeed {
    pub fn new(book: Arc<OrderBookStream>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl ReferenceFeed for LocalMidFeed {
    fn name(&self) -> &'static str {
        "local-mid"
    }

    fn connect(&self) {}

    fn close(&self) {}

    async fn latest(&self) -> Option<MidPrice> {
        self.book.mid().await
    }
}
