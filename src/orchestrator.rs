//! Wiring and the master event loop.
//!
//! One task owns all strategy state: price events from the reference feed
//! and the local book pair into the fair-price estimator and drive the
//! throttled re-quote trigger; fills update the position optimistically;
//! interval arms resync orders and position against the authoritative user
//! snapshot, log status, and watch feed health for failover.

use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval, sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, FeedKind};
use crate::exchange::account_ws::AccountStream;
use crate::exchange::orderbook_ws::OrderBookStream;
use crate::exchange::rest::RestClient;
use crate::exchange::types::{MarketInfo, UserInfo};
use crate::exchange::ApiAuth;
use crate::fair_price::FairPriceEstimator;
use crate::feeds::{build_feed, priority_list, ReferenceFeed};
use crate::planner::OrderPlanner;
use crate::position::PositionTracker;
use crate::quoter::Quoter;
use crate::requote::{OrderAges, RequoteGuard};
use crate::throttle::{Throttle, ThrottleDecision};
use crate::types::{CachedOrder, FillEvent, MidPrice};

/// Paired samples must be closer than this in receive time.
const PAIRING_WINDOW_MS: u64 = 1_000;
const FEED_HEALTH_EVERY: Duration = Duration::from_secs(5);
const FEED_STALE_AFTER: Duration = Duration::from_secs(20);

/// Build everything, seed state from the venue, and run until a shutdown
/// signal. Errors returned from here are fatal (exit code 1).
pub async fn run(config: Config) -> Result<()> {
    let auth = ApiAuth::new(config.api_key.clone(), config.api_secret.clone());
    let rest = Arc::new(RestClient::new(config.api_url.clone(), auth)?);

    let market = resolve_market(&rest, &config.symbol).await?;
    info!(
        market_id = market.market_id,
        symbol = %market.symbol,
        price_decimals = market.price_decimals,
        size_decimals = market.size_decimals,
        "[INIT] resolved market"
    );

    let (book_tx, book_rx) = unbounded_channel();
    let (ref_tx, ref_rx) = unbounded_channel();
    let (fill_tx, fill_rx) = unbounded_channel();

    let book = Arc::new(OrderBookStream::new(
        config.ws_url.clone(),
        market.market_id,
        rest.clone(),
        book_tx,
    ));
    let account = AccountStream::new(config.ws_url.clone(), rest.clone(), fill_tx);
    account.connect();
    book.connect();

    let feed_priority = priority_list(config.reference_feed);
    let feed = build_feed(
        feed_priority[0],
        &config.symbol,
        ref_tx.clone(),
        book.clone(),
    );
    feed.connect();
    info!(feed = feed.name(), "[INIT] reference feed connected");

    // Initial handshake with the venue is fatal when it fails.
    let user = rest
        .user_info_shared()
        .await
        .context("initial user snapshot")?;
    account.sync_orders(&user).await;

    let mut position = PositionTracker::new(config.close_threshold_usd);
    position.reconcile(user.signed_position(market.market_id));

    let cached_orders = cached_from_snapshot(&user, market.market_id);
    info!(
        open_orders = cached_orders.len(),
        base_position = %position.base_size(),
        "[INIT] seeded from user snapshot"
    );

    let quoter = Quoter::new(
        market.price_decimals,
        market.size_decimals,
        config.spread_bps,
        config.take_profit_bps,
        config.order_size_usd,
    );
    let estimator = FairPriceEstimator::new(
        config.fair_price_window_ms,
        config.warmup_seconds as usize,
    );
    let guard = RequoteGuard::new(config.requote_threshold_bps, config.min_order_age());
    let planner = Arc::new(OrderPlanner::new(rest.clone(), market.market_id));
    let throttle = Throttle::new(config.update_throttle());

    let mut ages = OrderAges::default();
    let now = Instant::now();
    for order in &cached_orders {
        ages.observe(&order.order_id, now);
    }

    let maker = MarketMaker {
        market_id: market.market_id,
        rest,
        book,
        account,
        feed,
        feed_priority,
        feed_index: 0,
        feed_tx: ref_tx,
        feed_switched_at: Instant::now(),
        symbol: config.symbol.clone(),
        enable_feed_failover: config.enable_feed_failover,
        estimator,
        position,
        quoter,
        guard,
        planner,
        throttle,
        cached_orders,
        ages,
        last_ref: None,
        last_local: None,
        last_ref_at: None,
        pending_fair: None,
        is_updating: false,
        status_interval: Duration::from_millis(config.status_interval_ms),
        order_sync_interval: Duration::from_millis(config.order_sync_interval_ms),
        position_sync_interval: Duration::from_millis(config.position_sync_interval_ms),
    };

    maker.run(ref_rx, book_rx, fill_rx).await
}

async fn resolve_market(rest: &Arc<RestClient>, symbol: &str) -> Result<MarketInfo> {
    let markets = rest.markets().await.context("fetching market list")?;
    let prefix = format!("{symbol}-");
    markets
        .into_iter()
        .find(|m| m.symbol == symbol || m.symbol.starts_with(&prefix))
        .with_context(|| format!("unknown market symbol {symbol:?}"))
}

fn cached_from_snapshot(user: &UserInfo, market_id: i64) -> Vec<CachedOrder> {
    user.orders
        .iter()
        .filter(|o| o.market_id == market_id)
        .map(|o| CachedOrder {
            order_id: o.order_id.clone(),
            side: o.side,
            price: o.price,
            size: o.remaining,
        })
        .collect()
}

struct MarketMaker {
    market_id: i64,
    rest: Arc<RestClient>,
    book: Arc<OrderBookStream>,
    account: AccountStream,
    feed: Arc<dyn ReferenceFeed>,
    feed_priority: Vec<FeedKind>,
    feed_index: usize,
    feed_tx: UnboundedSender<MidPrice>,
    feed_switched_at: Instant,
    symbol: String,
    enable_feed_failover: bool,
    estimator: FairPriceEstimator,
    position: PositionTracker,
    quoter: Quoter,
    guard: RequoteGuard,
    planner: Arc<OrderPlanner>,
    throttle: Throttle,
    cached_orders: Vec<CachedOrder>,
    ages: OrderAges,
    last_ref: Option<MidPrice>,
    last_local: Option<MidPrice>,
    last_ref_at: Option<Instant>,
    pending_fair: Option<Decimal>,
    is_updating: bool,
    status_interval: Duration,
    order_sync_interval: Duration,
    position_sync_interval: Duration,
}

impl MarketMaker {
    async fn run(
        mut self,
        mut ref_rx: UnboundedReceiver<MidPrice>,
        mut book_rx: UnboundedReceiver<MidPrice>,
        mut fill_rx: UnboundedReceiver<FillEvent>,
    ) -> Result<()> {
        let mut status_timer = interval(self.status_interval);
        let mut order_sync_timer = interval(self.order_sync_interval);
        let mut position_sync_timer = interval(self.position_sync_interval);
        let mut feed_health_timer = interval(FEED_HEALTH_EVERY);

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        info!("[RUN] event loop started");
        loop {
            let trailing = self.throttle.deadline();
            tokio::select! {
                _ = &mut shutdown => {
                    info!("[SHUTDOWN] signal received");
                    break;
                }
                Some(mid) = ref_rx.recv() => {
                    self.on_reference_price(mid).await;
                }
                Some(mid) = book_rx.recv() => {
                    self.on_book_update(mid).await;
                }
                Some(fill) = fill_rx.recv() => {
                    self.on_fill(fill).await;
                }
                _ = sleep_until(trailing.unwrap_or_else(Instant::now)), if trailing.is_some() => {
                    if self.throttle.fire_trailing(Instant::now()) {
                        if let Some(fair) = self.pending_fair.take() {
                            self.execute_update(fair).await;
                        }
                    }
                }
                _ = status_timer.tick() => {
                    self.log_status().await;
                }
                _ = order_sync_timer.tick() => {
                    self.sync_orders().await;
                }
                _ = position_sync_timer.tick() => {
                    self.sync_position().await;
                }
                _ = feed_health_timer.tick() => {
                    self.check_feed_health().await;
                }
            }
        }

        self.shutdown().await
    }

    fn feed_kind(&self) -> FeedKind {
        self.feed_priority[self.feed_index]
    }

    /// Anchor mid for fair-price derivation: the reference feed normally,
    /// the local mid in the degenerate "none" mode.
    fn anchor_mid(&self) -> Option<Decimal> {
        match self.feed_kind() {
            FeedKind::None => self.last_local.map(|m| m.mid),
            _ => self.last_ref.map(|m| m.mid),
        }
    }

    fn current_fair(&self) -> Option<Decimal> {
        self.estimator.fair_price(self.anchor_mid()?)
    }

    async fn on_reference_price(&mut self, mid: MidPrice) {
        self.last_ref = Some(mid);
        self.last_ref_at = Some(Instant::now());
        self.try_pair();
        if let Some(fair) = self.estimator.fair_price(mid.mid) {
            self.trigger_update(fair).await;
        }
    }

    async fn on_book_update(&mut self, mid: MidPrice) {
        self.last_local = Some(mid);
        if self.feed_kind() == FeedKind::None {
            // Degenerate mode: the book is its own reference, so every book
            // event is a zero-offset pair and drives the trigger directly.
            self.estimator.add_sample(mid.mid, mid.mid);
            if let Some(fair) = self.estimator.fair_price(mid.mid) {
                self.trigger_update(fair).await;
            }
        } else {
            self.try_pair();
        }
    }

    /// Admit a sample when the latest local and reference observations
    /// landed within the pairing window.
    fn try_pair(&mut self) {
        if let (Some(local), Some(reference)) = (self.last_local, self.last_ref) {
            let delta = local.timestamp_ms.abs_diff(reference.timestamp_ms);
            if delta < PAIRING_WINDOW_MS {
                self.estimator.add_sample(local.mid, reference.mid);
            }
        }
    }

    async fn trigger_update(&mut self, fair: Decimal) {
        match self.throttle.trigger(Instant::now()) {
            ThrottleDecision::Fire => self.execute_update(fair).await,
            ThrottleDecision::Armed(_) | ThrottleDecision::Coalesced => {
                self.pending_fair = Some(fair);
            }
        }
    }

    /// One re-quote cycle. Non-reentrant: triggers that land while an update
    /// is in flight are dropped.
    async fn execute_update(&mut self, fair: Decimal) {
        if self.is_updating {
            debug!("[UPDATE] already in flight, dropping trigger");
            return;
        }
        self.is_updating = true;
        let outcome = self.run_update(fair).await;
        self.is_updating = false;

        if let Err(e) = outcome {
            warn!("[UPDATE] failed: {e:#}; clearing cached orders until resync");
            self.cached_orders.clear();
        }
    }

    async fn run_update(&mut self, fair: Decimal) -> Result<()> {
        let ctx = self.position.quoting_context(fair);
        let bbo = self.book.bbo().await;
        let quotes = self.quoter.quotes(&ctx, bbo);
        if quotes.is_empty() {
            warn!(fair = %fair, "[UPDATE] no quotes produced, skipping");
            return Ok(());
        }

        let now = Instant::now();
        let targets = self
            .guard
            .filter(quotes, &self.cached_orders, &self.ages, now);

        let live = std::mem::take(&mut self.cached_orders);
        self.cached_orders = self.planner.reconcile(live, &targets).await?;

        for order in &self.cached_orders {
            self.ages.observe(&order.order_id, now);
        }
        self.ages
            .retain_live(self.cached_orders.iter().map(|o| o.order_id.as_str()));
        Ok(())
    }

    async fn on_fill(&mut self, fill: FillEvent) {
        if fill.market_id != self.market_id {
            return;
        }
        info!(
            order_id = %fill.order_id,
            side = fill.side.as_str(),
            size = %fill.size,
            price = %fill.price,
            "[FILL] applying"
        );

        let was_close = self
            .current_fair()
            .map(|fair| self.position.is_close_mode(fair));
        self.position.apply_fill(fill.side, fill.size, fill.price);

        // Keep the cached mirror in step with the fill.
        if fill.remaining <= Decimal::ZERO {
            self.cached_orders.retain(|o| o.order_id != fill.order_id);
        } else if let Some(order) = self
            .cached_orders
            .iter_mut()
            .find(|o| o.order_id == fill.order_id)
        {
            order.size = fill.remaining;
        }

        // Entering close mode cancels everything resting so the next update
        // can place the single reducing quote.
        if let Some(fair) = self.current_fair() {
            if was_close == Some(false) && self.position.is_close_mode(fair) {
                info!(
                    position_usd = %(self.position.base_size() * fair),
                    "[FILL] close mode entered, firing cancel-all"
                );
                let orders = std::mem::take(&mut self.cached_orders);
                self.ages.retain_live(std::iter::empty::<&str>());
                let planner = self.planner.clone();
                tokio::spawn(async move {
                    if let Err(e) = planner.cancel_all(&orders).await {
                        warn!("[FILL] cancel-all failed: {e:#}");
                    }
                });
            }
        }
    }

    /// Authoritative order resync through the deduplicated snapshot fetch.
    async fn sync_orders(&mut self) {
        let user = match self.rest.user_info_shared().await {
            Ok(user) => user,
            Err(e) => {
                warn!("[SYNC] order resync failed: {e:#}");
                return;
            }
        };
        self.account.sync_orders(&user).await;
        self.cached_orders = cached_from_snapshot(&user, self.market_id);

        let now = Instant::now();
        for order in &self.cached_orders {
            self.ages.observe(&order.order_id, now);
        }
        self.ages
            .retain_live(self.cached_orders.iter().map(|o| o.order_id.as_str()));
        let mirrored = self.account.orders_for_market(self.market_id).await;
        debug!(
            live = self.cached_orders.len(),
            mirrored = mirrored.len(),
            "[SYNC] orders resynced"
        );
    }

    async fn sync_position(&mut self) {
        let user = match self.rest.user_info_shared().await {
            Ok(user) => user,
            Err(e) => {
                warn!("[SYNC] position resync failed: {e:#}");
                return;
            }
        };
        self.position
            .reconcile(user.signed_position(self.market_id));
    }

    /// Tear down a stale feed and bring up the next candidate.
    async fn check_feed_health(&mut self) {
        if !self.enable_feed_failover {
            return;
        }
        if self.feed_index + 1 >= self.feed_priority.len() {
            return;
        }
        let last_price = self.last_ref_at.unwrap_or(self.feed_switched_at);
        if last_price.elapsed() < FEED_STALE_AFTER {
            return;
        }

        let from = self.feed.name();
        self.feed.close();
        self.feed_index += 1;
        let next_kind = self.feed_priority[self.feed_index];
        self.feed = build_feed(
            next_kind,
            &self.symbol,
            self.feed_tx.clone(),
            self.book.clone(),
        );
        self.feed.connect();
        self.feed_switched_at = Instant::now();
        self.last_ref = None;
        self.last_ref_at = None;
        warn!(from, to = self.feed.name(), "[FEED] stale, failing over");
    }

    async fn log_status(&self) {
        let samples = self.estimator.sample_count();
        let min_samples = self.estimator.min_samples();
        if samples < min_samples {
            info!(samples, required = min_samples, "[WARMUP] collecting fair-price samples");
            return;
        }

        let fair = self.current_fair();
        let offset = self.estimator.raw_median_offset();
        let bbo = self.book.bbo().await;
        let reference = self.feed.latest().await;
        let state = fair.map(|f| self.position.state(f));
        info!(
            feed = self.feed.name(),
            reference = %opt(reference.map(|m| m.mid)),
            fair = %opt(fair),
            offset = %opt(offset),
            best_bid = %opt(bbo.map(|b| b.0)),
            best_ask = %opt(bbo.map(|b| b.1)),
            position = %self.position.base_size(),
            position_usd = %opt(state.map(|s| s.size_usd.round_dp(2))),
            close_mode = state.map(|s| s.is_close_mode).unwrap_or(false),
            live_orders = self.cached_orders.len(),
            "[STATUS]"
        );
    }

    async fn shutdown(mut self) -> Result<()> {
        self.throttle.cancel();
        self.feed.close();
        self.book.close();
        self.account.close();

        if let Err(e) = self.planner.cancel_all(&self.cached_orders).await {
            warn!("[SHUTDOWN] cancel-all failed: {e:#}");
        }
        info!("[SHUTDOWN] done");
        Ok(())
    }
}

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("[SHUTDOWN] SIGTERM handler unavailable: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
