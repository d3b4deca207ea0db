//! Two-sided perp market maker.
//!
//! Quotes around a fair price estimated from an external reference feed
//! blended with the local venue's book, switches to reducing-only quoting
//! when exposure exceeds the close threshold, and reconciles resting orders
//! through bounded atomic batches.

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod exchange;
mod fair_price;
mod feeds;
mod orchestrator;
mod planner;
mod position;
mod quoter;
mod requote;
mod throttle;
mod types;

use config::Config;

#[tokio::main]
async fn main() {
    init_tracing();
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e:#}");
            std::process::exit(1);
        }
    };
    info!(
        symbol = %config.symbol,
        feed = config.reference_feed.as_str(),
        spread_bps = %config.spread_bps,
        order_size_usd = %config.order_size_usd,
        "starting market maker"
    );

    if let Err(e) = orchestrator::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("perp_mm=info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
