//! Venue REST client.
//!
//! Authenticated endpoints (user snapshot, atomic batch, WS token) sign with
//! [`ApiAuth`]; public endpoints (markets, orderbook snapshot) do not. The
//! expensive user snapshot is deduplicated: concurrent callers share one
//! in-flight fetch.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;

use super::auth::ApiAuth;
use super::types::{
    ApiResponse, AtomicRequest, AtomicResponse, BookSnapshot, MarketInfo, OrderAction, UserInfo,
    WsToken,
};

type SharedUserFetch = Shared<BoxFuture<'static, Result<Arc<UserInfo>, String>>>;

pub struct RestClient {
    client: Client,
    base_url: String,
    auth: ApiAuth,
    inflight_user: Mutex<Option<SharedUserFetch>>,
}

impl RestClient {
    pub fn new(base_url: String, auth: ApiAuth) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            base_url,
            auth,
            inflight_user: Mutex::new(None),
        })
    }

    async fn get_public<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        let body = resp.text().await?;
        unwrap_envelope(&body, path)
    }

    /// Signed GET as an owned builder, so the request can outlive `&self`
    /// inside the shared fetch future.
    fn signed_get(&self, path: &str) -> reqwest::RequestBuilder {
        let (ts, sig) = self.auth.sign("GET", path, "");
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("X-API-KEY", self.auth.api_key())
            .header("X-API-TIMESTAMP", ts)
            .header("X-API-SIGNATURE", sig)
    }

    async fn post_signed<T: DeserializeOwned>(&self, path: &str, body: String) -> Result<T> {
        let (ts, sig) = self.auth.sign("POST", path, &body);
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("X-API-KEY", self.auth.api_key())
            .header("X-API-TIMESTAMP", ts)
            .header("X-API-SIGNATURE", sig)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;
        let text = resp.text().await?;
        unwrap_envelope(&text, path)
    }

    /// All markets listed on the venue.
    pub async fn markets(&self) -> Result<Vec<MarketInfo>> {
        self.get_public("/api/v1/markets").await
    }

    /// Orderbook snapshot with its server `update_id`.
    pub async fn book_snapshot(&self, market_id: i64) -> Result<BookSnapshot> {
        self.get_public(&format!("/api/v1/orderbook?marketId={market_id}"))
            .await
    }

    /// One-shot token for the authenticated WebSocket subscription.
    pub async fn ws_token(&self) -> Result<WsToken> {
        self.post_signed("/api/v1/ws-token", String::new()).await
    }

    /// Submit one atomic batch of place/cancel actions. Per-action results
    /// come back in submission order.
    pub async fn submit_atomic(&self, actions: &[OrderAction]) -> Result<AtomicResponse> {
        let body = serde_json::to_string(&AtomicRequest {
            actions: actions.to_vec(),
        })?;
        debug!(actions = actions.len(), "[REST] atomic submit");
        self.post_signed("/api/v1/atomic", body).await
    }

    /// Deduplicated user snapshot: while a fetch is in flight, every caller
    /// awaits the same future; the slot clears on completion.
    pub async fn user_info_shared(&self) -> Result<Arc<UserInfo>> {
        const PATH: &str = "/api/v1/user";
        let fut = {
            let mut slot = self.inflight_user.lock().await;
            match slot.as_ref() {
                Some(inflight) => inflight.clone(),
                None => {
                    let request = self.signed_get(PATH);
                    let fut: SharedUserFetch = async move {
                        let resp = request.send().await.map_err(|e| e.to_string())?;
                        let body = resp.text().await.map_err(|e| e.to_string())?;
                        unwrap_envelope::<UserInfo>(&body, PATH)
                            .map(Arc::new)
                            .map_err(|e| format!("{e:#}"))
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        let outcome = fut.await;
        self.inflight_user.lock().await.take();
        outcome.map_err(|e| anyhow::anyhow!("user snapshot fetch failed: {e}"))
    }
}

fn unwrap_envelope<T: DeserializeOwned>(body: &str, path: &str) -> Result<T> {
    let envelope: ApiResponse<T> =
        serde_json::from_str(body).with_context(|| format!("decoding {path} response"))?;
    if envelope.code != 0 {
        bail!(
            "{path} returned code {}: {}",
            envelope.code,
            envelope.msg.unwrap_or_default()
        );
    }
    envelope
        .data
        .with_context(|| format!("{path} response had no data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_unwraps_data() {
        let markets: Vec<MarketInfo> = unwrap_envelope(
            r#"{"code":0,"data":[{"marketId":1,"symbol":"BTC-PERP","priceDecimals":2,"sizeDecimals":4}]}"#,
            "/api/v1/markets",
        )
        .unwrap();
        assert_eq!(markets[0].symbol, "BTC-PERP");
        assert_eq!(markets[0].price_decimals, 2);
    }

    #[test]
    fn envelope_surfaces_error_codes() {
        let result: Result<Vec<MarketInfo>> = unwrap_envelope(
            r#"{"code":1003,"data":null,"msg":"forbidden"}"#,
            "/api/v1/markets",
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("1003"));
        assert!(err.contains("forbidden"));
    }
}
