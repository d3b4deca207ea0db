//! Venue wire types.
//!
//! REST and WebSocket payloads for the local venue: market metadata, the
//! orderbook snapshot/delta pair, the authenticated user snapshot, account
//! stream sections, and the atomic place/cancel batch.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Side;

// ======================= ENVELOPE =======================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub data: Option<T>,
    pub msg: Option<String>,
}

// ======================= MARKETS =======================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketInfo {
    pub market_id: i64,
    pub symbol: String,
    pub price_decimals: u32,
    pub size_decimals: u32,
}

// ======================= ORDERBOOK =======================

/// REST snapshot. Levels are `["price", "size"]` string pairs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSnapshot {
    pub bids: Vec<(String, String)>,
    pub asks: Vec<(String, String)>,
    pub update_id: u64,
}

/// WebSocket depth delta. A size of 0 deletes the level; a non-zero size is
/// the absolute size at that price.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookDelta {
    pub market_id: i64,
    #[serde(default)]
    pub bids: Vec<(String, String)>,
    #[serde(default)]
    pub asks: Vec<(String, String)>,
    pub update_id: u64,
    #[serde(default)]
    pub last_update_id: u64,
}

// ======================= USER SNAPSHOT =======================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub account_id: String,
    #[serde(default)]
    pub orders: Vec<OpenOrder>,
    #[serde(default)]
    pub positions: Vec<PositionInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub order_id: String,
    pub market_id: i64,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub remaining: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub market_id: i64,
    /// Unsigned base size; direction carried by `is_long`.
    pub base: Decimal,
    pub is_long: bool,
}

impl UserInfo {
    /// Signed base position for one market; zero when flat.
    pub fn signed_position(&self, market_id: i64) -> Decimal {
        self.positions
            .iter()
            .find(|p| p.market_id == market_id)
            .map(|p| if p.is_long { p.base } else { -p.base })
            .unwrap_or(Decimal::ZERO)
    }
}

// ======================= ACCOUNT STREAM =======================

/// One account-stream push: new placements, fills keyed by order id, and
/// cancelled order ids.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDelta {
    #[serde(default)]
    pub places: Vec<OpenOrder>,
    #[serde(default)]
    pub fills: HashMap<String, FillInfo>,
    #[serde(default)]
    pub cancels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillInfo {
    pub market_id: i64,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub remaining: Decimal,
}

// ======================= ATOMIC BATCH =======================

/// Largest action sequence the venue accepts in one atomic call.
pub const MAX_ATOMIC_ACTIONS: usize = 4;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OrderAction {
    #[serde(rename_all = "camelCase")]
    Place {
        market_id: i64,
        side: Side,
        price: Decimal,
        size: Decimal,
        post_only: bool,
    },
    #[serde(rename_all = "camelCase")]
    Cancel { order_id: String },
}

impl OrderAction {
    pub fn is_place(&self) -> bool {
        matches!(self, OrderAction::Place { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AtomicRequest {
    pub actions: Vec<OrderAction>,
}

/// Per-action result, in submission order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub ok: bool,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AtomicResponse {
    pub results: Vec<ActionResult>,
}

// ======================= WS TOKEN =======================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsToken {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn account_delta_sections_parse() {
        let raw = r#"{
            "places": [
                {"orderId":"o1","marketId":1,"side":"bid","price":"99900.00","size":"0.0010","remaining":"0.0010"}
            ],
            "fills": {
                "o2": {"marketId":1,"side":"ask","quantity":"0.0004","price":"100100.00","remaining":"0.0"}
            },
            "cancels": ["o3"]
        }"#;
        let delta: AccountDelta = serde_json::from_str(raw).unwrap();
        assert_eq!(delta.places.len(), 1);
        assert_eq!(delta.places[0].side, Side::Bid);
        assert_eq!(delta.places[0].price, dec!(99900.00));
        assert_eq!(delta.fills["o2"].quantity, dec!(0.0004));
        assert_eq!(delta.cancels, vec!["o3".to_string()]);
    }

    #[test]
    fn missing_sections_default_empty() {
        let delta: AccountDelta = serde_json::from_str("{}").unwrap();
        assert!(delta.places.is_empty());
        assert!(delta.fills.is_empty());
        assert!(delta.cancels.is_empty());
    }

    #[test]
    fn atomic_actions_serialize_tagged() {
        let place = OrderAction::Place {
            market_id: 1,
            side: Side::Ask,
            price: dec!(100100.00),
            size: dec!(0.0010),
            post_only: true,
        };
        let value = serde_json::to_value(&place).unwrap();
        assert_eq!(value["type"], "place");
        assert_eq!(value["side"], "ask");
        assert_eq!(value["postOnly"], true);

        let cancel = OrderAction::Cancel {
            order_id: "o9".into(),
        };
        let value = serde_json::to_value(&cancel).unwrap();
        assert_eq!(value["type"], "cancel");
        assert_eq!(value["orderId"], "o9");
    }

    #[test]
    fn signed_position_by_market() {
        let user: UserInfo = serde_json::from_str(
            r#"{
                "accountId": "a1",
                "positions": [
                    {"marketId": 1, "base": "0.5", "isLong": false},
                    {"marketId": 2, "base": "1.25", "isLong": true}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(user.signed_position(1), dec!(-0.5));
        assert_eq!(user.signed_position(2), dec!(1.25));
        assert_eq!(user.signed_position(3), Decimal::ZERO);
    }
}
