#![allow(dead_code)]
//! Local venue connectivity.
//!
//! REST (markets, orderbook snapshot, user snapshot, atomic batch) plus the
//! two WebSocket subscriptions: depth deltas and account updates.

pub mod account_ws;
pub mod auth;
pub mod orderbook_ws;
pub mod rest;
pub mod types;

pub use auth::ApiAuth;
pub use rest::RestClient;
