use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::bus::Side;
use crate::error::VenueError;

pub type VenueResult<T> = std::result::Result<T, VenueError>;

/// Venue acknowledgement for a new order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderAck {
    /// Accepted onto the book
    Resting { order_id: u64 },
    /// Executed immediately
    Filled {
        order_id: u64,
        size: Decimal,
        avg_price: Decimal,
    },
}

impl OrderAck {
    pub fn order_id(&self) -> u64 {
        match self {
            OrderAck::Resting { order_id } | OrderAck::Filled { order_id, .. } => *order_id,
        }
    }
}

/// Resting order as reported by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: u64,
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub limit_price: Decimal,
}

/// Open position as reported by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: String,
    /// Signed size, negative for shorts
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

impl VenuePosition {
    /// Side of the order that would flatten this position
    pub fn closing_side(&self) -> Side {
        if self.size.is_sign_negative() {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub account_value: Decimal,
    pub margin_used: Decimal,
    pub withdrawable: Decimal,
}

/// Raw venue API. Implementations do one request per call and never retry;
/// retries and rate limiting live in [`super::GuardedVenue`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Mid price of every listed symbol
    async fn all_mids(&self) -> VenueResult<HashMap<String, Decimal>>;

    /// Good-til-cancelled limit order
    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
        limit_price: Decimal,
    ) -> VenueResult<OrderAck>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
    ) -> VenueResult<OrderAck>;

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> VenueResult<()>;

    async fn open_orders(&self) -> VenueResult<Vec<OpenOrder>>;

    async fn positions(&self) -> VenueResult<Vec<VenuePosition>>;

    async fn account_state(&self) -> VenueResult<AccountState>;
}
