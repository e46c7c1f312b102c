//! Venue client behind the retry guard
//!
//! Order placement and cancels go out at high priority, reads at normal,
//! the open-order refresh at low. Failures never escape as errors: reads
//! degrade to `None` or an empty list and order calls return a failed
//! [`OrderOutcome`] with the reason.
//!
//! Order placement is retried like any other call. A request that timed out
//! after reaching the venue may therefore be placed twice.

use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::traits::{AccountState, OpenOrder, OrderAck, VenueClient, VenuePosition};
use crate::bus::Side;
use crate::config::RetryConfig;
use crate::throttle::{RateLimiter, RequestPriority, RetryGuard, RetryPolicy};

/// Retry budget for cancels, tighter than the default
const CANCEL_MAX_RETRIES: u32 = 3;

/// Result of an order-side call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub success: bool,
    pub order_id: Option<u64>,
    /// Average price when the order executed immediately
    pub filled_price: Option<Decimal>,
    pub error: Option<String>,
    pub message: String,
}

impl OrderOutcome {
    fn ok(message: String) -> Self {
        Self {
            success: true,
            order_id: None,
            filled_price: None,
            error: None,
            message,
        }
    }

    fn from_ack(ack: &OrderAck, message: String) -> Self {
        let filled_price = match ack {
            OrderAck::Filled { avg_price, .. } => Some(*avg_price),
            OrderAck::Resting { .. } => None,
        };
        Self {
            order_id: Some(ack.order_id()),
            filled_price,
            ..Self::ok(message)
        }
    }

    fn failed(error: impl ToString, message: String) -> Self {
        Self {
            success: false,
            order_id: None,
            filled_price: None,
            error: Some(error.to_string()),
            message,
        }
    }
}

pub struct GuardedVenue<C> {
    client: C,
    guard: RetryGuard,
}

impl<C: VenueClient> GuardedVenue<C> {
    pub fn new(client: C, guard: RetryGuard) -> Self {
        Self { client, guard }
    }

    pub fn from_config(client: C, limiter: Arc<RateLimiter>, retry: &RetryConfig) -> Self {
        Self::new(client, RetryGuard::new(limiter, RetryPolicy::from_config(retry)))
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn guard(&self) -> &RetryGuard {
        &self.guard
    }

    /// Mid price for `symbol`, `None` if unlisted or the call failed
    pub async fn price(&self, symbol: &str) -> Option<Decimal> {
        let client = &self.client;
        match self
            .guard
            .run("all_mids", RequestPriority::Normal, move || client.all_mids())
            .await
        {
            Ok(mids) => mids.get(symbol).copied(),
            Err(e) => {
                warn!("Price lookup for {} failed: {}", symbol, e);
                None
            }
        }
    }

    pub async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
        limit_price: Decimal,
    ) -> OrderOutcome {
        info!("Limit order {} {} {} @ {}", symbol, side, size, limit_price);
        let client = &self.client;
        let result = self
            .guard
            .run("limit_order", RequestPriority::High, move || {
                client.place_limit_order(symbol, side, size, limit_price)
            })
            .await;

        match result {
            Ok(ack) => {
                let message = match &ack {
                    OrderAck::Resting { order_id } => format!(
                        "Limit order placed: {} {} {} @ {} (id {})",
                        symbol, side, size, limit_price, order_id
                    ),
                    OrderAck::Filled {
                        size: filled,
                        avg_price,
                        ..
                    } => format!(
                        "Limit order filled immediately: {} {} {} @ {}",
                        symbol, side, filled, avg_price
                    ),
                };
                OrderOutcome::from_ack(&ack, message)
            }
            Err(e) => {
                warn!("Limit order on {} failed: {}", symbol, e);
                OrderOutcome::failed(&e, format!("Limit order failed: {}", e))
            }
        }
    }

    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
    ) -> OrderOutcome {
        info!("Market order {} {} {}", symbol, side, size);
        let client = &self.client;
        let result = self
            .guard
            .run("market_order", RequestPriority::High, move || {
                client.place_market_order(symbol, side, size)
            })
            .await;

        match result {
            Ok(ack) => {
                let message = match &ack {
                    OrderAck::Filled {
                        size: filled,
                        avg_price,
                        ..
                    } => format!(
                        "Market order filled: {} {} {} @ {}",
                        symbol, side, filled, avg_price
                    ),
                    OrderAck::Resting { order_id } => format!(
                        "Market order accepted: {} {} {} (id {})",
                        symbol, side, size, order_id
                    ),
                };
                OrderOutcome::from_ack(&ack, message)
            }
            Err(e) => {
                warn!("Market order on {} failed: {}", symbol, e);
                OrderOutcome::failed(&e, format!("Market order failed: {}", e))
            }
        }
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: u64) -> OrderOutcome {
        info!("Cancel {} order {}", symbol, order_id);
        let client = &self.client;
        let policy = self.guard.policy().with_max_retries(CANCEL_MAX_RETRIES);
        let result = self
            .guard
            .run_with_policy("cancel", RequestPriority::High, policy, move || {
                client.cancel_order(symbol, order_id)
            })
            .await;

        match result {
            Ok(()) => OrderOutcome {
                order_id: Some(order_id),
                ..OrderOutcome::ok(format!("Order cancelled: {} (id {})", symbol, order_id))
            },
            Err(e) => {
                warn!("Cancel of {} order {} failed: {}", symbol, order_id, e);
                OrderOutcome {
                    order_id: Some(order_id),
                    ..OrderOutcome::failed(&e, format!("Cancel failed: {}", e))
                }
            }
        }
    }

    /// Resting orders; empty when the call fails
    pub async fn open_orders(&self) -> Vec<OpenOrder> {
        let client = &self.client;
        self.guard
            .run("open_orders", RequestPriority::Low, move || client.open_orders())
            .await
            .unwrap_or_else(|e| {
                warn!("Open order refresh failed: {}", e);
                Vec::new()
            })
    }

    /// Non-zero positions; empty when the call fails
    pub async fn positions(&self) -> Vec<VenuePosition> {
        let client = &self.client;
        match self
            .guard
            .run("positions", RequestPriority::Normal, move || client.positions())
            .await
        {
            Ok(positions) => positions.into_iter().filter(|p| !p.size.is_zero()).collect(),
            Err(e) => {
                warn!("Position lookup failed: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn account_state(&self) -> Option<AccountState> {
        let client = &self.client;
        match self
            .guard
            .run("account_state", RequestPriority::Normal, move || {
                client.account_state()
            })
            .await
        {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Account lookup failed: {}", e);
                None
            }
        }
    }

    async fn find_position(&self, symbol: &str) -> Option<VenuePosition> {
        self.positions().await.into_iter().find(|p| p.symbol == symbol)
    }

    /// Flatten the whole position in `symbol` with a market order
    pub async fn close_position(&self, symbol: &str) -> OrderOutcome {
        let Some(position) = self.find_position(symbol).await else {
            return OrderOutcome::failed(
                "no position",
                format!("No open position in {}", symbol),
            );
        };

        let size = position.size.abs();
        let mut outcome = self
            .place_market_order(symbol, position.closing_side(), size)
            .await;
        if outcome.success {
            outcome.message = format!("Closed {} position ({})", symbol, size);
        }
        outcome
    }

    /// Reduce the position in `symbol` by `size`
    pub async fn close_position_partial(&self, symbol: &str, size: Decimal) -> OrderOutcome {
        let Some(position) = self.find_position(symbol).await else {
            return OrderOutcome::failed(
                "no position",
                format!("No open position in {}", symbol),
            );
        };

        let held = position.size.abs();
        if size > held {
            return OrderOutcome::failed(
                "size exceeds position",
                format!("Close size {} exceeds position {} in {}", size, held, symbol),
            );
        }

        let mut outcome = self
            .place_market_order(symbol, position.closing_side(), size)
            .await;
        if outcome.success {
            outcome.message = format!(
                "Partially closed {}: {} closed, {} left",
                symbol,
                size,
                held - size
            );
        }
        outcome
    }

    /// Flatten every open position concurrently.
    ///
    /// Succeeds when at least one close went through.
    pub async fn close_all_positions(&self) -> OrderOutcome {
        let positions = self.positions().await;
        if positions.is_empty() {
            return OrderOutcome::failed("no positions", "No positions to close".to_string());
        }

        info!("Closing {} positions", positions.len());
        let closes = positions.iter().map(|p| async move {
            let outcome = self
                .place_market_order(&p.symbol, p.closing_side(), p.size.abs())
                .await;
            (p.symbol.as_str(), outcome)
        });
        let results = join_all(closes).await;

        let errors: Vec<String> = results
            .iter()
            .filter(|(_, outcome)| !outcome.success)
            .map(|(symbol, outcome)| {
                format!(
                    "{}: {}",
                    symbol,
                    outcome.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        let closed = results.len() - errors.len();

        if errors.is_empty() {
            OrderOutcome::ok(format!("Closed all {} positions", closed))
        } else if closed == 0 {
            OrderOutcome::failed(
                errors.join(", "),
                format!("Failed to close any of {} positions", results.len()),
            )
        } else {
            OrderOutcome {
                error: Some(errors.join(", ")),
                ..OrderOutcome::ok(format!(
                    "Closed {} of {} positions",
                    closed,
                    results.len()
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VenueError;
    use crate::venue::traits::MockVenueClient;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::time::Duration;

    fn guarded(client: MockVenueClient) -> GuardedVenue<MockVenueClient> {
        GuardedVenue::new(
            client,
            RetryGuard::new(
                Arc::new(RateLimiter::with_defaults()),
                RetryPolicy {
                    max_retries: 5,
                    base_delay: Duration::from_millis(250),
                },
            ),
        )
    }

    fn position(symbol: &str, size: Decimal) -> VenuePosition {
        VenuePosition {
            symbol: symbol.to_string(),
            size,
            entry_price: dec!(1),
            unrealized_pnl: Decimal::ZERO,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_price_reads_mid() {
        let mut client = MockVenueClient::new();
        client
            .expect_all_mids()
            .times(1)
            .returning(|| Ok(HashMap::from([("HYPE".to_string(), dec!(21.5))])));

        let venue = guarded(client);
        assert_eq!(venue.price("HYPE").await, Some(dec!(21.5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_price_is_none_after_fatal_error() {
        let mut client = MockVenueClient::new();
        client.expect_all_mids().times(1).returning(|| {
            Err(VenueError::Http {
                status: 503,
                message: "maintenance".to_string(),
            })
        });

        let venue = guarded(client);
        assert_eq!(venue.price("HYPE").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_order_becomes_failed_outcome() {
        let mut client = MockVenueClient::new();
        client
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _| Err(VenueError::InsufficientMargin("need 50".to_string())));

        let venue = guarded(client);
        let outcome = venue.place_market_order("HYPE", Side::Buy, dec!(10)).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("need 50"));
        assert!(outcome.message.starts_with("Market order failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_gives_up_after_three_retries() {
        let mut client = MockVenueClient::new();
        client
            .expect_cancel_order()
            .times(4)
            .returning(|_, _| Err(VenueError::RateLimited("slow down".to_string())));

        let venue = guarded(client);
        let outcome = venue.cancel_order("HYPE", 77).await;
        assert!(!outcome.success);
        assert_eq!(outcome.order_id, Some(77));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_position_sends_opposite_side() {
        let mut client = MockVenueClient::new();
        client
            .expect_positions()
            .returning(|| Ok(vec![position("HYPE", dec!(-4)), position("BTC", Decimal::ZERO)]));
        client
            .expect_place_market_order()
            .withf(|symbol, side, size| {
                symbol.to_string() == "HYPE" && *side == Side::Buy && *size == dec!(4)
            })
            .times(1)
            .returning(|_, _, size| {
                Ok(OrderAck::Filled {
                    order_id: 1,
                    size,
                    avg_price: dec!(1.1),
                })
            });

        let venue = guarded(client);
        let outcome = venue.close_position("HYPE").await;
        assert!(outcome.success);
        assert_eq!(outcome.filled_price, Some(dec!(1.1)));
        assert!(!venue.close_position("BTC").await.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_close_rejects_oversize() {
        let mut client = MockVenueClient::new();
        client
            .expect_positions()
            .returning(|| Ok(vec![position("HYPE", dec!(3))]));
        client.expect_place_market_order().never();

        let venue = guarded(client);
        let outcome = venue.close_position_partial("HYPE", dec!(5)).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("exceeds"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_all_reports_partial_success() {
        let mut client = MockVenueClient::new();
        client
            .expect_positions()
            .returning(|| Ok(vec![position("HYPE", dec!(2)), position("ETH", dec!(1))]));
        client
            .expect_place_market_order()
            .times(2)
            .returning(|symbol, _, size| {
                if symbol.to_string() == "ETH" {
                    Err(VenueError::UnknownSymbol(symbol.to_string()))
                } else {
                    Ok(OrderAck::Filled {
                        order_id: 9,
                        size,
                        avg_price: dec!(1),
                    })
                }
            });

        let venue = guarded(client);
        let outcome = venue.close_all_positions().await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "Closed 1 of 2 positions");
        assert!(outcome.error.unwrap().starts_with("ETH"));
    }
}
