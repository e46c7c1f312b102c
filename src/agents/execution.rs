//! Execution Agent - dry-run fills
//!
//! Turns `risk.approved` into `execution.filled` at the approved price plus
//! a random slippage of up to 2 bp either way, and keeps the signed position
//! with its volume-weighted entry price.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bus::{Agent, FillReport, Message, OrderTicket, Payload, Side};
use crate::error::{Result, SpeedTradeError};

/// Slippage band half-width in basis points
const MAX_SLIPPAGE_BP: f64 = 2.0;
const BP: Decimal = dec!(0.0001);
/// Divisor floor for the VWAP update
const MIN_SIZE: Decimal = dec!(0.000000001);
/// Decimal places kept on execution prices
const PRICE_DP: u32 = 10;

/// Signed position with its average entry price.
///
/// `avg_price` is `None` exactly when `size` is zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub size: Decimal,
    pub avg_price: Option<Decimal>,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.size.is_zero()
    }

    /// Apply a fill of `size` on `side` at `price`.
    ///
    /// Adding to the position (or opening from flat) moves the average to the
    /// VWAP. A partial close keeps the average. A full close clears it and a
    /// reversal restarts it at the fill price. On overflow the position is
    /// left untouched.
    pub fn apply(&mut self, side: Side, size: Decimal, price: Decimal) -> Result<()> {
        let delta = side.sign() * size;
        if delta.is_zero() {
            return Ok(());
        }

        let next_size = self
            .size
            .checked_add(delta)
            .ok_or_else(|| overflow("position size", size, price))?;
        let reducing =
            !self.size.is_zero() && self.size.is_sign_negative() != delta.is_sign_negative();

        let next_avg = if !reducing {
            Some(match self.avg_price {
                Some(avg) => vwap(self.size.abs(), avg, delta.abs(), price)
                    .ok_or_else(|| overflow("average price", size, price))?,
                None => price,
            })
        } else if delta.abs() < self.size.abs() {
            self.avg_price
        } else if next_size.is_zero() {
            None
        } else {
            Some(price)
        };

        self.size = next_size;
        self.avg_price = next_avg;
        Ok(())
    }
}

fn vwap(held: Decimal, avg: Decimal, added: Decimal, price: Decimal) -> Option<Decimal> {
    let cost = held.checked_mul(avg)?.checked_add(added.checked_mul(price)?)?;
    cost.checked_div(held.checked_add(added)?.max(MIN_SIZE))
}

fn overflow(what: &str, size: Decimal, price: Decimal) -> SpeedTradeError {
    SpeedTradeError::InvalidMarketData(format!(
        "{} overflows on fill of {} @ {}",
        what, size, price
    ))
}

pub struct ExecutionAgent {
    position: Position,
    rng: StdRng,
}

impl ExecutionAgent {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            position: Position::default(),
            rng,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    fn slipped(&mut self, price: Decimal) -> Result<Decimal> {
        let bp: f64 = self.rng.gen_range(-MAX_SLIPPAGE_BP..=MAX_SLIPPAGE_BP);
        let bp = Decimal::from_f64(bp).unwrap_or(Decimal::ZERO);
        price
            .checked_mul(Decimal::ONE + bp * BP)
            .map(|p| p.round_dp(PRICE_DP))
            .ok_or_else(|| {
                SpeedTradeError::InvalidMarketData(format!("slipped price of {} overflows", price))
            })
    }

    fn fill(&mut self, order: &OrderTicket) -> Result<FillReport> {
        let exec_price = self.slipped(order.price)?;
        self.position.apply(order.side, order.size, exec_price)?;

        info!(
            "Filled {} {} {} @ {} (pos {}, avg {:?})",
            order.side,
            order.size.round_dp(6),
            order.symbol,
            exec_price,
            self.position.size.round_dp(6),
            self.position.avg_price.map(|p| p.round_dp(8))
        );

        Ok(FillReport {
            symbol: order.symbol.clone(),
            side: order.side,
            size: order.size,
            price: exec_price,
            position: self.position.size,
            avg_price: self.position.avg_price,
        })
    }
}

impl Default for ExecutionAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for ExecutionAgent {
    fn name(&self) -> &str {
        "execution_dryrun"
    }

    fn on_message(&mut self, message: &Message) -> Result<Vec<Message>> {
        let Payload::RiskApproved(order) = message.payload() else {
            return Ok(Vec::new());
        };
        debug!("Executing approved {} {}", order.side, order.symbol);
        let report = self.fill(order)?;
        Ok(vec![message.reply(Payload::ExecutionFilled(report))])
    }
}
