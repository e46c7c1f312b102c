//! In-memory venue for dry runs
//!
//! Market orders fill at the current mid. Limit orders that cross the mid
//! fill at once at the mid; the rest wait on the book and fill at their
//! limit when [`PaperVenue::set_mid`] moves the price through them.
//! Accounting is 1x: margin used is the mark value of all positions.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::traits::{AccountState, OpenOrder, OrderAck, VenueClient, VenuePosition, VenueResult};
use crate::agents::Position;
use crate::bus::Side;
use crate::error::VenueError;

#[derive(Debug, Default)]
struct Book {
    mids: HashMap<String, Decimal>,
    positions: BTreeMap<String, Position>,
    resting: BTreeMap<u64, OpenOrder>,
    next_order_id: u64,
    collateral: Decimal,
}

impl Book {
    fn next_id(&mut self) -> u64 {
        self.next_order_id += 1;
        self.next_order_id
    }

    fn mid(&self, symbol: &str) -> VenueResult<Decimal> {
        self.mids
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))
    }

    fn unrealized(&self) -> Decimal {
        self.positions
            .iter()
            .filter_map(|(symbol, pos)| {
                let mid = self.mids.get(symbol)?;
                let avg = pos.avg_price?;
                Some((*mid - avg) * pos.size)
            })
            .sum()
    }

    fn margin_used(&self) -> Decimal {
        self.positions
            .iter()
            .filter_map(|(symbol, pos)| Some(pos.size.abs() * *self.mids.get(symbol)?))
            .sum()
    }

    fn account(&self) -> AccountState {
        let account_value = self.collateral + self.unrealized();
        let margin_used = self.margin_used();
        AccountState {
            account_value,
            margin_used,
            withdrawable: (account_value - margin_used).max(Decimal::ZERO),
        }
    }

    /// Apply a fill and book any realized PnL into collateral
    fn fill(
        &mut self,
        symbol: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
    ) -> VenueResult<()> {
        let overflow = || VenueError::Rejected(format!("fill of {} @ {} overflows", size, price));
        let mut pos = self.positions.get(symbol).cloned().unwrap_or_default();
        let delta = side.sign() * size;

        let mut realized = Decimal::ZERO;
        if let Some(avg) = pos.avg_price {
            if !pos.size.is_zero() && pos.size.is_sign_negative() != delta.is_sign_negative() {
                let closed = delta.abs().min(pos.size.abs());
                let per_unit = price.checked_sub(avg).ok_or_else(overflow)?;
                realized = per_unit.checked_mul(closed).ok_or_else(overflow)?;
                if pos.size.is_sign_negative() {
                    realized = -realized;
                }
            }
        }
        let collateral = self.collateral.checked_add(realized).ok_or_else(overflow)?;
        pos.apply(side, size, price)
            .map_err(|e| VenueError::Rejected(e.to_string()))?;

        self.collateral = collateral;
        if pos.is_flat() {
            self.positions.remove(symbol);
        } else {
            self.positions.insert(symbol.to_string(), pos);
        }
        debug!("Paper fill {} {} {} @ {}", side, size, symbol, price);
        Ok(())
    }

    /// Reject exposure-increasing orders the account cannot carry
    fn check_margin(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
    ) -> VenueResult<()> {
        let increases = match self.positions.get(symbol) {
            Some(pos) if !pos.is_flat() => pos.size.is_sign_negative() == (side == Side::Sell),
            _ => true,
        };
        let notional = size.checked_mul(price).ok_or_else(|| {
            VenueError::Rejected(format!("notional of {} @ {} overflows", size, price))
        })?;
        let available = self.account().withdrawable;
        if increases && notional > available {
            return Err(VenueError::InsufficientMargin(format!(
                "order notional {} exceeds withdrawable {}",
                notional.round_dp(4),
                available.round_dp(4)
            )));
        }
        Ok(())
    }

    fn crosses(side: Side, limit_price: Decimal, mid: Decimal) -> bool {
        match side {
            Side::Buy => limit_price >= mid,
            Side::Sell => limit_price <= mid,
        }
    }
}

/// Dry-run [`VenueClient`]
#[derive(Debug)]
pub struct PaperVenue {
    book: Mutex<Book>,
}

impl Default for PaperVenue {
    fn default() -> Self {
        Self::new(dec!(10000))
    }
}

impl PaperVenue {
    pub fn new(collateral: Decimal) -> Self {
        Self {
            book: Mutex::new(Book {
                collateral,
                ..Book::default()
            }),
        }
    }

    fn book(&self) -> VenueResult<MutexGuard<'_, Book>> {
        self.book
            .lock()
            .map_err(|_| VenueError::Other("paper book lock poisoned".to_string()))
    }

    /// Move the mid for `symbol` and fill any resting order it crosses
    pub fn set_mid(&self, symbol: &str, mid: Decimal) -> VenueResult<()> {
        let mut book = self.book()?;
        book.mids.insert(symbol.to_string(), mid);

        let crossed: Vec<OpenOrder> = book
            .resting
            .values()
            .filter(|o| o.symbol == symbol && Book::crosses(o.side, o.limit_price, mid))
            .cloned()
            .collect();
        for order in crossed {
            book.fill(&order.symbol, order.side, order.size, order.limit_price)?;
            book.resting.remove(&order.order_id);
        }
        Ok(())
    }
}

#[async_trait]
impl VenueClient for PaperVenue {
    async fn all_mids(&self) -> VenueResult<HashMap<String, Decimal>> {
        Ok(self.book()?.mids.clone())
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
        limit_price: Decimal,
    ) -> VenueResult<OrderAck> {
        if size <= Decimal::ZERO || limit_price <= Decimal::ZERO {
            return Err(VenueError::Rejected(format!(
                "invalid size {} or price {}",
                size, limit_price
            )));
        }

        let mut book = self.book()?;
        let mid = book.mid(symbol)?;
        let order_id = book.next_id();

        if Book::crosses(side, limit_price, mid) {
            book.check_margin(symbol, side, size, mid)?;
            book.fill(symbol, side, size, mid)?;
            return Ok(OrderAck::Filled {
                order_id,
                size,
                avg_price: mid,
            });
        }

        book.check_margin(symbol, side, size, limit_price)?;
        book.resting.insert(
            order_id,
            OpenOrder {
                order_id,
                symbol: symbol.to_string(),
                side,
                size,
                limit_price,
            },
        );
        Ok(OrderAck::Resting { order_id })
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
    ) -> VenueResult<OrderAck> {
        if size <= Decimal::ZERO {
            return Err(VenueError::Rejected(format!("invalid size {}", size)));
        }

        let mut book = self.book()?;
        let mid = book.mid(symbol)?;
        book.check_margin(symbol, side, size, mid)?;
        let order_id = book.next_id();
        book.fill(symbol, side, size, mid)?;
        Ok(OrderAck::Filled {
            order_id,
            size,
            avg_price: mid,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> VenueResult<()> {
        let mut book = self.book()?;
        let owned = book
            .resting
            .get(&order_id)
            .is_some_and(|order| order.symbol == symbol);
        if !owned {
            return Err(VenueError::OrderNotFound(order_id));
        }
        book.resting.remove(&order_id);
        Ok(())
    }

    async fn open_orders(&self) -> VenueResult<Vec<OpenOrder>> {
        Ok(self.book()?.resting.values().cloned().collect())
    }

    async fn positions(&self) -> VenueResult<Vec<VenuePosition>> {
        let book = self.book()?;
        Ok(book
            .positions
            .iter()
            .map(|(symbol, pos)| {
                let entry_price = pos.avg_price.unwrap_or(Decimal::ZERO);
                let unrealized_pnl = book
                    .mids
                    .get(symbol)
                    .map(|mid| (*mid - entry_price) * pos.size)
                    .unwrap_or(Decimal::ZERO);
                VenuePosition {
                    symbol: symbol.clone(),
                    size: pos.size,
                    entry_price,
                    unrealized_pnl,
                }
            })
            .collect())
    }

    async fn account_state(&self) -> VenueResult<AccountState> {
        Ok(self.book()?.account())
    }
}
