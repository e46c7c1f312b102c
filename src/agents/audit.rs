//! Audit Agent - rough per-fill PnL
//!
//! Compares each fill with the previous fill price: a sell above the last
//! fill counts as a gain, a buy above it as a loss. This is a two-price
//! heuristic that ignores position and cost basis; it feeds the risk
//! agent's loss-streak breaker, not the books.

use rust_decimal::Decimal;
use tracing::info;

use crate::bus::{Agent, FillReport, Message, Payload, PnlReport, Side};
use crate::error::{Result, SpeedTradeError};

#[derive(Debug, Default)]
pub struct AuditAgent {
    last_fill_price: Option<Decimal>,
    cum_pnl: Decimal,
    fill_count: u64,
}

impl AuditAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cum_pnl(&self) -> Decimal {
        self.cum_pnl
    }

    pub fn fill_count(&self) -> u64 {
        self.fill_count
    }

    pub fn last_fill_price(&self) -> Option<Decimal> {
        self.last_fill_price
    }

    fn record(&mut self, fill: &FillReport) -> Result<PnlReport> {
        let pnl = match self.last_fill_price {
            Some(last) => match fill.side {
                Side::Sell => fill.price.checked_sub(last),
                Side::Buy => last.checked_sub(fill.price),
            }
            .and_then(|diff| diff.checked_mul(fill.size)),
            None => Some(Decimal::ZERO),
        };
        let (pnl, cum_pnl) = pnl
            .and_then(|pnl| self.cum_pnl.checked_add(pnl).map(|cum| (pnl, cum)))
            .ok_or_else(|| {
                SpeedTradeError::InvalidMarketData(format!(
                    "pnl of {} {} @ {} overflows",
                    fill.side, fill.size, fill.price
                ))
            })?;

        self.last_fill_price = Some(fill.price);
        self.cum_pnl = cum_pnl;
        self.fill_count += 1;

        info!(
            "Fill #{}: pnl {} cum {}",
            self.fill_count,
            pnl.round_dp(6),
            self.cum_pnl.round_dp(6)
        );

        Ok(PnlReport {
            pnl,
            cum_pnl: self.cum_pnl,
        })
    }
}

impl Agent for AuditAgent {
    fn name(&self) -> &str {
        "audit_logger"
    }

    fn on_message(&mut self, message: &Message) -> Result<Vec<Message>> {
        match message.payload() {
            Payload::ExecutionFilled(fill) => {
                let report = self.record(fill)?;
                Ok(vec![message.reply(Payload::AuditPnl(report))])
            }
            _ => Ok(Vec::new()),
        }
    }
}
