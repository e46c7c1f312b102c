//! Tape Agent - writes pipeline events to the log

use std::collections::HashMap;
use tracing::{info, warn};

use crate::bus::{Agent, Message, Payload, Topic};
use crate::error::Result;

/// Topics the tape follows by default. Ticks are left out; they are
/// already logged at debug level by the market agent.
pub const TAPE_TOPICS: [Topic; 5] = [
    Topic::StrategySignal,
    Topic::RiskApproved,
    Topic::ExecutionFilled,
    Topic::RiskBlocked,
    Topic::AuditPnl,
];

#[derive(Debug, Default)]
pub struct TapeAgent {
    counts: HashMap<Topic, u64>,
}

impl TapeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages seen on `topic`
    pub fn count(&self, topic: Topic) -> u64 {
        self.counts.get(&topic).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

impl Agent for TapeAgent {
    fn name(&self) -> &str {
        "tape"
    }

    fn on_start(&mut self) -> Result<()> {
        info!("Tape recording");
        Ok(())
    }

    fn on_message(&mut self, message: &Message) -> Result<Vec<Message>> {
        *self.counts.entry(message.topic()).or_insert(0) += 1;
        let cid = message.correlation_id().unwrap_or("-");

        match message.payload() {
            Payload::MarketTick(t) => info!(cid, "[TICK]   {} {}", t.symbol, t.price),
            Payload::StrategySignal(s) => {
                info!(cid, "[SIGNAL] {} {} {} @ {}", s.side, s.size, s.symbol, s.price)
            }
            Payload::RiskApproved(a) => info!(
                cid,
                "[RISK]   {} {} {} @ {}",
                a.side,
                a.size.round_dp(6),
                a.symbol,
                a.price
            ),
            Payload::RiskBlocked(b) => warn!(cid, "[BLOCK]  {} until {}", b.reason, b.until),
            Payload::ExecutionFilled(f) => info!(
                cid,
                "[FILL]   {} {} {} @ {} pos={} avg={}",
                f.side,
                f.size.round_dp(6),
                f.symbol,
                f.price,
                f.position.round_dp(6),
                f.avg_price
                    .map(|p| p.round_dp(8).to_string())
                    .unwrap_or_else(|| "-".to_string())
            ),
            Payload::AuditPnl(p) => info!(
                cid,
                "[PNL]    {} (cum {})",
                p.pnl.round_dp(6),
                p.cum_pnl.round_dp(6)
            ),
        }
        Ok(Vec::new())
    }

    fn on_stop(&mut self) -> Result<()> {
        info!("Tape stopped after {} events", self.total());
        Ok(())
    }
}
