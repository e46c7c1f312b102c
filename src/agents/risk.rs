//! Risk Agent - per-trade cap and loss-streak circuit breaker
//!
//! OPEN: signals are approved, shrunk to the notional cap when needed.
//! BLOCKED: signals are discarded with a `cooldown` block until the clock
//! passes `blocked_until`. The way back to OPEN is lazy; it happens on the
//! first signal after the cooldown, not on a timer.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::bus::{Agent, BlockReason, Message, OrderTicket, Payload, PnlReport, RiskBlock};
use crate::clock::{system_clock, Clock};
use crate::config::RiskConfig;
use crate::error::{Result, SpeedTradeError};

/// Divisor floor when resizing against a near-zero price
const MIN_PRICE: Decimal = dec!(0.000000001);

/// Breaker mode as seen at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskMode {
    /// Signals are approved
    Open,
    /// Signals are discarded until the cooldown ends
    Blocked,
}

impl std::fmt::Display for RiskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskMode::Open => write!(f, "open"),
            RiskMode::Blocked => write!(f, "blocked"),
        }
    }
}

/// Breaker bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskState {
    pub consecutive_losses: u32,
    pub blocked_until: Option<DateTime<Utc>>,
}

pub struct RiskAgent {
    max_notional: Decimal,
    max_consecutive_losses: u32,
    cooldown: Duration,
    state: RiskState,
    clock: Rc<dyn Clock>,
}

impl RiskAgent {
    pub fn new(config: &RiskConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: &RiskConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            max_notional: config.max_notional_per_trade,
            max_consecutive_losses: config.max_consecutive_losses,
            cooldown: config.cooldown(),
            state: RiskState::default(),
            clock,
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.state.consecutive_losses
    }

    pub fn mode(&self) -> RiskMode {
        match self.state.blocked_until {
            Some(until) if self.clock.now() < until => RiskMode::Blocked,
            _ => RiskMode::Open,
        }
    }

    fn on_signal(&mut self, message: &Message, signal: &OrderTicket) -> Result<Message> {
        let now = self.clock.now();
        if let Some(until) = self.state.blocked_until {
            if now < until {
                warn!(
                    "Discarding {} {} signal: cooling down until {}",
                    signal.symbol, signal.side, until
                );
                return Ok(message.reply(Payload::RiskBlocked(RiskBlock {
                    reason: BlockReason::Cooldown,
                    until,
                })));
            }
            info!("Risk cooldown over, approvals resume");
            self.state.blocked_until = None;
        }

        let notional = signal.notional().ok_or_else(|| {
            SpeedTradeError::InvalidMarketData(format!(
                "notional of {} {} @ {} overflows",
                signal.size, signal.symbol, signal.price
            ))
        })?;

        let mut approved = signal.clone();
        if notional > self.max_notional {
            approved.size = self
                .max_notional
                .checked_div(signal.price.max(MIN_PRICE))
                .ok_or_else(|| {
                    SpeedTradeError::InvalidMarketData(format!(
                        "cannot resize {} signal at price {}",
                        signal.symbol, signal.price
                    ))
                })?;
            debug!(
                "Resized {} {} from {} to {} (cap {})",
                signal.symbol, signal.side, signal.size, approved.size, self.max_notional
            );
        }
        Ok(message.reply(Payload::RiskApproved(approved)))
    }

    fn on_pnl(&mut self, message: &Message, report: &PnlReport) -> Option<Message> {
        if report.pnl >= Decimal::ZERO {
            self.state.consecutive_losses = 0;
            return None;
        }

        self.state.consecutive_losses += 1;
        debug!(
            "Loss {} of {} in a row",
            self.state.consecutive_losses, self.max_consecutive_losses
        );
        if self.state.consecutive_losses < self.max_consecutive_losses {
            return None;
        }

        let until = self.clock.now() + self.cooldown;
        warn!(
            "{} consecutive losses, blocking approvals until {}",
            self.state.consecutive_losses, until
        );
        self.state.blocked_until = Some(until);
        self.state.consecutive_losses = 0;
        Some(message.reply(Payload::RiskBlocked(RiskBlock {
            reason: BlockReason::LossStreak,
            until,
        })))
    }
}

impl Agent for RiskAgent {
    fn name(&self) -> &str {
        "risk_manager"
    }

    fn on_message(&mut self, message: &Message) -> Result<Vec<Message>> {
        Ok(match message.payload() {
            Payload::StrategySignal(signal) => vec![self.on_signal(message, signal)?],
            Payload::AuditPnl(report) => self.on_pnl(message, report).into_iter().collect(),
            _ => Vec::new(),
        })
    }
}
