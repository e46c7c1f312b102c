//! Message model for the agent bus
//!
//! Every topic has exactly one payload type, so the topic of a message is
//! derived from its payload and handlers never look fields up by name.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Result, SpeedTradeError};

/// Routing key for bus messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "market.tick")]
    MarketTick,
    #[serde(rename = "strategy.signal")]
    StrategySignal,
    #[serde(rename = "risk.approved")]
    RiskApproved,
    #[serde(rename = "risk.blocked")]
    RiskBlocked,
    #[serde(rename = "execution.filled")]
    ExecutionFilled,
    #[serde(rename = "audit.pnl")]
    AuditPnl,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::MarketTick,
        Topic::StrategySignal,
        Topic::RiskApproved,
        Topic::RiskBlocked,
        Topic::ExecutionFilled,
        Topic::AuditPnl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::MarketTick => "market.tick",
            Topic::StrategySignal => "strategy.signal",
            Topic::RiskApproved => "risk.approved",
            Topic::RiskBlocked => "risk.blocked",
            Topic::ExecutionFilled => "execution.filled",
            Topic::AuditPnl => "audit.pnl",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Topic {
    type Err = SpeedTradeError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == normalized)
            .ok_or_else(|| SpeedTradeError::UnknownTopic(raw.to_string()))
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// `market.tick`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// `strategy.signal` and `risk.approved`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
}

impl OrderTicket {
    /// Price times size, `None` on overflow
    pub fn notional(&self) -> Option<Decimal> {
        self.price.checked_mul(self.size)
    }
}

/// Why the risk agent refused to approve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// A signal arrived while the breaker was still cooling down
    Cooldown,
    /// The consecutive loss threshold was reached
    LossStreak,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::Cooldown => write!(f, "cooldown"),
            BlockReason::LossStreak => write!(f, "loss_streak"),
        }
    }
}

/// `risk.blocked`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBlock {
    pub reason: BlockReason,
    pub until: DateTime<Utc>,
}

/// `execution.filled`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    /// Signed position after the fill
    pub position: Decimal,
    /// None when flat
    pub avg_price: Option<Decimal>,
}

/// `audit.pnl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlReport {
    pub pnl: Decimal,
    pub cum_pnl: Decimal,
}

/// Typed payload, one variant per topic
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    MarketTick(MarketTick),
    StrategySignal(OrderTicket),
    RiskApproved(OrderTicket),
    RiskBlocked(RiskBlock),
    ExecutionFilled(FillReport),
    AuditPnl(PnlReport),
}

impl Payload {
    pub fn topic(&self) -> Topic {
        match self {
            Payload::MarketTick(_) => Topic::MarketTick,
            Payload::StrategySignal(_) => Topic::StrategySignal,
            Payload::RiskApproved(_) => Topic::RiskApproved,
            Payload::RiskBlocked(_) => Topic::RiskBlocked,
            Payload::ExecutionFilled(_) => Topic::ExecutionFilled,
            Payload::AuditPnl(_) => Topic::AuditPnl,
        }
    }

    /// Decode an untyped payload for the given topic.
    ///
    /// A missing key becomes [`SpeedTradeError::MissingField`] instead of a
    /// generic decode failure.
    pub fn from_json(topic: Topic, value: serde_json::Value) -> Result<Self> {
        Ok(match topic {
            Topic::MarketTick => Payload::MarketTick(decode(topic, value)?),
            Topic::StrategySignal => Payload::StrategySignal(decode(topic, value)?),
            Topic::RiskApproved => Payload::RiskApproved(decode(topic, value)?),
            Topic::RiskBlocked => Payload::RiskBlocked(decode(topic, value)?),
            Topic::ExecutionFilled => Payload::ExecutionFilled(decode(topic, value)?),
            Topic::AuditPnl => Payload::AuditPnl(decode(topic, value)?),
        })
    }
}

fn decode<T: DeserializeOwned>(topic: Topic, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        let msg = e.to_string();
        match msg
            .strip_prefix("missing field `")
            .and_then(|rest| rest.split('`').next())
        {
            Some(field) => SpeedTradeError::MissingField {
                topic,
                field: field.to_string(),
            },
            None => SpeedTradeError::Json(e),
        }
    })
}

/// Immutable event envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    topic: Topic,
    payload: Payload,
    correlation_id: Option<String>,
}

impl Message {
    pub fn new(payload: Payload) -> Self {
        Self {
            topic: payload.topic(),
            payload,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// A follow-up message carrying this message's correlation id
    pub fn reply(&self, payload: Payload) -> Self {
        Self {
            topic: payload.topic(),
            payload,
            correlation_id: self.correlation_id.clone(),
        }
    }

    /// Build a message from a topic name and an untyped JSON payload
    pub fn from_json(topic: &str, payload: serde_json::Value) -> Result<Self> {
        let topic = Topic::from_str(topic)?;
        Ok(Self::new(Payload::from_json(topic, payload)?))
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}
