//! Pipeline agents
//!
//! Each agent implements [`crate::bus::Agent`] and reacts to one or two
//! topics. None of them hold a reference to the bus; they return the
//! messages they emit and the bus routes them.

pub mod audit;
pub mod execution;
pub mod market_data;
pub mod risk;
pub mod scalper;
pub mod tape;

pub use audit::AuditAgent;
pub use execution::{ExecutionAgent, Position};
pub use market_data::MarketDataAgent;
pub use risk::{RiskAgent, RiskMode, RiskState};
pub use scalper::ScalperAgent;
pub use tape::{TapeAgent, TAPE_TOPICS};
