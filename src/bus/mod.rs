//! Message Bus
//!
//! Topic-keyed, synchronous publish/subscribe between pipeline agents.

mod router;
mod traits;
mod types;

pub use router::{as_shared, Bus, BusStats, DEFAULT_MAX_DEPTH};
pub use traits::{shared, Agent, SharedAgent};
pub use types::{
    BlockReason, FillReport, MarketTick, Message, OrderTicket, Payload, PnlReport, RiskBlock,
    Side, Topic,
};
