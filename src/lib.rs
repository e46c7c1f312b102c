pub mod agents;
pub mod bus;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod throttle;
pub mod venue;

pub use agents::{
    AuditAgent, ExecutionAgent, MarketDataAgent, Position, RiskAgent, RiskMode, ScalperAgent,
    TapeAgent,
};
pub use bus::{Agent, Bus, BusStats, Message, Payload, SharedAgent, Side, Topic};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::{Result, SpeedTradeError, VenueError};
pub use pipeline::{Pipeline, PipelineSummary};
pub use throttle::{RateLimiter, RequestPriority, RetryClass, RetryGuard, RetryPolicy, Retryable};
pub use venue::{GuardedVenue, OrderOutcome, PaperVenue, VenueClient};
