use thiserror::Error;

use crate::bus::Topic;

/// Main error type for the trading pipeline
#[derive(Error, Debug)]
pub enum SpeedTradeError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Message bus errors
    #[error("Missing field `{field}` in {topic} payload")]
    MissingField { topic: Topic, field: String },

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Publish cascade exceeded depth {limit} at topic {topic}")]
    CascadeDepthExceeded { topic: Topic, limit: usize },

    #[error("Agent {agent} failed on {topic}: {reason}")]
    AgentFailure {
        agent: String,
        topic: Topic,
        reason: String,
    },

    #[error("Invalid market data: {0}")]
    InvalidMarketData(String),

    // External venue errors
    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for SpeedTradeError
pub type Result<T> = std::result::Result<T, SpeedTradeError>;

/// Errors raised by a venue client, before the retry guard classifies them
#[derive(Error, Debug)]
pub enum VenueError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Insufficient margin: {0}")]
    InsufficientMargin(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Order not found: {0}")]
    OrderNotFound(u64),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_lists_every_problem() {
        let err = SpeedTradeError::InvalidConfig(vec![
            "risk.max_notional must be positive".to_string(),
            "strategy.short must be at least 1".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("max_notional"));
        assert!(msg.contains("strategy.short"));
    }

    #[test]
    fn test_venue_error_converts() {
        let err: SpeedTradeError = VenueError::Rejected("post only".to_string()).into();
        assert!(matches!(err, SpeedTradeError::Venue(VenueError::Rejected(_))));
        assert_eq!(err.to_string(), "Venue error: Order rejected: post only");
    }
}
