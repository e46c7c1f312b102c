use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Instrument the whole pipeline trades (e.g., "HYPE")
    pub symbol: String,
    /// Anchor price for the synthetic feed
    pub base_price: Decimal,
    /// Minimum spacing between ticks in milliseconds
    pub interval_ms: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            symbol: "HYPE".to_string(),
            base_price: dec!(1.0),
            interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Short moving-average window (ticks)
    pub short: usize,
    /// Long moving-average window (ticks)
    pub long: usize,
    /// Order size attached to every signal
    pub size: Decimal,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            short: 5,
            long: 20,
            size: dec!(50),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Per-trade notional cap in USD; larger signals are shrunk to fit
    pub max_notional_per_trade: Decimal,
    /// Losing fills in a row that trip the breaker
    pub max_consecutive_losses: u32,
    /// How long the breaker stays blocked (seconds)
    pub cooldown_secs: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_notional_per_trade: dec!(150),
            max_consecutive_losses: 3,
            cooldown_secs: 10,
        }
    }
}

impl RiskConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls allowed per period
    pub max_calls: usize,
    /// Sliding window length in seconds
    pub period_secs: u64,
    /// Let high-priority calls skip long waits
    pub priority_bypass: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 12,
            period_secs: 60,
            priority_bypass: true,
        }
    }
}

impl RateLimitConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Nested publishes allowed within one cascade
    pub max_depth: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_depth: crate::bus::DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rotated log files here
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SPEEDTRADE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SPEEDTRADE_RISK__COOLDOWN_SECS, etc.)
            .add_source(
                Environment::with_prefix("SPEEDTRADE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.market.symbol.trim().is_empty() {
            errors.push("market.symbol must not be empty".to_string());
        }

        if self.market.base_price <= Decimal::ZERO {
            errors.push("market.base_price must be positive".to_string());
        }

        if self.strategy.short == 0 || self.strategy.long == 0 {
            errors.push("strategy.short and strategy.long must be at least 1".to_string());
        }

        if self.strategy.size <= Decimal::ZERO {
            errors.push("strategy.size must be positive".to_string());
        }

        if self.risk.max_notional_per_trade <= Decimal::ZERO {
            errors.push("risk.max_notional_per_trade must be positive".to_string());
        }

        if self.risk.max_consecutive_losses == 0 {
            errors.push("risk.max_consecutive_losses must be at least 1".to_string());
        }

        if self.rate_limit.max_calls == 0 {
            errors.push("rate_limit.max_calls must be at least 1".to_string());
        }

        if self.rate_limit.period_secs == 0 {
            errors.push("rate_limit.period_secs must be at least 1".to_string());
        }

        if self.bus.max_depth == 0 {
            errors.push("bus.max_depth must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.rate_limit.max_calls, 12);
        assert_eq!(cfg.rate_limit.period(), Duration::from_secs(60));
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.risk.cooldown(), chrono::Duration::seconds(10));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut cfg = AppConfig::default();
        cfg.strategy.short = 0;
        cfg.risk.max_notional_per_trade = Decimal::ZERO;
        cfg.rate_limit.max_calls = 0;

        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("max_notional")));
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let cfg = AppConfig::load_from("/nonexistent/speedtrade-config").unwrap();
        assert_eq!(cfg.market.symbol, "HYPE");
        assert_eq!(cfg.strategy.long, 20);
    }
}
