//! Market Data Agent - synthetic tick source
//!
//! Produces `market.tick` for one symbol from a drifting sine wave with
//! white noise. The agent has no thread of its own; the runner calls
//! [`MarketDataAgent::tick`] in its loop and ticks closer together than the
//! configured interval are skipped.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::rc::Rc;
use tracing::debug;
use uuid::Uuid;

use crate::bus::{Agent, Bus, MarketTick, Message, Payload};
use crate::clock::{system_clock, Clock};
use crate::config::MarketConfig;
use crate::error::{Result, SpeedTradeError};

/// Phase advance per emitted tick
const PHASE_STEP: f64 = 0.15;
/// Linear drift per unit of phase
const DRIFT: f64 = 0.0005;
/// Relative amplitude of the sine component
const AMPLITUDE: f64 = 0.01;
/// Half-width of the uniform noise band (0.25%)
const NOISE: f64 = 0.0025;
/// Prices never go below this
const PRICE_FLOOR: f64 = 0.0001;
/// Decimal places kept on generated prices
const PRICE_DP: u32 = 8;

pub struct MarketDataAgent {
    symbol: String,
    base_price: f64,
    interval: Duration,
    running: bool,
    phase: f64,
    last_tick: Option<DateTime<Utc>>,
    clock: Rc<dyn Clock>,
    rng: StdRng,
}

impl MarketDataAgent {
    pub fn new(config: &MarketConfig) -> Self {
        Self::with_clock(config, system_clock(), StdRng::from_entropy())
    }

    pub fn with_clock(config: &MarketConfig, clock: Rc<dyn Clock>, rng: StdRng) -> Self {
        Self {
            symbol: config.symbol.to_uppercase(),
            base_price: config.base_price.to_f64().unwrap_or(PRICE_FLOOR),
            interval: Duration::milliseconds(config.interval_ms as i64),
            running: false,
            phase: 0.0,
            last_tick: None,
            clock,
            rng,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Publish one tick if the agent is running and the interval has elapsed.
    ///
    /// Returns whether a tick was published.
    pub fn tick(&mut self, bus: &Bus) -> Result<bool> {
        match self.next_tick()? {
            Some(message) => {
                bus.publish(message)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn next_tick(&mut self) -> Result<Option<Message>> {
        if !self.running {
            return Ok(None);
        }

        let now = self.clock.now();
        if let Some(last) = self.last_tick {
            if now - last < self.interval {
                return Ok(None);
            }
        }
        self.last_tick = Some(now);

        self.phase += PHASE_STEP;
        let noise: f64 = self.rng.gen_range(-NOISE..=NOISE);
        let raw = self.base_price
            * (1.0 + DRIFT * self.phase)
            * (1.0 + AMPLITUDE * self.phase.sin())
            * (1.0 + noise);
        let price = Decimal::from_f64(raw.max(PRICE_FLOOR))
            .ok_or_else(|| {
                SpeedTradeError::InvalidMarketData(format!("unrepresentable price {raw}"))
            })?
            .round_dp(PRICE_DP);

        debug!("{} tick {} (phase {:.2})", self.symbol, price, self.phase);

        Ok(Some(
            Message::new(Payload::MarketTick(MarketTick {
                symbol: self.symbol.clone(),
                price,
                timestamp: now,
            }))
            .with_correlation_id(Uuid::new_v4().to_string()),
        ))
    }
}

impl Agent for MarketDataAgent {
    fn name(&self) -> &str {
        "market_data"
    }

    fn on_start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn on_message(&mut self, _message: &Message) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    fn on_stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }
}
