//! Pipeline wiring
//!
//! Builds the agents from [`AppConfig`], subscribes them to their topics and
//! drives the market agent. Routing:
//!
//! ```text
//! market.tick      -> strategy_scalper
//! strategy.signal  -> risk_manager
//! risk.approved    -> execution_dryrun
//! execution.filled -> audit_logger
//! audit.pnl        -> risk_manager
//! ```
//!
//! The tape follows every topic except ticks.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::info;

use crate::agents::{
    AuditAgent, ExecutionAgent, MarketDataAgent, RiskAgent, RiskMode, ScalperAgent, TapeAgent,
    TAPE_TOPICS,
};
use crate::bus::{as_shared, shared, Bus, BusStats, Message, SharedAgent, Topic};
use crate::clock::{system_clock, Clock};
use crate::config::AppConfig;
use crate::error::{Result, SpeedTradeError};

/// Snapshot of the pipeline state, printed when a run ends
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub symbol: String,
    pub ticks: u64,
    pub signals: u64,
    pub fills: u64,
    pub blocks: u64,
    pub position: Decimal,
    pub avg_price: Option<Decimal>,
    pub cum_pnl: Decimal,
    pub risk_mode: String,
}

pub struct Pipeline {
    bus: Bus,
    market: Rc<RefCell<MarketDataAgent>>,
    scalper: Rc<RefCell<ScalperAgent>>,
    risk: Rc<RefCell<RiskAgent>>,
    execution: Rc<RefCell<ExecutionAgent>>,
    audit: Rc<RefCell<AuditAgent>>,
    tape: Rc<RefCell<TapeAgent>>,
    agents: Vec<SharedAgent>,
}

impl Pipeline {
    /// Wire the pipeline on the system clock with entropy-seeded randomness
    pub fn new(config: &AppConfig) -> Result<Self> {
        Self::build(
            config,
            system_clock(),
            StdRng::from_entropy(),
            StdRng::from_entropy(),
        )
    }

    /// Wire the pipeline on `clock` with deterministic randomness
    pub fn with_clock(config: &AppConfig, clock: Rc<dyn Clock>, seed: u64) -> Result<Self> {
        Self::build(
            config,
            clock,
            StdRng::seed_from_u64(seed),
            StdRng::seed_from_u64(seed.wrapping_add(1)),
        )
    }

    fn build(
        config: &AppConfig,
        clock: Rc<dyn Clock>,
        market_rng: StdRng,
        fill_rng: StdRng,
    ) -> Result<Self> {
        config.validate().map_err(SpeedTradeError::InvalidConfig)?;

        let market = shared(MarketDataAgent::with_clock(
            &config.market,
            clock.clone(),
            market_rng,
        ));
        let symbol = market.borrow().symbol().to_string();
        let scalper = shared(ScalperAgent::new(&symbol, &config.strategy));
        let risk = shared(RiskAgent::with_clock(&config.risk, clock));
        let execution = shared(ExecutionAgent::with_rng(fill_rng));
        let audit = shared(AuditAgent::new());
        let tape = shared(TapeAgent::new());

        let bus = Bus::with_max_depth(config.bus.max_depth);
        bus.subscribe(Topic::MarketTick, as_shared(&scalper));
        bus.subscribe(Topic::StrategySignal, as_shared(&risk));
        bus.subscribe(Topic::RiskApproved, as_shared(&execution));
        bus.subscribe(Topic::ExecutionFilled, as_shared(&audit));
        bus.subscribe(Topic::AuditPnl, as_shared(&risk));
        for topic in TAPE_TOPICS {
            bus.subscribe(topic, as_shared(&tape));
        }

        let agents = vec![
            as_shared(&market),
            as_shared(&scalper),
            as_shared(&risk),
            as_shared(&execution),
            as_shared(&audit),
            as_shared(&tape),
        ];

        info!("Pipeline wired for {}", symbol);
        Ok(Self {
            bus,
            market,
            scalper,
            risk,
            execution,
            audit,
            tape,
            agents,
        })
    }

    pub fn start(&self) -> Result<()> {
        self.bus.start(&self.agents)
    }

    pub fn stop(&self) -> Result<()> {
        self.bus.stop(&self.agents)
    }

    pub fn is_running(&self) -> bool {
        self.bus.is_started()
    }

    /// Ask the market agent for one tick. Returns whether a tick went out.
    pub fn poll(&self) -> Result<bool> {
        let mut market = self
            .market
            .try_borrow_mut()
            .map_err(|_| SpeedTradeError::AgentFailure {
                agent: "market_data".to_string(),
                topic: Topic::MarketTick,
                reason: "market agent is busy".to_string(),
            })?;
        market.tick(&self.bus)
    }

    /// Inject a message from outside the pipeline
    pub fn publish(&self, message: Message) -> Result<()> {
        self.bus.publish(message)
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn stats(&self) -> BusStats {
        self.bus.stats()
    }

    pub fn market(&self) -> &Rc<RefCell<MarketDataAgent>> {
        &self.market
    }

    pub fn scalper(&self) -> &Rc<RefCell<ScalperAgent>> {
        &self.scalper
    }

    pub fn risk(&self) -> &Rc<RefCell<RiskAgent>> {
        &self.risk
    }

    pub fn execution(&self) -> &Rc<RefCell<ExecutionAgent>> {
        &self.execution
    }

    pub fn audit(&self) -> &Rc<RefCell<AuditAgent>> {
        &self.audit
    }

    pub fn tape(&self) -> &Rc<RefCell<TapeAgent>> {
        &self.tape
    }

    pub fn summary(&self) -> PipelineSummary {
        let stats = self.bus.stats();
        let count = |topic: Topic| stats.by_topic.get(&topic).copied().unwrap_or(0);
        let execution = self.execution.borrow();
        let position = execution.position();
        let mode: RiskMode = self.risk.borrow().mode();

        PipelineSummary {
            symbol: self.market.borrow().symbol().to_string(),
            ticks: count(Topic::MarketTick),
            signals: count(Topic::StrategySignal),
            fills: self.audit.borrow().fill_count(),
            blocks: count(Topic::RiskBlocked),
            position: position.size,
            avg_price: position.avg_price,
            cum_pnl: self.audit.borrow().cum_pnl(),
            risk_mode: mode.to_string(),
        }
    }
}
