//! Message Bus - synchronous topic router
//!
//! `publish` delivers to a snapshot of the topic's subscribers in
//! subscription order. Messages returned by a handler are published before
//! the next subscriber runs, so a cascade resolves depth-first before the
//! outermost `publish` returns.
//!
//! Failure policy is fail-fast: the first handler error aborts the cascade
//! and is returned to the outermost caller unchanged.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, info, warn};

use super::traits::SharedAgent;
use super::types::{Message, Topic};
use crate::error::{Result, SpeedTradeError};

/// Default bound on nested publishes within one cascade
pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Clone)]
struct Subscriber {
    name: String,
    agent: SharedAgent,
}

/// Delivery counters
#[derive(Debug, Default, Clone)]
pub struct BusStats {
    /// Messages passed to `publish`, nested ones included
    pub published: u64,
    /// Successful handler invocations
    pub delivered: u64,
    /// Messages whose topic had no subscriber
    pub unrouted: u64,
    /// Messages by topic
    pub by_topic: HashMap<Topic, u64>,
}

/// Synchronous publish/subscribe dispatcher
pub struct Bus {
    subscribers: RefCell<HashMap<Topic, Vec<Subscriber>>>,
    started: Cell<bool>,
    depth: Cell<usize>,
    max_depth: usize,
    stats: RefCell<BusStats>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            subscribers: RefCell::new(HashMap::new()),
            started: Cell::new(false),
            depth: Cell::new(0),
            max_depth,
            stats: RefCell::new(BusStats::default()),
        }
    }

    /// Register `agent` for `topic`. The same agent may subscribe to many topics.
    pub fn subscribe(&self, topic: Topic, agent: SharedAgent) {
        let name = agent.borrow().name().to_string();
        debug!("Subscribing {} to {}", name, topic);
        self.subscribers
            .borrow_mut()
            .entry(topic)
            .or_default()
            .push(Subscriber { name, agent });
    }

    /// Deliver `message` and everything it triggers.
    pub fn publish(&self, message: Message) -> Result<()> {
        let depth = self.depth.get();
        if depth >= self.max_depth {
            warn!(
                "Cascade depth {} reached while publishing {}",
                self.max_depth,
                message.topic()
            );
            return Err(SpeedTradeError::CascadeDepthExceeded {
                topic: message.topic(),
                limit: self.max_depth,
            });
        }

        self.depth.set(depth + 1);
        let result = self.deliver(&message);
        self.depth.set(depth);
        result
    }

    fn deliver(&self, message: &Message) -> Result<()> {
        let topic = message.topic();
        {
            let mut stats = self.stats.borrow_mut();
            stats.published += 1;
            *stats.by_topic.entry(topic).or_insert(0) += 1;
        }

        // Snapshot so handlers can subscribe without invalidating the iteration
        let targets = match self.subscribers.borrow().get(&topic) {
            Some(subs) if !subs.is_empty() => subs.clone(),
            _ => {
                self.stats.borrow_mut().unrouted += 1;
                debug!("No subscribers for {}", topic);
                return Ok(());
            }
        };

        for sub in targets {
            let outputs = {
                let mut agent = sub.agent.try_borrow_mut().map_err(|_| {
                    SpeedTradeError::AgentFailure {
                        agent: sub.name.clone(),
                        topic,
                        reason: "agent is already handling a message".to_string(),
                    }
                })?;
                agent.on_message(message).map_err(|e| {
                    warn!("Agent {} failed on {}: {}", sub.name, topic, e);
                    e
                })?
            };
            self.stats.borrow_mut().delivered += 1;

            if !outputs.is_empty() {
                debug!("Agent {} emitted {} message(s) on {}", sub.name, outputs.len(), topic);
            }
            for out in outputs {
                self.publish(out)?;
            }
        }

        Ok(())
    }

    /// Call `on_start` on every agent. A second call without `stop` is a no-op.
    ///
    /// If an agent fails to start, the agents already started are stopped in
    /// reverse order and the bus stays stopped, so `start` can be retried.
    pub fn start(&self, agents: &[SharedAgent]) -> Result<()> {
        if self.started.get() {
            return Ok(());
        }
        for (index, agent) in agents.iter().enumerate() {
            let result = {
                let mut agent = agent.borrow_mut();
                info!("Starting agent {}", agent.name());
                agent.on_start()
            };
            if let Err(e) = result {
                warn!(
                    "Agent start failed ({}), stopping {} started agent(s)",
                    e, index
                );
                for started in agents[..index].iter().rev() {
                    let mut started = started.borrow_mut();
                    if let Err(stop_err) = started.on_stop() {
                        warn!("Agent {} failed to stop: {}", started.name(), stop_err);
                    }
                }
                return Err(e);
            }
        }
        self.started.set(true);
        Ok(())
    }

    /// Call `on_stop` on every agent. A no-op unless started.
    pub fn stop(&self, agents: &[SharedAgent]) -> Result<()> {
        if !self.started.get() {
            return Ok(());
        }
        for agent in agents {
            let mut agent = agent.borrow_mut();
            info!("Stopping agent {}", agent.name());
            agent.on_stop()?;
        }
        self.started.set(false);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.get()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .borrow()
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Names of the agents subscribed to `topic`, in delivery order
    pub fn subscribers(&self, topic: Topic) -> Vec<String> {
        self.subscribers
            .borrow()
            .get(&topic)
            .map(|subs| subs.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> BusStats {
        self.stats.borrow().clone()
    }
}

/// Helper so tests and callers can pass a typed handle where a `SharedAgent` is expected
pub fn as_shared<A: super::traits::Agent + 'static>(agent: &Rc<RefCell<A>>) -> SharedAgent {
    agent.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::traits::{shared, Agent};
    use crate::bus::types::{Payload, PnlReport};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn pnl(value: Decimal) -> Message {
        Message::new(Payload::AuditPnl(PnlReport {
            pnl: value,
            cum_pnl: value,
        }))
    }

    /// Records what it sees into a shared journal and optionally re-emits
    struct Recorder {
        name: String,
        journal: Rc<RefCell<Vec<String>>>,
        emit: Option<Decimal>,
        fail: bool,
        fail_start: bool,
        starts: u32,
        stops: u32,
    }

    impl Recorder {
        fn new(name: &str, journal: &Rc<RefCell<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                journal: journal.clone(),
                emit: None,
                fail: false,
                fail_start: false,
                starts: 0,
                stops: 0,
            }
        }
    }

    impl Agent for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_start(&mut self) -> Result<()> {
            self.journal.borrow_mut().push(format!("{}:start", self.name));
            if self.fail_start {
                return Err(SpeedTradeError::InvalidMarketData("no feed".to_string()));
            }
            self.starts += 1;
            Ok(())
        }

        fn on_message(&mut self, message: &Message) -> Result<Vec<Message>> {
            self.journal
                .borrow_mut()
                .push(format!("{}:{}", self.name, message.topic()));
            if self.fail {
                return Err(SpeedTradeError::InvalidMarketData("boom".to_string()));
            }
            Ok(self.emit.take().map(pnl).into_iter().collect())
        }

        fn on_stop(&mut self) -> Result<()> {
            self.journal.borrow_mut().push(format!("{}:stop", self.name));
            self.stops += 1;
            Ok(())
        }
    }

    #[test]
    fn test_unmatched_topic_is_noop() {
        let bus = Bus::new();
        bus.publish(pnl(dec!(1))).unwrap();
        let stats = bus.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.unrouted, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[test]
    fn test_delivery_follows_subscription_order() {
        let journal = Rc::new(RefCell::new(Vec::new()));
        let bus = Bus::new();
        let first = shared(Recorder::new("first", &journal));
        let second = shared(Recorder::new("second", &journal));
        bus.subscribe(Topic::AuditPnl, first.clone());
        bus.subscribe(Topic::AuditPnl, second.clone());

        bus.publish(pnl(dec!(1))).unwrap();

        assert_eq!(
            *journal.borrow(),
            vec!["first:audit.pnl".to_string(), "second:audit.pnl".to_string()]
        );
        assert_eq!(bus.subscribers(Topic::AuditPnl), vec!["first", "second"]);
    }

    #[test]
    fn test_cascade_resolves_before_next_subscriber() {
        let journal = Rc::new(RefCell::new(Vec::new()));
        let bus = Bus::new();

        // first re-emits once; the nested delivery reaches both subscribers
        // before second sees the original message
        let mut first = Recorder::new("first", &journal);
        first.emit = Some(dec!(2));
        let first = shared(first);
        let second = shared(Recorder::new("second", &journal));
        bus.subscribe(Topic::AuditPnl, first.clone());
        bus.subscribe(Topic::AuditPnl, second.clone());

        bus.publish(pnl(dec!(1))).unwrap();

        assert_eq!(
            *journal.borrow(),
            vec![
                "first:audit.pnl".to_string(),
                "first:audit.pnl".to_string(),
                "second:audit.pnl".to_string(),
                "second:audit.pnl".to_string(),
            ]
        );
        assert_eq!(bus.stats().published, 2);
    }

    #[test]
    fn test_handler_error_aborts_cascade() {
        let journal = Rc::new(RefCell::new(Vec::new()));
        let bus = Bus::new();
        let mut failing = Recorder::new("failing", &journal);
        failing.fail = true;
        let failing = shared(failing);
        let after = shared(Recorder::new("after", &journal));
        bus.subscribe(Topic::AuditPnl, failing.clone());
        bus.subscribe(Topic::AuditPnl, after.clone());

        let err = bus.publish(pnl(dec!(1))).unwrap_err();
        assert!(matches!(err, SpeedTradeError::InvalidMarketData(_)));
        assert_eq!(*journal.borrow(), vec!["failing:audit.pnl".to_string()]);
    }

    /// Re-emits every message it receives, forming a cycle
    struct Echo;

    impl Agent for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn on_message(&mut self, message: &Message) -> Result<Vec<Message>> {
            Ok(vec![message.clone()])
        }
    }

    #[test]
    fn test_cycle_hits_depth_cap() {
        let bus = Bus::with_max_depth(8);
        bus.subscribe(Topic::AuditPnl, shared(Echo));

        let err = bus.publish(pnl(dec!(1))).unwrap_err();
        assert!(matches!(
            err,
            SpeedTradeError::CascadeDepthExceeded { limit: 8, .. }
        ));
        assert_eq!(bus.stats().published, 8);

        // depth counter unwinds after the failure
        let tick = Message::new(Payload::MarketTick(crate::bus::types::MarketTick {
            symbol: "HYPE".to_string(),
            price: dec!(1),
            timestamp: chrono::Utc::now(),
        }));
        bus.publish(tick).unwrap();
        assert_eq!(bus.stats().unrouted, 1);
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let journal = Rc::new(RefCell::new(Vec::new()));
        let bus = Bus::new();
        let agent = shared(Recorder::new("a", &journal));
        let agents = vec![as_shared(&agent)];

        bus.start(&agents).unwrap();
        bus.start(&agents).unwrap();
        assert!(bus.is_started());
        assert_eq!(agent.borrow().starts, 1);

        bus.stop(&agents).unwrap();
        bus.stop(&agents).unwrap();
        assert!(!bus.is_started());
        assert_eq!(agent.borrow().stops, 1);
    }

    #[test]
    fn test_failed_start_rolls_back_started_agents() {
        let journal = Rc::new(RefCell::new(Vec::new()));
        let bus = Bus::new();
        let a = shared(Recorder::new("a", &journal));
        let mut b = Recorder::new("b", &journal);
        b.fail_start = true;
        let b = shared(b);
        let c = shared(Recorder::new("c", &journal));
        let agents = vec![as_shared(&a), as_shared(&b), as_shared(&c)];

        assert!(bus.start(&agents).is_err());
        assert!(!bus.is_started());
        assert_eq!(*journal.borrow(), vec!["a:start", "b:start", "a:stop"]);
        assert_eq!(c.borrow().starts, 0);

        // stop on a bus that never started touches nobody
        bus.stop(&agents).unwrap();
        assert_eq!(journal.borrow().len(), 3);

        b.borrow_mut().fail_start = false;
        bus.start(&agents).unwrap();
        assert!(bus.is_started());
        assert_eq!(
            (a.borrow().starts, b.borrow().starts, c.borrow().starts),
            (2, 1, 1)
        );

        bus.stop(&agents).unwrap();
        assert_eq!(
            (a.borrow().stops, b.borrow().stops, c.borrow().stops),
            (2, 1, 1)
        );
    }

    #[test]
    fn test_busy_agent_is_reported() {
        let journal = Rc::new(RefCell::new(Vec::new()));
        let bus = Bus::new();
        let agent = shared(Recorder::new("held", &journal));
        bus.subscribe(Topic::AuditPnl, agent.clone());

        let _guard = agent.borrow_mut();
        let err = bus.publish(pnl(dec!(1))).unwrap_err();
        assert!(matches!(err, SpeedTradeError::AgentFailure { .. }));
    }
}
