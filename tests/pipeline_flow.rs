use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use speedtrade::bus::{shared, BlockReason, MarketTick, OrderTicket, PnlReport};
use speedtrade::config::AppConfig;
use speedtrade::{
    Agent, ManualClock, Message, Payload, Pipeline, RiskMode, Side, SpeedTradeError, Topic,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Collects every message it is subscribed to
struct Capture(Vec<Message>);

impl Agent for Capture {
    fn name(&self) -> &str {
        "capture"
    }

    fn on_message(&mut self, message: &Message) -> speedtrade::Result<Vec<Message>> {
        self.0.push(message.clone());
        Ok(Vec::new())
    }
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.strategy.short = 2;
    config.strategy.long = 4;
    config.strategy.size = dec!(10);
    config.risk.max_notional_per_trade = dec!(150);
    config.risk.max_consecutive_losses = 3;
    config.risk.cooldown_secs = 30;
    config
}

fn pipeline(clock: &Rc<ManualClock>) -> Pipeline {
    let pipeline =
        Pipeline::with_clock(&config(), clock.clone(), 42).expect("default config should wire");
    pipeline.start().expect("agents should start");
    pipeline
}

fn capture(pipeline: &Pipeline, topics: &[Topic]) -> Rc<RefCell<Capture>> {
    let captured = shared(Capture(Vec::new()));
    for topic in topics {
        pipeline.bus().subscribe(*topic, captured.clone());
    }
    captured
}

fn tick(price: Decimal) -> Message {
    Message::new(Payload::MarketTick(MarketTick {
        symbol: "HYPE".to_string(),
        price,
        timestamp: Utc::now(),
    }))
}

fn signal(side: Side, size: Decimal, price: Decimal) -> Message {
    Message::new(Payload::StrategySignal(OrderTicket {
        symbol: "HYPE".to_string(),
        side,
        size,
        price,
    }))
}

fn pnl(value: Decimal) -> Message {
    Message::new(Payload::AuditPnl(PnlReport {
        pnl: value,
        cum_pnl: value,
    }))
}

/// One signal resolves signal -> approved -> filled -> pnl before publish returns.
#[test]
fn signal_cascade_resolves_depth_first() {
    let clock = ManualClock::starting_now();
    let pipeline = pipeline(&clock);

    pipeline
        .publish(signal(Side::Buy, dec!(10), dec!(1)).with_correlation_id("c-1"))
        .expect("cascade should succeed");

    let stats = pipeline.stats();
    assert_eq!(stats.published, 4);
    for topic in [
        Topic::StrategySignal,
        Topic::RiskApproved,
        Topic::ExecutionFilled,
        Topic::AuditPnl,
    ] {
        assert_eq!(stats.by_topic.get(&topic), Some(&1), "{topic}");
    }
    assert_eq!(pipeline.audit().borrow().fill_count(), 1);
    assert_eq!(pipeline.tape().borrow().count(Topic::AuditPnl), 1);
}

/// Correlation ids survive every hop of the cascade.
#[test]
fn correlation_id_reaches_audit() {
    let clock = ManualClock::starting_now();
    let pipeline = pipeline(&clock);
    let captured = capture(&pipeline, &[Topic::ExecutionFilled, Topic::AuditPnl]);

    pipeline
        .publish(signal(Side::Sell, dec!(1), dec!(1)).with_correlation_id("trace-9"))
        .expect("cascade should succeed");

    let captured = captured.borrow();
    let seen = &captured.0;
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|m| m.correlation_id() == Some("trace-9")));
}

/// An oversized signal is shrunk to the notional cap, not rejected.
#[test]
fn oversized_signal_is_capped() {
    let clock = ManualClock::starting_now();
    let pipeline = pipeline(&clock);
    let captured = capture(&pipeline, &[Topic::RiskApproved]);

    pipeline
        .publish(signal(Side::Buy, dec!(10), dec!(100)))
        .expect("cascade should succeed");

    match captured.borrow().0[0].payload() {
        Payload::RiskApproved(order) => {
            assert_eq!(order.size, dec!(1.5));
            assert_eq!(order.price, dec!(100));
        }
        other => panic!("expected approval, got {other:?}"),
    }
    assert_eq!(pipeline.execution().borrow().position().size, dec!(1.5));
}

/// Three losses block approvals until the cooldown passes.
#[test]
fn loss_streak_blocks_until_cooldown_passes() {
    let clock = ManualClock::starting_now();
    let pipeline = pipeline(&clock);
    let captured = capture(&pipeline, &[Topic::RiskBlocked, Topic::ExecutionFilled]);

    for _ in 0..3 {
        pipeline.publish(pnl(dec!(-1))).expect("pnl should route");
    }
    assert_eq!(pipeline.risk().borrow().mode(), RiskMode::Blocked);

    pipeline
        .publish(signal(Side::Buy, dec!(1), dec!(1)))
        .expect("blocked signal is not an error");

    let reasons: Vec<BlockReason> = captured
        .borrow()
        .0
        .iter()
        .filter_map(|m| match m.payload() {
            Payload::RiskBlocked(block) => Some(block.reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec![BlockReason::LossStreak, BlockReason::Cooldown]);
    assert_eq!(pipeline.audit().borrow().fill_count(), 0);

    clock.advance(Duration::seconds(31));
    pipeline
        .publish(signal(Side::Buy, dec!(1), dec!(1)))
        .expect("signal after cooldown should fill");
    assert_eq!(pipeline.audit().borrow().fill_count(), 1);
    assert_eq!(pipeline.risk().borrow().mode(), RiskMode::Open);
}

/// An untyped signal whose notional overflows fails the publish instead of
/// aborting the process, and nothing downstream runs.
#[test]
fn overflowing_signal_fails_publish() {
    let clock = ManualClock::starting_now();
    let pipeline = pipeline(&clock);
    let captured = capture(&pipeline, &[Topic::RiskApproved, Topic::ExecutionFilled]);

    let message = Message::from_json(
        "strategy.signal",
        json!({
            "symbol": "HYPE",
            "side": "BUY",
            "size": "10",
            "price": "79228162514264337593543950335"
        }),
    )
    .expect("payload is well-formed");

    let err = pipeline
        .publish(message)
        .expect_err("overflowing notional must be rejected");
    assert!(matches!(err, SpeedTradeError::InvalidMarketData(_)), "{err}");
    assert!(captured.borrow().0.is_empty());
    assert_eq!(pipeline.audit().borrow().fill_count(), 0);

    // the pipeline keeps working afterwards
    pipeline
        .publish(signal(Side::Buy, dec!(1), dec!(1)))
        .expect("ordinary signal still routes");
    assert_eq!(pipeline.audit().borrow().fill_count(), 1);
}

/// A non-negative pnl before the threshold resets the streak.
#[test]
fn profit_resets_loss_streak() {
    let clock = ManualClock::starting_now();
    let pipeline = pipeline(&clock);

    pipeline.publish(pnl(dec!(-1))).expect("pnl should route");
    pipeline.publish(pnl(dec!(-1))).expect("pnl should route");
    pipeline.publish(pnl(dec!(0))).expect("pnl should route");
    pipeline.publish(pnl(dec!(-1))).expect("pnl should route");

    assert_eq!(pipeline.risk().borrow().consecutive_losses(), 1);
    assert_eq!(pipeline.risk().borrow().mode(), RiskMode::Open);
}

/// Ticks drive crossovers through the whole chain and the position
/// invariant holds after every fill.
#[test]
fn ticks_drive_fills_and_keep_position_invariant() {
    let clock = ManualClock::starting_now();
    let pipeline = pipeline(&clock);
    let captured = capture(&pipeline, &[Topic::StrategySignal, Topic::ExecutionFilled]);

    let wave = [
        dec!(1.00),
        dec!(1.01),
        dec!(1.02),
        dec!(1.03),
        dec!(1.04),
        dec!(1.03),
        dec!(1.02),
        dec!(1.01),
        dec!(1.00),
    ];
    for _ in 0..3 {
        for price in wave {
            pipeline.publish(tick(price)).expect("tick should route");
        }
    }

    let captured = captured.borrow();
    let sides: Vec<Side> = captured
        .0
        .iter()
        .filter_map(|m| match m.payload() {
            Payload::StrategySignal(s) => Some(s.side),
            _ => None,
        })
        .collect();
    assert!(sides.len() >= 2, "expected several crossovers, got {sides:?}");
    assert!(sides.windows(2).all(|w| w[0] != w[1]));

    let fills: Vec<_> = captured
        .0
        .iter()
        .filter_map(|m| match m.payload() {
            Payload::ExecutionFilled(f) => Some(f.clone()),
            _ => None,
        })
        .collect();
    assert!(!fills.is_empty());
    for fill in &fills {
        assert_eq!(fill.avg_price.is_none(), fill.position.is_zero());
    }
    assert_eq!(pipeline.summary().fills, fills.len() as u64);
}

/// Polling respects the feed interval on the injected clock.
#[test]
fn poll_emits_on_interval() {
    let clock = ManualClock::starting_now();
    let pipeline = pipeline(&clock);

    let mut emitted = 0;
    for _ in 0..10 {
        if pipeline.poll().expect("poll should succeed") {
            emitted += 1;
        }
        clock.advance(Duration::milliseconds(100));
    }
    // 200 ms interval over 1 s of 100 ms steps
    assert_eq!(emitted, 5);
    assert_eq!(pipeline.summary().ticks, 5);
}
