//! Scalper Agent - moving-average crossover strategy
//!
//! Buys when the short SMA crosses above the long SMA and sells on the
//! reverse cross. Signals are edge-triggered: the same direction is never
//! emitted twice in a row, and equal averages emit nothing.

use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::info;

use crate::bus::{Agent, Message, OrderTicket, Payload, Side};
use crate::config::StrategyConfig;
use crate::error::Result;

pub struct ScalperAgent {
    symbol: String,
    short: usize,
    long: usize,
    size: Decimal,
    prices: VecDeque<Decimal>,
    last_signal: Option<Side>,
}

impl ScalperAgent {
    /// Windows shorter than one tick are treated as one tick
    pub fn new(symbol: &str, config: &StrategyConfig) -> Self {
        let short = config.short.max(1);
        let long = config.long.max(1);
        Self {
            symbol: symbol.to_uppercase(),
            short,
            long,
            size: config.size,
            prices: VecDeque::with_capacity(short.max(long)),
            last_signal: None,
        }
    }

    fn window(&self) -> usize {
        self.short.max(self.long)
    }

    /// Direction of the most recent signal
    pub fn last_signal(&self) -> Option<Side> {
        self.last_signal
    }

    fn sma(&self, len: usize) -> Decimal {
        let sum: Decimal = self.prices.iter().rev().take(len).sum();
        sum / Decimal::from(len)
    }

    /// Feed one price; returns the side to signal, if any
    fn observe(&mut self, price: Decimal) -> Option<Side> {
        self.prices.push_back(price);
        while self.prices.len() > self.window() {
            self.prices.pop_front();
        }
        if self.prices.len() < self.window() {
            return None;
        }

        let short_ma = self.sma(self.short);
        let long_ma = self.sma(self.long);

        let signal = if short_ma > long_ma && self.last_signal != Some(Side::Buy) {
            Some(Side::Buy)
        } else if short_ma < long_ma && self.last_signal != Some(Side::Sell) {
            Some(Side::Sell)
        } else {
            None
        };

        if let Some(side) = signal {
            info!(
                "{} {} crossover: short {} vs long {}",
                self.symbol,
                side,
                short_ma.round_dp(6),
                long_ma.round_dp(6)
            );
            self.last_signal = Some(side);
        }
        signal
    }
}

impl Agent for ScalperAgent {
    fn name(&self) -> &str {
        "strategy_scalper"
    }

    fn on_message(&mut self, message: &Message) -> Result<Vec<Message>> {
        let tick = match message.payload() {
            Payload::MarketTick(tick) if tick.symbol == self.symbol => tick,
            _ => return Ok(Vec::new()),
        };

        Ok(self
            .observe(tick.price)
            .map(|side| {
                message.reply(Payload::StrategySignal(OrderTicket {
                    symbol: self.symbol.clone(),
                    side,
                    size: self.size,
                    price: tick.price,
                }))
            })
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MarketTick;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn scalper(short: usize, long: usize) -> ScalperAgent {
        ScalperAgent::new(
            "HYPE",
            &StrategyConfig {
                short,
                long,
                size: dec!(10),
            },
        )
    }

    fn tick(symbol: &str, price: Decimal) -> Message {
        Message::new(Payload::MarketTick(MarketTick {
            symbol: symbol.to_string(),
            price,
            timestamp: Utc::now(),
        }))
    }

    fn sides(agent: &mut ScalperAgent, prices: &[Decimal]) -> Vec<Side> {
        prices
            .iter()
            .flat_map(|p| agent.on_message(&tick("HYPE", *p)).unwrap())
            .map(|m| match m.payload() {
                Payload::StrategySignal(t) => t.side,
                other => panic!("unexpected payload {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_silent_until_history_is_full() {
        let mut agent = scalper(2, 4);
        let prices = [dec!(1), dec!(2), dec!(3)];
        assert!(sides(&mut agent, &prices).is_empty());
    }

    #[test]
    fn test_zero_windows_are_clamped() {
        let mut agent = scalper(0, 0);
        let prices = [dec!(1), dec!(2), dec!(0.5)];
        assert!(sides(&mut agent, &prices).is_empty());

        let mut agent = scalper(0, 3);
        let prices = [dec!(1), dec!(1), dec!(1), dec!(2)];
        assert_eq!(sides(&mut agent, &prices), vec![Side::Buy]);
    }

    #[test]
    fn test_constant_prices_emit_nothing() {
        let mut agent = scalper(5, 20);
        let prices = vec![dec!(1.5); 40];
        assert!(sides(&mut agent, &prices).is_empty());
    }

    #[test]
    fn test_rising_series_buys_once() {
        let mut agent = scalper(5, 20);
        let prices: Vec<Decimal> = (0..25)
            .map(|i| Decimal::ONE + Decimal::from(i) / Decimal::from(24))
            .collect();

        let mut emitted_at = Vec::new();
        for (i, price) in prices.iter().enumerate() {
            if !agent.on_message(&tick("HYPE", *price)).unwrap().is_empty() {
                emitted_at.push(i);
            }
        }
        // the 20th tick fills the long window
        assert_eq!(emitted_at, vec![19]);
        assert_eq!(agent.last_signal(), Some(Side::Buy));
    }

    #[test]
    fn test_reversal_alternates_sides() {
        let mut agent = scalper(2, 4);
        let mut prices = vec![dec!(1), dec!(2), dec!(3), dec!(4), dec!(5)];
        prices.extend([dec!(4), dec!(3), dec!(2), dec!(1)]);
        prices.extend([dec!(2), dec!(3), dec!(4), dec!(5)]);

        let got = sides(&mut agent, &prices);
        assert_eq!(got, vec![Side::Buy, Side::Sell, Side::Buy]);
        assert!(got.windows(2).all(|w| w[0] != w[1]));
    }

    #[test]
    fn test_other_symbols_are_ignored() {
        let mut agent = scalper(1, 2);
        for p in [dec!(1), dec!(2), dec!(3)] {
            assert!(agent.on_message(&tick("BTC", p)).unwrap().is_empty());
        }
        assert!(agent.prices.is_empty());
    }

    #[test]
    fn test_signal_carries_size_and_price() {
        let mut agent = scalper(1, 2);
        agent.on_message(&tick("HYPE", dec!(1))).unwrap();
        let out = agent.on_message(&tick("HYPE", dec!(2))).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].payload(),
            &Payload::StrategySignal(OrderTicket {
                symbol: "HYPE".to_string(),
                side: Side::Buy,
                size: dec!(10),
                price: dec!(2),
            })
        );
    }
}
