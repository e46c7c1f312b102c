//! Command-line interface for the `speedtrade` binary

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

use crate::bus::Side;

#[derive(Parser, Debug)]
#[command(name = "speedtrade")]
#[command(author, version, about = "Single-instrument agent pipeline with a rate-limited venue guard")]
pub struct Cli {
    /// Directory holding default.toml and per-environment overrides
    #[arg(long, env = "SPEEDTRADE_CONFIG_DIR", default_value = "config")]
    pub config_dir: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the agent pipeline on the synthetic feed
    Run {
        /// Stop after this many ticks (runs until Ctrl-C otherwise)
        #[arg(long)]
        ticks: Option<u64>,

        /// Polling interval in milliseconds
        #[arg(long, default_value_t = 20)]
        poll_ms: u64,

        /// Seed for the feed and slippage RNGs
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the effective configuration
    Config,

    /// Send orders to the in-memory paper venue through the retry guard
    Paper {
        /// Mid price to seed the paper book with
        #[arg(long, default_value = "1.0")]
        mid: Decimal,

        /// Collateral in USD
        #[arg(long, default_value = "1000")]
        collateral: Decimal,

        #[command(subcommand)]
        action: PaperAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum PaperAction {
    /// Market order at the current mid
    Market {
        #[arg(value_parser = parse_side)]
        side: Side,
        size: Decimal,
    },
    /// Limit order; rests unless it crosses the mid
    Limit {
        #[arg(value_parser = parse_side)]
        side: Side,
        size: Decimal,
        price: Decimal,
    },
    /// Open a position, then close it in full
    RoundTrip {
        #[arg(value_parser = parse_side)]
        side: Side,
        size: Decimal,
    },
}

fn parse_side(raw: &str) -> Result<Side, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "buy" | "b" | "long" => Ok(Side::Buy),
        "sell" | "s" | "short" => Ok(Side::Sell),
        other => Err(format!("invalid side '{}'; expected buy|sell", other)),
    }
}
