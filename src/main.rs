use anyhow::Context;
use clap::Parser;
use rust_decimal::Decimal;
use speedtrade::cli::{Cli, Commands, PaperAction};
use speedtrade::clock::system_clock;
use speedtrade::config::AppConfig;
use speedtrade::pipeline::Pipeline;
use speedtrade::throttle::RateLimiter;
use speedtrade::venue::{GuardedVenue, OrderOutcome, PaperVenue};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

mod main_runtime;

use main_runtime::{init_logging, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir))?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("config: {}", e);
        }
        anyhow::bail!("invalid configuration ({} problems)", errors.len());
    }

    match &cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Run {
            ticks,
            poll_ms,
            seed,
        } => {
            let _guard = init_logging(&config.logging);
            run_pipeline(&config, *ticks, *poll_ms, *seed).await?;
        }
        Commands::Paper {
            mid,
            collateral,
            action,
        } => {
            let _guard = init_logging(&config.logging);
            run_paper(&config, *mid, *collateral, action).await?;
        }
    }

    Ok(())
}

async fn run_pipeline(
    config: &AppConfig,
    max_ticks: Option<u64>,
    poll_ms: u64,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let pipeline = match seed {
        Some(seed) => Pipeline::with_clock(config, system_clock(), seed)?,
        None => Pipeline::new(config)?,
    };

    pipeline.start()?;
    info!(
        "Agents running for {} (Ctrl-C to stop)",
        config.market.symbol.to_uppercase()
    );

    let mut poll = interval(Duration::from_millis(poll_ms.max(1)));
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut ticks = 0u64;
    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break Ok(());
            }
            _ = poll.tick() => {
                match pipeline.poll() {
                    Ok(true) => {
                        ticks += 1;
                        if max_ticks.is_some_and(|max| ticks >= max) {
                            break Ok(());
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!("Pipeline halted: {}", e);
                        break Err(e);
                    }
                }
            }
        }
    };

    pipeline.stop()?;
    println!("{}", serde_json::to_string_pretty(&pipeline.summary())?);
    outcome.map_err(Into::into)
}

async fn run_paper(
    config: &AppConfig,
    mid: Decimal,
    collateral: Decimal,
    action: &PaperAction,
) -> anyhow::Result<()> {
    let symbol = config.market.symbol.to_uppercase();
    let paper = PaperVenue::new(collateral);
    paper.set_mid(&symbol, mid)?;

    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let venue = GuardedVenue::from_config(paper, limiter, &config.retry);

    let outcomes: Vec<OrderOutcome> = match action {
        PaperAction::Market { side, size } => {
            vec![venue.place_market_order(&symbol, *side, *size).await]
        }
        PaperAction::Limit { side, size, price } => {
            vec![venue.place_limit_order(&symbol, *side, *size, *price).await]
        }
        PaperAction::RoundTrip { side, size } => {
            let open = venue.place_market_order(&symbol, *side, *size).await;
            let close = venue.close_position(&symbol).await;
            vec![open, close]
        }
    };

    for outcome in &outcomes {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "positions": venue.positions().await,
            "open_orders": venue.open_orders().await,
            "account": venue.account_state().await,
            "calls_in_window": venue.guard().limiter().get_current_calls().await,
        }))?
    );

    if outcomes.iter().all(|o| o.success) {
        Ok(())
    } else {
        anyhow::bail!("one or more paper orders failed")
    }
}
