//! Paper-trading run: live Hyperliquid mid prices, simulated fills.

use crate::signal_file::FileSignalSource;
use anyhow::{Context, Result};
use clap::Args;
use perp_sentinel_core::{ConfigLoader, ExchangeClient, SignalSource};
use perp_sentinel_engine::{Engine, EngineHandle};
use perp_sentinel_exchange::{HyperliquidClient, PaperExchange, PriceFeed};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Sentinel.toml")]
    pub config: String,

    /// JSON file of per-symbol signals
    #[arg(short, long, env = "SENTINEL_SIGNALS", default_value = "config/signals.json")]
    pub signals: String,

    /// Seconds between status lines
    #[arg(long, default_value = "60")]
    pub status_interval: u64,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = ConfigLoader::load(&args.config)?;
    info!(
        config = %args.config,
        api = %config.exchange.api_url,
        universe = ?config.engine.universe,
        "Starting perp sentinel in paper mode"
    );

    let feed: Arc<dyn PriceFeed> = Arc::new(HyperliquidClient::new(&config.exchange)?);
    let exchange: Arc<dyn ExchangeClient> =
        Arc::new(PaperExchange::new(feed, config.paper.clone()));
    let source = FileSignalSource::new(&args.signals);
    info!(path = %source.path().display(), "Reading signals from file");
    let signals: Arc<dyn SignalSource> = Arc::new(source);

    let handle = Engine::new(config, exchange, signals)
        .start()
        .await
        .context("engine failed to start")?;

    let mut status = tokio::time::interval(Duration::from_secs(args.status_interval.max(1)));
    status.tick().await;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                info!("Received Ctrl-C, initiating graceful shutdown");
                break;
            }
            _ = status.tick() => log_status(&handle),
        }
    }

    let report = handle.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.left_open.is_empty() {
        anyhow::bail!("positions left open: {:?}", report.left_open);
    }
    Ok(())
}

fn log_status(handle: &EngineHandle) {
    let risk = handle.risk_state();
    let breaker = handle.breaker_status();
    let positions = handle.positions();
    let symbols: Vec<&str> = positions.iter().map(|p| p.symbol()).collect();
    info!(
        positions = ?symbols,
        equity = %risk.current_equity(),
        drawdown = %risk.drawdown(),
        trades = risk.total_trades(),
        kill_switch = breaker.kill_switch,
        halted = ?breaker.halted,
        "Status"
    );
}
