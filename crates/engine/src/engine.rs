//! Wires the collaborators together and runs the three engine loops.

use anyhow::{Context, Result};
use perp_sentinel_core::{
    Classifier, ClosedTrade, ExchangeClient, SentinelConfig, SignalSource,
};
use perp_sentinel_exchange::{ApiDispatcher, DispatchedClient, Priority, RetryPolicy};
use perp_sentinel_positions::{PositionBook, PositionMonitor};
use perp_sentinel_risk::{CircuitBreaker, RiskLedger, RiskPersistence, RiskSizer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::OpportunityCache;
use crate::coordinator::EngineCoordinator;
use crate::engine_handle::{EngineHandle, EngineTasks};
use crate::history::TradeHistory;
use crate::scanner::OpportunityScanner;

/// Engine assembly. Call [`Engine::start`] to spawn the loops.
pub struct Engine {
    config: SentinelConfig,
    exchange: Arc<dyn ExchangeClient>,
    signals: Arc<dyn SignalSource>,
    classifier: Option<Arc<dyn Classifier>>,
}

impl Engine {
    /// `exchange` is the raw client; the engine puts it behind the priority
    /// dispatcher and retry policy itself.
    #[must_use]
    pub fn new(
        config: SentinelConfig,
        exchange: Arc<dyn ExchangeClient>,
        signals: Arc<dyn SignalSource>,
    ) -> Self {
        Self {
            config,
            exchange,
            signals,
            classifier: None,
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Reads the starting balance, restores risk state and spawns the monitor,
    /// scanner and coordinator tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the starting balance
    /// cannot be read.
    pub async fn start(self) -> Result<EngineHandle> {
        let Self {
            config,
            exchange,
            signals,
            classifier,
        } = self;
        config.validate().context("invalid configuration")?;

        let dispatcher = Arc::new(ApiDispatcher::from_config(&config.exchange));
        let retry = RetryPolicy::from_config(&config.exchange);
        let market: Arc<dyn ExchangeClient> = Arc::new(DispatchedClient::new(
            Arc::clone(&exchange),
            Arc::clone(&dispatcher),
            retry,
        ));
        let account: Arc<dyn ExchangeClient> = Arc::new(
            DispatchedClient::new(exchange, Arc::clone(&dispatcher), retry)
                .with_ticker_priority(Priority::High),
        );

        let balance = account
            .get_balance()
            .await
            .context("failed to read starting balance")?;
        let persistence = config.engine.state_path.clone().map(RiskPersistence::new);
        let ledger = Arc::new(RiskLedger::open(
            balance.total,
            config.sizing.rolling_window,
            persistence,
        ));
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
        let history = Arc::new(TradeHistory::new(config.engine.history_capacity));
        let book = Arc::new(PositionBook::new());
        let cache = Arc::new(OpportunityCache::new());
        let (closures_tx, closures_rx) = mpsc::unbounded_channel::<ClosedTrade>();

        let monitor = Arc::new(PositionMonitor::new(
            Arc::clone(&book),
            Arc::clone(&account),
            Arc::clone(&signals),
            config.exits.clone(),
            closures_tx,
        ));

        let mut scanner = OpportunityScanner::new(
            market,
            signals,
            Arc::clone(&cache),
            &config.engine,
            config.sizing.high_volatility,
        );
        let mut coordinator = EngineCoordinator::new(
            Arc::clone(&book),
            Arc::clone(&cache),
            account,
            Arc::clone(&ledger),
            Arc::clone(&breaker),
            Arc::clone(&history),
            RiskSizer::new(config.sizing.clone()),
            config.engine.clone(),
            closures_rx,
        );
        if let Some(classifier) = classifier {
            scanner = scanner.with_classifier(Arc::clone(&classifier));
            coordinator = coordinator.with_classifier(classifier);
        }

        let running = Arc::new(AtomicBool::new(true));
        let poll = config.engine.shutdown_poll();

        let monitor_task = {
            let monitor = Arc::clone(&monitor);
            let running = Arc::clone(&running);
            let interval = config.engine.monitor_interval();
            tokio::spawn(async move {
                while running.load(Ordering::SeqCst) {
                    let report = monitor.sweep().await;
                    debug!(?report, "Monitor sweep");
                    pause(&running, interval, poll).await;
                }
                debug!("Monitor loop stopped");
            })
        };

        let scanner_task = {
            let running = Arc::clone(&running);
            let interval = config.engine.scan_interval();
            tokio::spawn(async move {
                while running.load(Ordering::SeqCst) {
                    scanner.scan().await;
                    pause(&running, interval, poll).await;
                }
                debug!("Scanner loop stopped");
            })
        };

        let coordinator_task = {
            let running = Arc::clone(&running);
            let interval = config.engine.coordinator_interval();
            tokio::spawn(async move {
                while running.load(Ordering::SeqCst) {
                    let report = coordinator.tick().await;
                    if report.opened > 0 || report.closes_recorded > 0 {
                        debug!(?report, "Coordinator pass");
                    }
                    pause(&running, interval, poll).await;
                }
                debug!("Coordinator loop stopped");
                coordinator
            })
        };

        info!(
            equity = %balance.total,
            universe = config.engine.universe.len(),
            max_positions = config.engine.max_positions,
            "Engine started"
        );

        Ok(EngineHandle::new(
            running,
            EngineTasks {
                monitor: monitor_task,
                scanner: scanner_task,
                coordinator: coordinator_task,
            },
            monitor,
            book,
            cache,
            ledger,
            breaker,
            history,
            dispatcher,
        ))
    }
}

/// Sleeps up to `total`, waking at least every `poll` to check `running`.
async fn pause(running: &AtomicBool, total: Duration, poll: Duration) {
    let deadline = Instant::now() + total;
    let poll = poll.max(Duration::from_millis(1));
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep((deadline - now).min(poll)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pause_returns_promptly_when_stopped() {
        let running = AtomicBool::new(false);
        let started = Instant::now();
        pause(&running, Duration::from_secs(60), Duration::from_millis(10)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn pause_waits_out_the_interval() {
        let running = AtomicBool::new(true);
        let started = Instant::now();
        pause(&running, Duration::from_millis(30), Duration::from_millis(10)).await;
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
