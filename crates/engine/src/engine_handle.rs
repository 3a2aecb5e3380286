use perp_sentinel_core::{CloseReason, ClosedTrade, Position};
use perp_sentinel_exchange::ApiDispatcher;
use perp_sentinel_positions::{PositionBook, PositionMonitor};
use perp_sentinel_risk::{BreakerStatus, CircuitBreaker, RiskLedger, RiskState};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::{OpportunityCache, OpportunitySnapshot};
use crate::coordinator::EngineCoordinator;
use crate::history::TradeHistory;

pub(crate) struct EngineTasks {
    pub(crate) monitor: JoinHandle<()>,
    pub(crate) scanner: JoinHandle<()>,
    pub(crate) coordinator: JoinHandle<EngineCoordinator>,
}

/// Outcome of a graceful shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub closed: Vec<ClosedTrade>,
    /// Symbols still open on the exchange after the flatten attempt.
    pub left_open: Vec<String>,
}

/// Control and read-only views of a running engine.
pub struct EngineHandle {
    running: Arc<AtomicBool>,
    tasks: EngineTasks,
    monitor: Arc<PositionMonitor>,
    book: Arc<PositionBook>,
    cache: Arc<OpportunityCache>,
    ledger: Arc<RiskLedger>,
    breaker: Arc<CircuitBreaker>,
    history: Arc<TradeHistory>,
    dispatcher: Arc<ApiDispatcher>,
}

impl EngineHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        running: Arc<AtomicBool>,
        tasks: EngineTasks,
        monitor: Arc<PositionMonitor>,
        book: Arc<PositionBook>,
        cache: Arc<OpportunityCache>,
        ledger: Arc<RiskLedger>,
        breaker: Arc<CircuitBreaker>,
        history: Arc<TradeHistory>,
        dispatcher: Arc<ApiDispatcher>,
    ) -> Self {
        Self {
            running,
            tasks,
            monitor,
            book,
            cache,
            ledger,
            breaker,
            history,
            dispatcher,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open positions, ordered by symbol.
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.book.snapshot()
    }

    #[must_use]
    pub fn risk_state(&self) -> RiskState {
        self.ledger.snapshot()
    }

    /// Recent closed trades, oldest first.
    #[must_use]
    pub fn closed_trades(&self) -> Vec<ClosedTrade> {
        self.history.snapshot()
    }

    #[must_use]
    pub fn opportunities(&self) -> Option<OpportunitySnapshot> {
        self.cache.snapshot()
    }

    #[must_use]
    pub fn breaker_status(&self) -> BreakerStatus {
        self.breaker.status()
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<ApiDispatcher> {
        &self.dispatcher
    }

    /// Blocks or re-allows new entries. Exits keep running either way.
    pub fn set_kill_switch(&self, engaged: bool) {
        self.breaker.set_kill_switch(engaged);
    }

    /// Clears a halt or pause after operator review. The kill switch is unaffected.
    pub fn reset_breaker(&self) {
        self.breaker.reset();
    }

    /// Stops all loops, then tries to close every live position.
    ///
    /// Closes that fail are logged and reported in `left_open`.
    pub async fn shutdown(self) -> ShutdownReport {
        info!("Shutting down engine");
        self.running.store(false, Ordering::SeqCst);

        let EngineTasks {
            monitor,
            scanner,
            coordinator,
        } = self.tasks;
        if let Err(e) = monitor.await {
            warn!(error = %e, "Monitor task ended abnormally");
        }
        if let Err(e) = scanner.await {
            warn!(error = %e, "Scanner task ended abnormally");
        }
        let mut coordinator = match coordinator.await {
            Ok(coordinator) => Some(coordinator),
            Err(e) => {
                warn!(error = %e, "Coordinator task ended abnormally");
                None
            }
        };

        let closed = self.monitor.flatten_all(CloseReason::Shutdown).await;
        if let Some(coordinator) = coordinator.as_mut() {
            coordinator.drain_closures().await;
        } else {
            for trade in &closed {
                self.ledger.record_trade(trade);
                self.history.push(trade.clone());
            }
        }

        let left_open = self.book.symbols();
        if left_open.is_empty() {
            info!(closed = closed.len(), "Engine stopped, all positions closed");
        } else {
            error!(
                closed = closed.len(),
                left_open = ?left_open,
                "Engine stopped with positions still open"
            );
        }
        ShutdownReport { closed, left_open }
    }
}
