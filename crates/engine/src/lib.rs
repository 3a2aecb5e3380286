//! Runtime for the perp sentinel.
//!
//! Three cooperative tokio tasks share one position book and one opportunity
//! cache:
//! - the monitor re-prices open positions every second or so
//! - the scanner ranks the universe every scan interval
//! - the coordinator opens fresh candidates and books realized closes
//!
//! All exchange traffic goes through one priority dispatcher.

pub mod cache;
pub mod coordinator;
pub mod engine;
pub mod engine_handle;
pub mod history;
pub mod scanner;

pub use cache::{OpportunityCache, OpportunitySnapshot};
pub use coordinator::{EngineCoordinator, RejectReason, TickReport};
pub use engine::Engine;
pub use engine_handle::{EngineHandle, ShutdownReport};
pub use history::TradeHistory;
pub use scanner::{score, OpportunityScanner};
