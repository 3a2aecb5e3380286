//! Position lifecycle management for leveraged perpetual positions.
//!
//! - `stops`: hard levels, emergency loss tiers, stall tightening, profit lock
//! - `targets`: breakeven/trailing stops and bounded target extension
//! - `lifecycle`: the ordered state machine combining both
//! - `book`: the live position table with exclusive two-phase close
//! - `monitor`: the sweep that prices positions and acts on decisions
//!
//! All rules are deterministic functions of position, price, time and momentum.

pub mod book;
pub mod lifecycle;
pub mod monitor;
pub mod stops;
pub mod targets;
pub mod types;

pub use book::{BookError, PositionBook};
pub use lifecycle::{apply_adjustment, evaluate};
pub use monitor::{closed_trade, CloseError, PositionMonitor, SweepReport};
pub use types::{Adjustment, Decision};
