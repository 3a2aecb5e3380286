pub mod circuit_breaker;
pub mod drawdown;
pub mod kelly;
pub mod persistence;
pub mod sizing;

pub use circuit_breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerError};
pub use drawdown::{RiskLedger, RiskState};
pub use kelly::{full_kelly, KellySizer};
pub use persistence::{PersistenceError, RiskPersistence};
pub use sizing::{RiskSizer, SizingDecision, SizingError};
