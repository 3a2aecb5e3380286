pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod position;
pub mod traits;

pub use config::{
    BreakerConfig, ConfigError, EngineConfig, ExchangeConfig, ExitPolicy, PaperConfig,
    SentinelConfig, SizingConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{ExchangeError, ExchangeResult};
pub use events::{
    Balance, CloseReason, ClosedTrade, Features, Order, OrderRequest, OrderSide, Prediction,
    RawSignal, SignalDirection, SignalError, SignalReading, TradeCandidate,
};
pub use position::{Position, PositionError, PositionParams, Side};
pub use traits::{Classifier, ExchangeClient, SignalSource};
