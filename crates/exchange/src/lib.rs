pub mod client;
pub mod dispatched;
pub mod dispatcher;
pub mod paper;
pub mod retry;

pub use client::HyperliquidClient;
pub use dispatched::DispatchedClient;
pub use dispatcher::{ApiDispatcher, Permit, Priority};
pub use paper::{PaperExchange, PriceFeed, ScriptedFeed};
pub use retry::RetryPolicy;
