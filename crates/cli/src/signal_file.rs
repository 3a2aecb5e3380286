//! Signal feed backed by a JSON file that an external process keeps current.
//!
//! The file maps symbols to readings:
//!
//! ```json
//! { "BTC": { "direction": "long", "confidence": 0.82, "volatility": 0.018 } }
//! ```
//!
//! It is re-read on every evaluation, so updates apply on the next scan.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use perp_sentinel_core::{RawSignal, SignalSource};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct FileSignalSource {
    path: PathBuf,
}

impl FileSignalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<String, RawSignal>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read signals from {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("malformed signal file {}", self.path.display()))
    }
}

#[async_trait]
impl SignalSource for FileSignalSource {
    async fn evaluate(&self, symbol: &str) -> Result<RawSignal> {
        self.load()
            .await?
            .remove(symbol)
            .ok_or_else(|| anyhow!("no signal for {symbol}"))
    }
}
