//! JSON persistence for [`RiskState`] so drawdown survives restarts.
//!
//! A missing or corrupt file is not an error: loading falls back to a fresh
//! state and logs why.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::drawdown::RiskState;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct RiskPersistence {
    path: PathBuf,
}

impl RiskPersistence {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Writes `state` to disk, creating parent directories as needed.
    ///
    /// The file is written to a sibling temp path and renamed into place.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or serialized.
    pub fn save(&self, state: &RiskState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, state)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(
            path = %self.path.display(),
            trades = state.total_trades(),
            "Saved risk state"
        );
        Ok(())
    }

    /// Loads the persisted state, or builds one with `fresh` if the file is missing or unreadable.
    pub fn load_or(&self, fresh: impl FnOnce() -> RiskState) -> RiskState {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No persisted risk state, starting fresh");
            return fresh();
        }

        match self.load() {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    trades = state.total_trades(),
                    peak = %state.peak_equity(),
                    "Loaded persisted risk state"
                );
                state
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to load persisted risk state, starting fresh"
                );
                fresh()
            }
        }
    }

    /// Reads the file without fallback.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or does not parse.
    pub fn load(&self) -> Result<RiskState, PersistenceError> {
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::TempDir;

    fn temp_path() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("risk.json");
        (dir, path)
    }

    #[test]
    fn save_then_load() {
        let (_dir, path) = temp_path();
        let persistence = RiskPersistence::new(path);

        let mut state = RiskState::new(dec!(5000), 20);
        state.record_outcome(dec!(250));
        state.sync_equity(dec!(5250));
        persistence.save(&state).unwrap();

        let loaded = persistence.load().unwrap();
        assert_eq!(loaded.current_equity(), dec!(5250));
        assert_eq!(loaded.total_trades(), 1);
    }

    #[test]
    fn missing_file_starts_fresh() {
        let (_dir, path) = temp_path();
        let persistence = RiskPersistence::new(path);
        let state = persistence.load_or(|| RiskState::new(dec!(1000), 10));
        assert_eq!(state.peak_equity(), dec!(1000));
        assert_eq!(state.total_trades(), 0);
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("risk.json");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"{ not json").unwrap();

        let persistence = RiskPersistence::new(path);
        assert!(persistence.load().is_err());
        let state = persistence.load_or(|| RiskState::new(dec!(1000), 10));
        assert_eq!(state.current_equity(), dec!(1000));
    }
}
