//! Live position table.
//!
//! One mutex guards every open position. Closing is two-phase: `begin_close`
//! removes the position from the live set atomically, so only one caller can
//! own a close; the symbol stays reserved until `complete_close` or
//! `abort_close`.

use parking_lot::Mutex;
use perp_sentinel_core::Position;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BookError {
    #[error("no open position for {0}")]
    NotFound(String),

    #[error("position already open or closing for {0}")]
    AlreadyOpen(String),
}

#[derive(Debug, Default)]
struct BookInner {
    live: HashMap<String, Position>,
    closing: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct PositionBook {
    inner: Mutex<BookInner>,
}

impl PositionBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a newly opened position.
    ///
    /// # Errors
    ///
    /// Returns [`BookError::AlreadyOpen`] if the symbol is live or being closed.
    pub fn insert(&self, position: Position) -> Result<(), BookError> {
        let mut inner = self.inner.lock();
        let symbol = position.symbol().to_string();
        if inner.live.contains_key(&symbol) || inner.closing.contains(&symbol) {
            return Err(BookError::AlreadyOpen(symbol));
        }
        inner.live.insert(symbol, position);
        Ok(())
    }

    /// Whether `symbol` is live or has a close in flight.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        let inner = self.inner.lock();
        inner.live.contains_key(symbol) || inner.closing.contains(symbol)
    }

    /// Live plus closing positions.
    #[must_use]
    pub fn occupied(&self) -> usize {
        let inner = self.inner.lock();
        inner.live.len() + inner.closing.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// Number of live positions tagged with `group`.
    #[must_use]
    pub fn group_count(&self, group: &str) -> usize {
        self.inner
            .lock()
            .live
            .values()
            .filter(|p| p.correlation_group() == Some(group))
            .count()
    }

    /// Copies of every live position, ordered by symbol.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.inner.lock().live.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol().cmp(b.symbol()));
        positions
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.inner.lock().live.get(symbol).cloned()
    }

    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.inner.lock().live.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Runs `f` on the live position for `symbol` under the lock.
    ///
    /// Returns `None` if the position is no longer live.
    pub fn update<R>(&self, symbol: &str, f: impl FnOnce(&mut Position) -> R) -> Option<R> {
        self.inner.lock().live.get_mut(symbol).map(f)
    }

    /// Takes ownership of a close.
    ///
    /// # Errors
    ///
    /// Returns [`BookError::NotFound`] if the position is not live, including
    /// when another caller already began closing it.
    pub fn begin_close(&self, symbol: &str) -> Result<Position, BookError> {
        let mut inner = self.inner.lock();
        let position = inner
            .live
            .remove(symbol)
            .ok_or_else(|| BookError::NotFound(symbol.to_string()))?;
        inner.closing.insert(symbol.to_string());
        Ok(position)
    }

    /// Releases the symbol after a successful close.
    pub fn complete_close(&self, symbol: &str) {
        self.inner.lock().closing.remove(symbol);
    }

    /// Puts a position back after a failed close.
    pub fn abort_close(&self, position: Position) {
        let mut inner = self.inner.lock();
        inner.closing.remove(position.symbol());
        inner.live.insert(position.symbol().to_string(), position);
    }
}
