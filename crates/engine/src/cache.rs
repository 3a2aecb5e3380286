//! Latest scanner output shared with the coordinator.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use perp_sentinel_core::TradeCandidate;
use std::time::Duration;

/// One published scan: ranked candidates plus when they were produced.
#[derive(Debug, Clone)]
pub struct OpportunitySnapshot {
    pub generation: u64,
    pub candidates: Vec<TradeCandidate>,
    pub published_at: DateTime<Utc>,
}

impl OpportunitySnapshot {
    /// Whether the snapshot is older than `max_age` at `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let age = now - self.published_at;
        chrono::Duration::from_std(max_age).map_or(false, |max| age > max)
    }

    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.published_at).num_seconds()
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    current: Option<OpportunitySnapshot>,
}

/// Single-slot cache. Writers replace the whole slot; readers get a copy.
#[derive(Debug, Default)]
pub struct OpportunityCache {
    slot: Mutex<Slot>,
}

impl OpportunityCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cached list, stamped now. Returns the new generation.
    pub fn publish(&self, candidates: Vec<TradeCandidate>) -> u64 {
        self.publish_at(candidates, Utc::now())
    }

    pub fn publish_at(&self, candidates: Vec<TradeCandidate>, published_at: DateTime<Utc>) -> u64 {
        let mut slot = self.slot.lock();
        slot.generation += 1;
        let generation = slot.generation;
        slot.current = Some(OpportunitySnapshot {
            generation,
            candidates,
            published_at,
        });
        generation
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<OpportunitySnapshot> {
        self.slot.lock().current.clone()
    }
}
