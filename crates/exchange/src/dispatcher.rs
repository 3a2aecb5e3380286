//! Priority gate in front of every exchange call.
//!
//! Calls are admitted in tier order: no `High` or `Normal` call starts while a
//! `Critical` call is queued or running, and no `Normal` call starts while a
//! `High` call is. Within a tier admission is FIFO. `Critical` calls ignore the
//! concurrency limit so order placement is never stuck behind market data.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use parking_lot::Mutex;
use perp_sentinel_core::ExchangeConfig;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const TIERS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Order placement and cancellation.
    Critical,
    /// Balance, position and order-status queries.
    High,
    /// Market data and scanning.
    Normal,
}

impl Priority {
    const fn index(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    next_ticket: u64,
    queued: [VecDeque<u64>; TIERS],
    in_flight: [usize; TIERS],
}

impl GateState {
    fn admissible(&self, priority: Priority, ticket: u64, max_concurrent: usize) -> bool {
        let tier = priority.index();
        if self.queued[tier].front() != Some(&ticket) {
            return false;
        }
        let higher_pending =
            (0..tier).any(|higher| !self.queued[higher].is_empty() || self.in_flight[higher] > 0);
        if higher_pending {
            return false;
        }
        priority == Priority::Critical || self.in_flight.iter().sum::<usize>() < max_concurrent
    }
}

/// Shared admission gate for exchange calls.
pub struct ApiDispatcher {
    state: Mutex<GateState>,
    notify: Notify,
    max_concurrent: usize,
    rate_limiter: Option<Arc<DirectLimiter>>,
}

impl fmt::Debug for ApiDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ApiDispatcher")
            .field("max_concurrent", &self.max_concurrent)
            .field("queued", &state.queued.iter().map(VecDeque::len).collect::<Vec<_>>())
            .field("in_flight", &state.in_flight)
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish()
    }
}

impl ApiDispatcher {
    /// Creates a dispatcher without a request-rate limit.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            notify: Notify::new(),
            max_concurrent: max_concurrent.max(1),
            rate_limiter: None,
        }
    }

    /// Adds a shared requests-per-second budget, taken before a call joins its queue.
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_second: NonZeroU32) -> Self {
        let quota = Quota::per_second(requests_per_second);
        self.rate_limiter = Some(Arc::new(RateLimiter::direct(quota)));
        self
    }

    #[must_use]
    pub fn from_config(config: &ExchangeConfig) -> Self {
        let dispatcher = Self::new(config.max_concurrent);
        match NonZeroU32::new(config.requests_per_second) {
            Some(rps) => dispatcher.with_rate_limit(rps),
            None => dispatcher,
        }
    }

    /// Waits for a slot at `priority`. The slot is released when the permit drops.
    pub async fn acquire(&self, priority: Priority) -> Permit<'_> {
        // Rate budget is spent before queueing; tier order is the last thing decided.
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let ticket = {
            let mut state = self.state.lock();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.queued[priority.index()].push_back(ticket);
            ticket
        };
        let mut queued = QueuedTicket {
            dispatcher: self,
            priority,
            ticket,
            admitted: false,
        };

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the await is not lost.
            notified.as_mut().enable();
            if self.try_admit(priority, ticket) {
                break;
            }
            notified.await;
        }
        queued.admitted = true;
        drop(queued);

        // Next ticket in line may now be admissible.
        self.notify.notify_waiters();
        debug!(priority = %priority, ticket, "API call admitted");

        Permit {
            dispatcher: self,
            priority,
        }
    }

    /// Runs `f` once admitted at `priority`.
    pub async fn run<T, F, Fut>(&self, priority: Priority, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire(priority).await;
        f().await
    }

    /// Calls waiting for admission at `priority`.
    #[must_use]
    pub fn queued(&self, priority: Priority) -> usize {
        self.state.lock().queued[priority.index()].len()
    }

    /// Calls currently running at `priority`.
    #[must_use]
    pub fn in_flight(&self, priority: Priority) -> usize {
        self.state.lock().in_flight[priority.index()]
    }

    fn try_admit(&self, priority: Priority, ticket: u64) -> bool {
        let mut state = self.state.lock();
        if !state.admissible(priority, ticket, self.max_concurrent) {
            return false;
        }
        state.queued[priority.index()].pop_front();
        state.in_flight[priority.index()] += 1;
        true
    }

    fn release(&self, priority: Priority) {
        {
            let mut state = self.state.lock();
            let slot = &mut state.in_flight[priority.index()];
            *slot = slot.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    fn withdraw(&self, priority: Priority, ticket: u64) {
        {
            let mut state = self.state.lock();
            state.queued[priority.index()].retain(|t| *t != ticket);
        }
        self.notify.notify_waiters();
    }
}

/// Removes the ticket from its queue if the waiting future is dropped.
struct QueuedTicket<'a> {
    dispatcher: &'a ApiDispatcher,
    priority: Priority,
    ticket: u64,
    admitted: bool,
}

impl Drop for QueuedTicket<'_> {
    fn drop(&mut self) {
        if !self.admitted {
            self.dispatcher.withdraw(self.priority, self.ticket);
        }
    }
}

/// An admitted call slot.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct Permit<'a> {
    dispatcher: &'a ApiDispatcher,
    priority: Priority,
}

impl Permit<'_> {
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.dispatcher.release(self.priority);
    }
}
