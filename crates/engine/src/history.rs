use parking_lot::Mutex;
use perp_sentinel_core::ClosedTrade;
use std::collections::VecDeque;

/// Bounded ring of recent closed trades, oldest first.
#[derive(Debug)]
pub struct TradeHistory {
    trades: Mutex<VecDeque<ClosedTrade>>,
    capacity: usize,
}

impl TradeHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            trades: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, trade: ClosedTrade) {
        let mut trades = self.trades.lock();
        if trades.len() == self.capacity {
            trades.pop_front();
        }
        trades.push_back(trade);
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<ClosedTrade> {
        self.trades.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.trades.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
