use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use perp_sentinel_core::{
    Balance, ExchangeClient, ExchangeError, ExchangeResult, Order, OrderRequest, OrderSide,
};
use perp_sentinel_exchange::{ApiDispatcher, DispatchedClient, Priority, RetryPolicy};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

async fn wait_queued(dispatcher: &ApiDispatcher, priority: Priority, n: usize) {
    while dispatcher.queued(priority) < n {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn call(
    dispatcher: &Arc<ApiDispatcher>,
    log: &Arc<Mutex<Vec<&'static str>>>,
    priority: Priority,
    name: &'static str,
) -> JoinHandle<()> {
    let dispatcher = Arc::clone(dispatcher);
    let log = Arc::clone(log);
    tokio::spawn(async move {
        dispatcher
            .run(priority, || async {
                log.lock().push(name);
                tokio::time::sleep(Duration::from_millis(2)).await;
            })
            .await;
    })
}

#[tokio::test]
async fn backlog_drains_by_tier_then_arrival() {
    let dispatcher = Arc::new(ApiDispatcher::new(1));
    let log = Arc::new(Mutex::new(Vec::new()));
    let critical = dispatcher.acquire(Priority::Critical).await;

    let mut handles = Vec::new();
    handles.push(call(&dispatcher, &log, Priority::Normal, "n1"));
    wait_queued(&dispatcher, Priority::Normal, 1).await;
    handles.push(call(&dispatcher, &log, Priority::High, "h1"));
    wait_queued(&dispatcher, Priority::High, 1).await;
    handles.push(call(&dispatcher, &log, Priority::Normal, "n2"));
    wait_queued(&dispatcher, Priority::Normal, 2).await;
    handles.push(call(&dispatcher, &log, Priority::High, "h2"));
    wait_queued(&dispatcher, Priority::High, 2).await;

    assert!(log.lock().is_empty());
    drop(critical);

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*log.lock(), vec!["h1", "h2", "n1", "n2"]);
    for priority in [Priority::Critical, Priority::High, Priority::Normal] {
        assert_eq!(dispatcher.queued(priority), 0);
        assert_eq!(dispatcher.in_flight(priority), 0);
    }
}

#[tokio::test]
async fn critical_passes_a_full_backlog() {
    let dispatcher = Arc::new(ApiDispatcher::new(1));
    let log = Arc::new(Mutex::new(Vec::new()));
    let holder = dispatcher.acquire(Priority::Normal).await;

    let normal = call(&dispatcher, &log, Priority::Normal, "normal");
    wait_queued(&dispatcher, Priority::Normal, 1).await;
    let high = call(&dispatcher, &log, Priority::High, "high");
    wait_queued(&dispatcher, Priority::High, 1).await;

    let critical = tokio::time::timeout(
        Duration::from_millis(200),
        dispatcher.run(Priority::Critical, || async { "close" }),
    )
    .await;
    assert_eq!(critical.ok(), Some("close"));
    assert!(log.lock().is_empty());

    drop(holder);
    normal.await.unwrap();
    high.await.unwrap();
    assert_eq!(*log.lock(), vec!["high", "normal"]);
}

/// Ticker fails once; orders take a while to fill.
#[derive(Default)]
struct SlowVenue {
    log: Mutex<Vec<&'static str>>,
    ticker_failures: Mutex<u32>,
}

#[async_trait]
impl ExchangeClient for SlowVenue {
    async fn get_ticker(&self, _symbol: &str) -> ExchangeResult<Decimal> {
        self.log.lock().push("ticker");
        let mut failures = self.ticker_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(ExchangeError::Network("reset".to_string()));
        }
        Ok(dec!(100))
    }

    async fn get_balance(&self) -> ExchangeResult<Balance> {
        Ok(Balance {
            free: dec!(1000),
            used: Decimal::ZERO,
            total: dec!(1000),
        })
    }

    async fn create_market_order(&self, request: &OrderRequest) -> ExchangeResult<Order> {
        self.log.lock().push("order start");
        tokio::time::sleep(Duration::from_millis(150)).await;
        self.log.lock().push("order end");
        Ok(Order {
            order_id: "1".to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            avg_price: dec!(100),
            fee: Decimal::ZERO,
            reduce_only: request.reduce_only,
            timestamp: Utc::now(),
        })
    }

    async fn close_position(&self, _symbol: &str) -> ExchangeResult<bool> {
        Ok(true)
    }
}

#[tokio::test]
async fn ticker_retry_waits_for_order_placed_during_backoff() {
    let venue = Arc::new(SlowVenue::default());
    *venue.ticker_failures.lock() = 1;
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(50),
    };
    let client = Arc::new(DispatchedClient::new(
        Arc::clone(&venue) as Arc<dyn ExchangeClient>,
        Arc::new(ApiDispatcher::new(4)),
        retry,
    ));

    let ticker = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.get_ticker("BTC").await })
    };
    // First attempt has failed and the read is sleeping before its retry.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let order = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            let request = OrderRequest {
                symbol: "BTC".to_string(),
                side: OrderSide::Buy,
                quantity: dec!(1),
                leverage: 5,
                reduce_only: false,
            };
            client.create_market_order(&request).await
        })
    };

    assert!(order.await.unwrap().is_ok());
    assert_eq!(ticker.await.unwrap(), Ok(dec!(100)));
    assert_eq!(
        *venue.log.lock(),
        vec!["ticker", "order start", "order end", "ticker"]
    );
    assert_eq!(client.dispatcher().in_flight(Priority::Normal), 0);
    assert_eq!(client.dispatcher().in_flight(Priority::Critical), 0);
}
