//! Opportunity scanner.
//!
//! Evaluates the configured universe through a bounded pool of concurrent
//! evaluations, ranks what survives and replaces the shared cache.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use perp_sentinel_core::{
    Classifier, EngineConfig, ExchangeClient, Features, SignalDirection, SignalReading,
    SignalSource, TradeCandidate,
};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::OpportunityCache;

const SCORE_DP: u32 = 6;

pub struct OpportunityScanner {
    exchange: Arc<dyn ExchangeClient>,
    signals: Arc<dyn SignalSource>,
    classifier: Option<Arc<dyn Classifier>>,
    cache: Arc<OpportunityCache>,
    universe: Vec<String>,
    workers: usize,
    high_volatility: Decimal,
}

impl OpportunityScanner {
    /// `high_volatility` is the level above which candidates are scored down.
    #[must_use]
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        signals: Arc<dyn SignalSource>,
        cache: Arc<OpportunityCache>,
        config: &EngineConfig,
        high_volatility: Decimal,
    ) -> Self {
        Self {
            exchange,
            signals,
            classifier: None,
            cache,
            universe: config.universe.clone(),
            workers: config.scanner_workers.max(1),
            high_volatility,
        }
    }

    /// Requires classifier agreement and blends its confidence into every candidate.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Scans the universe once and publishes the ranked result.
    pub async fn scan(&self) -> Vec<TradeCandidate> {
        let mut candidates: Vec<TradeCandidate> = stream::iter(self.universe.clone())
            .map(|symbol| async move { self.evaluate(&symbol).await })
            .buffer_unordered(self.workers)
            .filter_map(|candidate| async move { candidate })
            .collect()
            .await;

        candidates.sort_by(|a, b| match b.score.cmp(&a.score) {
            Ordering::Equal => a.symbol.cmp(&b.symbol),
            other => other,
        });

        let generation = self.cache.publish(candidates.clone());
        info!(
            generation,
            universe = self.universe.len(),
            candidates = candidates.len(),
            "Published opportunities"
        );
        candidates
    }

    async fn evaluate(&self, symbol: &str) -> Option<TradeCandidate> {
        let raw = match self.signals.evaluate(symbol).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Signal evaluation failed");
                return None;
            }
        };
        let reading = match SignalReading::try_from(raw) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Rejected invalid signal");
                return None;
            }
        };
        if reading.direction() == SignalDirection::Hold {
            debug!(symbol = %symbol, "No directional signal");
            return None;
        }

        let features = Features::from_reading(&reading);
        let confidence = match &self.classifier {
            Some(classifier) => self.blend(classifier.as_ref(), symbol, &reading, &features).await?,
            None => reading.confidence(),
        };

        let reference_price = match self.exchange.get_ticker(symbol).await {
            Ok(price) if price > Decimal::ZERO => price,
            Ok(price) => {
                warn!(symbol = %symbol, price = %price, "Ignoring non-positive price");
                return None;
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Price fetch failed during scan");
                return None;
            }
        };

        let score = score(confidence, reading.volatility(), self.high_volatility);
        debug!(symbol = %symbol, confidence = %confidence, score = %score, "Candidate scored");

        Some(TradeCandidate {
            symbol: symbol.to_string(),
            direction: reading.direction(),
            confidence,
            volatility: reading.volatility(),
            score,
            reference_price,
            features,
            generated_at: Utc::now(),
        })
    }

    async fn blend(
        &self,
        classifier: &dyn Classifier,
        symbol: &str,
        reading: &SignalReading,
        features: &Features,
    ) -> Option<Decimal> {
        let prediction = match classifier.predict(features).await {
            Ok(prediction) => prediction,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Classifier prediction failed");
                return None;
            }
        };
        if prediction.direction != reading.direction() {
            debug!(
                symbol = %symbol,
                signal = ?reading.direction(),
                classifier = ?prediction.direction,
                "Classifier disagrees with signal"
            );
            return None;
        }
        let Ok(predicted) = Decimal::try_from(prediction.confidence) else {
            warn!(symbol = %symbol, confidence = prediction.confidence, "Invalid classifier confidence");
            return None;
        };
        let predicted = predicted.clamp(Decimal::ZERO, Decimal::ONE);
        Some((reading.confidence() + predicted) / Decimal::TWO)
    }
}

/// Composite rank: confidence discounted for volatility above `high_volatility`.
#[must_use]
pub fn score(confidence: Decimal, volatility: Decimal, high_volatility: Decimal) -> Decimal {
    let quality = if volatility <= high_volatility || volatility.is_zero() {
        Decimal::ONE
    } else {
        high_volatility / volatility
    };
    (confidence * quality).round_dp(SCORE_DP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use perp_sentinel_core::{
        Balance, ExchangeError, ExchangeResult, Order, OrderRequest, Prediction, RawSignal,
    };
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct Prices(HashMap<String, Decimal>);

    #[async_trait]
    impl ExchangeClient for Prices {
        async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Decimal> {
            self.0
                .get(symbol)
                .copied()
                .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
        }

        async fn get_balance(&self) -> ExchangeResult<Balance> {
            Err(ExchangeError::api(500, "unused"))
        }

        async fn create_market_order(&self, _request: &OrderRequest) -> ExchangeResult<Order> {
            Err(ExchangeError::api(500, "unused"))
        }

        async fn close_position(&self, _symbol: &str) -> ExchangeResult<bool> {
            Ok(false)
        }
    }

    struct Signals(HashMap<String, RawSignal>);

    #[async_trait]
    impl SignalSource for Signals {
        async fn evaluate(&self, symbol: &str) -> Result<RawSignal> {
            self.0.get(symbol).copied().ok_or_else(|| anyhow!("no signal for {symbol}"))
        }
    }

    struct AlwaysLong(f64);

    #[async_trait]
    impl Classifier for AlwaysLong {
        async fn predict(&self, _features: &Features) -> Result<Prediction> {
            Ok(Prediction {
                direction: SignalDirection::Long,
                confidence: self.0,
            })
        }

        async fn record_outcome(
            &self,
            _features: &Features,
            _signal: SignalDirection,
            _pnl: Decimal,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn raw(direction: SignalDirection, confidence: f64, volatility: f64) -> RawSignal {
        RawSignal {
            direction,
            confidence,
            volatility,
        }
    }

    fn scanner(universe: &[&str]) -> (OpportunityScanner, Arc<OpportunityCache>) {
        let prices = Prices(
            [("BTC", dec!(50000)), ("ETH", dec!(3000)), ("SOL", dec!(150)), ("DOGE", dec!(0.1))]
                .into_iter()
                .map(|(s, p)| (s.to_string(), p))
                .collect(),
        );
        let signals = Signals(
            [
                ("BTC", raw(SignalDirection::Long, 0.7, 0.02)),
                ("ETH", raw(SignalDirection::Short, 0.9, 0.02)),
                ("SOL", raw(SignalDirection::Long, 0.95, 0.07)),
                ("DOGE", raw(SignalDirection::Long, 1.5, 0.02)),
                ("XRP", raw(SignalDirection::Hold, 0.0, 0.0)),
            ]
            .into_iter()
            .map(|(s, r)| (s.to_string(), r))
            .collect(),
        );
        let cache = Arc::new(OpportunityCache::new());
        let config = EngineConfig {
            universe: universe.iter().map(|s| (*s).to_string()).collect(),
            scanner_workers: 2,
            ..EngineConfig::default()
        };
        let scanner = OpportunityScanner::new(
            Arc::new(prices),
            Arc::new(signals),
            Arc::clone(&cache),
            &config,
            dec!(0.035),
        );
        (scanner, cache)
    }

    #[test]
    fn score_discounts_high_volatility() {
        assert_eq!(score(dec!(0.8), dec!(0.02), dec!(0.035)), dec!(0.8));
        assert_eq!(score(dec!(0.8), dec!(0.07), dec!(0.035)), dec!(0.4));
    }

    #[tokio::test]
    async fn ranks_valid_candidates_and_publishes() {
        let (scanner, cache) = scanner(&["BTC", "ETH", "SOL", "DOGE", "XRP", "ADA"]);
        let candidates = scanner.scan().await;

        let symbols: Vec<&str> = candidates.iter().map(|c| c.symbol.as_str()).collect();
        // SOL: 0.95 × 0.5 = 0.475 ranks last; DOGE (invalid), XRP (hold), ADA (no signal) dropped.
        assert_eq!(symbols, vec!["ETH", "BTC", "SOL"]);
        assert_eq!(candidates[0].reference_price, dec!(3000));

        let snapshot = cache.snapshot().unwrap();
        assert_eq!(snapshot.candidates.len(), 3);
    }

    #[tokio::test]
    async fn classifier_must_agree_and_blends_confidence() {
        let (scanner, _cache) = scanner(&["BTC", "ETH"]);
        let scanner = scanner.with_classifier(Arc::new(AlwaysLong(0.9)));
        let candidates = scanner.scan().await;

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "BTC");
        assert_eq!(candidates[0].confidence, dec!(0.8));
    }

    #[tokio::test]
    async fn scan_runs_on_a_spawned_task() {
        let (scanner, cache) = scanner(&["BTC", "ETH"]);
        let scanner = Arc::new(scanner);
        let task = {
            let scanner = Arc::clone(&scanner);
            tokio::spawn(async move { scanner.scan().await })
        };

        let candidates = task.await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(cache.snapshot().unwrap().candidates.len(), 2);
    }
}
