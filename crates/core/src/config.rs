use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration for the sentinel engine.
///
/// Every section falls back to its defaults, so a partial TOML file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub exchange: ExchangeConfig,
    pub engine: EngineConfig,
    pub sizing: SizingConfig,
    pub exits: ExitPolicy,
    pub breaker: BreakerConfig,
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Exchange access: endpoint, rate limit, retry and dispatcher limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub api_url: String,
    pub requests_per_second: u32,
    pub request_timeout_ms: u64,
    /// Total attempts per call, including the first.
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Concurrent non-critical calls admitted by the dispatcher.
    pub max_concurrent: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.hyperliquid.xyz".to_string(),
            requests_per_second: 10,
            request_timeout_ms: 10_000,
            max_retries: 3,
            base_retry_delay_ms: 100,
            max_retry_delay_ms: 5_000,
            max_concurrent: 4,
        }
    }
}

impl ExchangeConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub const fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    #[must_use]
    pub const fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

/// Loop cadence and entry gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Symbols evaluated by the scanner.
    pub universe: Vec<String>,
    pub monitor_interval_ms: u64,
    pub scan_interval_secs: u64,
    pub coordinator_interval_ms: u64,
    /// Cache data older than `staleness_factor * scan_interval` is discarded.
    pub staleness_factor: u32,
    pub max_positions: usize,
    /// Group label to member symbols.
    pub correlation_groups: HashMap<String, Vec<String>>,
    pub max_per_correlation_group: usize,
    pub reentry_cooldown_secs: u64,
    pub min_confidence: Decimal,
    pub scanner_workers: usize,
    /// Upper bound on how long any loop sleeps before re-checking the running flag.
    pub shutdown_poll_ms: u64,
    pub history_capacity: usize,
    /// Where `RiskState` is persisted between runs; `None` disables persistence.
    pub state_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            universe: vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()],
            monitor_interval_ms: 1_000,
            scan_interval_secs: 60,
            coordinator_interval_ms: 2_000,
            staleness_factor: 2,
            max_positions: 3,
            correlation_groups: HashMap::new(),
            max_per_correlation_group: 1,
            reentry_cooldown_secs: 900,
            min_confidence: dec!(0.6),
            scanner_workers: 4,
            shutdown_poll_ms: 250,
            history_capacity: 200,
            state_path: None,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    #[must_use]
    pub const fn coordinator_interval(&self) -> Duration {
        Duration::from_millis(self.coordinator_interval_ms)
    }

    /// Maximum age of scanner output the coordinator will act on.
    #[must_use]
    pub fn max_cache_age(&self) -> Duration {
        self.scan_interval() * self.staleness_factor
    }

    #[must_use]
    pub const fn reentry_cooldown(&self) -> Duration {
        Duration::from_secs(self.reentry_cooldown_secs)
    }

    #[must_use]
    pub const fn shutdown_poll(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_ms)
    }

    /// Correlation group `symbol` belongs to, if any.
    #[must_use]
    pub fn correlation_group(&self, symbol: &str) -> Option<&str> {
        self.correlation_groups
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == symbol))
            .map(|(group, _)| group.as_str())
    }
}

/// Parameters of the sizing engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Stop distance at reference volatility, as a fraction of entry.
    pub base_stop_distance: Decimal,
    pub min_stop_distance: Decimal,
    pub max_stop_distance: Decimal,
    /// Volatility at which the base stop distance applies unscaled.
    pub reference_volatility: Decimal,
    /// Target distance = stop distance * this ratio.
    pub reward_risk_ratio: Decimal,

    pub min_leverage: u32,
    pub max_leverage: u32,
    /// Volatility at or below which the calm leverage bucket applies.
    pub low_volatility: Decimal,
    /// Volatility above which the turbulent leverage bucket applies.
    pub high_volatility: Decimal,
    pub calm_leverage: u32,
    pub normal_leverage: u32,
    pub turbulent_leverage: u32,
    /// Confidence at or above which leverage gets `confidence_leverage_step` added.
    pub high_confidence: Decimal,
    /// Confidence below which leverage gets `confidence_leverage_step` removed.
    pub low_confidence: Decimal,
    pub confidence_leverage_step: u32,
    /// Leveraged loss at the stop must not exceed this.
    pub max_stop_roi: Decimal,

    /// Fractional Kelly multiplier, within [0.25, 0.5].
    pub kelly_safety: Decimal,
    pub min_risk_fraction: Decimal,
    pub max_risk_fraction: Decimal,
    /// Used until `min_trades_for_kelly` outcomes are recorded.
    pub fallback_risk_fraction: Decimal,
    pub min_trades_for_kelly: usize,
    /// Rolling outcome window for win rate and payoff.
    pub rolling_window: usize,

    pub moderate_drawdown: Decimal,
    pub moderate_throttle: Decimal,
    pub severe_drawdown: Decimal,
    pub severe_throttle: Decimal,

    /// Loss at stop as a fraction of equity, checked last.
    pub max_risk_per_trade: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_stop_distance: dec!(0.015),
            min_stop_distance: dec!(0.012),
            max_stop_distance: dec!(0.04),
            reference_volatility: dec!(0.02),
            reward_risk_ratio: dec!(3),
            min_leverage: 2,
            max_leverage: 12,
            low_volatility: dec!(0.015),
            high_volatility: dec!(0.035),
            calm_leverage: 10,
            normal_leverage: 6,
            turbulent_leverage: 3,
            high_confidence: dec!(0.8),
            low_confidence: dec!(0.6),
            confidence_leverage_step: 2,
            max_stop_roi: dec!(0.18),
            kelly_safety: dec!(0.25),
            min_risk_fraction: dec!(0.005),
            max_risk_fraction: dec!(0.035),
            fallback_risk_fraction: dec!(0.01),
            min_trades_for_kelly: 20,
            rolling_window: 50,
            moderate_drawdown: dec!(0.15),
            moderate_throttle: dec!(0.75),
            severe_drawdown: dec!(0.20),
            severe_throttle: dec!(0.5),
            max_risk_per_trade: dec!(0.05),
        }
    }
}

/// Thresholds of the exit state machine and the stop/target adjuster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitPolicy {
    pub emergency_severe_roi: Decimal,
    pub emergency_moderate_roi: Decimal,
    pub emergency_early_roi: Decimal,

    pub stall_after_secs: u64,
    pub stall_min_roi: Decimal,
    /// Fraction of the stop-to-entry gap closed per tightening.
    pub stall_tighten_fraction: Decimal,

    pub profit_lock_min_peak: Decimal,
    /// Fraction of peak ROI given back that triggers the lock.
    pub profit_lock_retrace: Decimal,

    pub breakeven_progress: Decimal,
    pub trail_progress: Decimal,
    /// Progress from which only the capped extensions may move the target.
    pub freeze_progress: Decimal,
    pub near_target_progress: Decimal,
    pub mid_progress: Decimal,

    pub beyond_target_extension: Decimal,
    pub near_target_extension: Decimal,
    pub mid_extension: Decimal,
    pub early_extension: Decimal,

    /// Momentum confidence required before any target extension.
    pub momentum_threshold: Decimal,
    pub extension_cooldown_secs: u64,
    /// Cumulative extension bound, as a multiple of the initial target distance.
    pub max_total_extension: Decimal,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self {
            emergency_severe_roi: dec!(-0.50),
            emergency_moderate_roi: dec!(-0.35),
            emergency_early_roi: dec!(-0.20),
            stall_after_secs: 4 * 3600,
            stall_min_roi: dec!(0.02),
            stall_tighten_fraction: dec!(0.5),
            profit_lock_min_peak: dec!(0.10),
            profit_lock_retrace: dec!(0.30),
            breakeven_progress: dec!(0.5),
            trail_progress: dec!(0.7),
            freeze_progress: dec!(0.7),
            near_target_progress: dec!(0.9),
            mid_progress: dec!(0.5),
            beyond_target_extension: dec!(0.03),
            near_target_extension: dec!(0.05),
            mid_extension: dec!(0.10),
            early_extension: dec!(0.50),
            momentum_threshold: dec!(0.7),
            extension_cooldown_secs: 300,
            max_total_extension: dec!(1.0),
        }
    }
}

impl ExitPolicy {
    #[must_use]
    pub const fn stall_after(&self) -> Duration {
        Duration::from_secs(self.stall_after_secs)
    }

    #[must_use]
    pub const fn extension_cooldown(&self) -> Duration {
        Duration::from_secs(self.extension_cooldown_secs)
    }
}

/// Trading halt thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub max_consecutive_failures: u32,
    pub pause_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            pause_secs: 5 * 60,
        }
    }
}

impl BreakerConfig {
    #[must_use]
    pub const fn pause_duration(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }
}

/// Simulated execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub starting_balance: Decimal,
    /// Adverse fill slippage as a fraction of price.
    pub slippage: Decimal,
    /// Commission as a fraction of notional.
    pub commission: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_balance: dec!(10000),
            slippage: dec!(0.0005),
            commission: dec!(0.00035),
        }
    }
}

impl SentinelConfig {
    /// Rejects inverted bounds and out-of-range parameters.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sizing;
        if s.min_stop_distance <= Decimal::ZERO || s.min_stop_distance > s.max_stop_distance {
            return Err(ConfigError::invalid(
                "sizing.min_stop_distance",
                format!(
                    "must be positive and <= max_stop_distance ({})",
                    s.max_stop_distance
                ),
            ));
        }
        if s.reference_volatility <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "sizing.reference_volatility",
                "must be positive",
            ));
        }
        if s.reward_risk_ratio <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "sizing.reward_risk_ratio",
                "must be positive",
            ));
        }
        if s.min_leverage == 0 || s.min_leverage > s.max_leverage {
            return Err(ConfigError::invalid(
                "sizing.min_leverage",
                format!("must be >= 1 and <= max_leverage ({})", s.max_leverage),
            ));
        }
        if s.kelly_safety < dec!(0.25) || s.kelly_safety > dec!(0.5) {
            return Err(ConfigError::invalid(
                "sizing.kelly_safety",
                format!("{} outside [0.25, 0.5]", s.kelly_safety),
            ));
        }
        if s.min_risk_fraction <= Decimal::ZERO || s.min_risk_fraction > s.max_risk_fraction {
            return Err(ConfigError::invalid(
                "sizing.min_risk_fraction",
                "must be positive and <= max_risk_fraction",
            ));
        }
        if s.max_stop_roi <= Decimal::ZERO || s.max_risk_per_trade <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "sizing.max_stop_roi",
                "stop ROI and per-trade risk caps must be positive",
            ));
        }
        if s.moderate_drawdown > s.severe_drawdown {
            return Err(ConfigError::invalid(
                "sizing.moderate_drawdown",
                "must not exceed severe_drawdown",
            ));
        }

        let x = &self.exits;
        if !(x.emergency_severe_roi < x.emergency_moderate_roi
            && x.emergency_moderate_roi < x.emergency_early_roi
            && x.emergency_early_roi < Decimal::ZERO)
        {
            return Err(ConfigError::invalid(
                "exits.emergency_early_roi",
                "emergency tiers must be negative and strictly ordered severe < moderate < early",
            ));
        }
        if x.breakeven_progress > x.trail_progress {
            return Err(ConfigError::invalid(
                "exits.breakeven_progress",
                "must not exceed trail_progress",
            ));
        }
        if x.profit_lock_retrace <= Decimal::ZERO || x.profit_lock_retrace > Decimal::ONE {
            return Err(ConfigError::invalid(
                "exits.profit_lock_retrace",
                "must lie in (0, 1]",
            ));
        }

        let e = &self.engine;
        if e.staleness_factor == 0 || e.scan_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "engine.staleness_factor",
                "scan interval and staleness factor must be positive",
            ));
        }
        if e.max_positions == 0 || e.scanner_workers == 0 {
            return Err(ConfigError::invalid(
                "engine.max_positions",
                "position limit and scanner workers must be positive",
            ));
        }

        if self.exchange.max_retries == 0 || self.exchange.requests_per_second == 0 {
            return Err(ConfigError::invalid(
                "exchange.max_retries",
                "retry attempts and rate limit must be positive",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SentinelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.max_cache_age(), Duration::from_secs(120));
        assert_eq!(config.sizing.max_leverage, 12);
        assert_eq!(config.exits.emergency_early_roi, dec!(-0.20));
    }

    #[test]
    fn rejects_inverted_stop_bounds() {
        let mut config = SentinelConfig::default();
        config.sizing.min_stop_distance = dec!(0.05);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sizing.min_stop_distance"));
    }

    #[test]
    fn rejects_safety_fraction_outside_range() {
        let mut config = SentinelConfig::default();
        config.sizing.kelly_safety = dec!(0.75);
        assert!(config.validate().is_err());

        config.sizing.kelly_safety = dec!(0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unordered_emergency_tiers() {
        let mut config = SentinelConfig::default();
        config.exits.emergency_moderate_roi = dec!(-0.60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn correlation_group_lookup() {
        let mut config = EngineConfig::default();
        config.correlation_groups.insert(
            "majors".to_string(),
            vec!["BTC".to_string(), "ETH".to_string()],
        );
        assert_eq!(config.correlation_group("ETH"), Some("majors"));
        assert_eq!(config.correlation_group("DOGE"), None);
    }
}
