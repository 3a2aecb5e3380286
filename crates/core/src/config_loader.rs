use crate::config::SentinelConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/Sentinel.toml";
pub const ENV_PREFIX: &str = "SENTINEL_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from the TOML file with `SENTINEL_` environment variables on top.
    ///
    /// Nested keys use `__` in environment variables, e.g. `SENTINEL_ENGINE__MAX_POSITIONS=5`.
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be parsed or the merged result fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<SentinelConfig> {
        let path = path.as_ref();
        let config: SentinelConfig = Self::figment(path)
            .extract()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;

        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    /// Loads from [`DEFAULT_CONFIG_PATH`].
    ///
    /// # Errors
    ///
    /// See [`ConfigLoader::load`].
    pub fn load_default() -> Result<SentinelConfig> {
        Self::load(DEFAULT_CONFIG_PATH)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn partial_file_keeps_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "Sentinel.toml",
                r#"
                [engine]
                max_positions = 5
                universe = ["BTC", "ETH"]

                [sizing]
                kelly_safety = 0.5
                "#,
            )?;

            let config = ConfigLoader::load("Sentinel.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.engine.max_positions, 5);
            assert_eq!(config.engine.universe, vec!["BTC", "ETH"]);
            assert_eq!(config.sizing.kelly_safety, dec!(0.5));
            assert_eq!(config.sizing.max_leverage, 12);
            assert_eq!(config.exchange.max_retries, 3);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("Sentinel.toml", "[engine]\nmax_positions = 5\n")?;
            jail.set_env("SENTINEL_ENGINE__MAX_POSITIONS", "7");
            jail.set_env("SENTINEL_BREAKER__PAUSE_SECS", "30");

            let config = ConfigLoader::load("Sentinel.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.engine.max_positions, 7);
            assert_eq!(config.breaker.pause_secs, 30);
            Ok(())
        });
    }

    #[test]
    fn missing_file_uses_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = ConfigLoader::load("absent.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.engine.staleness_factor, 2);
            Ok(())
        });
    }

    #[test]
    fn shipped_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/Sentinel.toml");
        let config = ConfigLoader::load(path).unwrap();
        assert_eq!(config.engine.correlation_group("ETH"), Some("majors"));
        assert_eq!(config.sizing.max_stop_roi, dec!(0.18));
    }

    #[test]
    fn invalid_values_are_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "Sentinel.toml",
                "[sizing]\nmin_stop_distance = 0.05\nmax_stop_distance = 0.04\n",
            )?;
            assert!(ConfigLoader::load("Sentinel.toml").is_err());
            Ok(())
        });
    }
}
