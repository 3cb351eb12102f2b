//! Configuration loading: defaults, then an optional TOML file, then
//! `BULKYARD_`-prefixed environment variables (`__` separates sections).

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bulkyard_core::Quantity;
use bulkyard_observability::TelemetryConfig;

pub const ENV_PREFIX: &str = "BULKYARD_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockConfig {
    /// Balances strictly below this are flagged low.
    pub low_threshold: Decimal,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            low_threshold: Decimal::from(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_update_retries: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_update_retries: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Object-storage key prefix for evidence uploads.
    pub photo_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            photo_prefix: "loadings".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticsConfig {
    pub stock: StockConfig,
    pub concurrency: ConcurrencyConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
}

impl LogisticsConfig {
    /// Layered provider chain; exposed so callers can merge extra sources.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(LogisticsConfig::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(file).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stock.low_threshold.is_sign_negative() {
            return Err(ConfigError::Invalid(
                "stock.low_threshold must not be negative".to_string(),
            ));
        }
        if self.storage.photo_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.photo_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn low_stock_threshold(&self) -> Quantity {
        Quantity::new(self.stock.low_threshold).unwrap_or(Quantity::ZERO)
    }

    /// Total attempts for a conflicting write, at least one.
    pub fn update_attempts(&self) -> u32 {
        self.concurrency.max_update_retries.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_without_sources() {
        Jail::expect_with(|_jail| {
            let config = LogisticsConfig::load(None).expect("defaults load");
            assert_eq!(config.stock.low_threshold, Decimal::from(10));
            assert_eq!(config.concurrency.max_update_retries, 8);
            assert_eq!(config.storage.photo_prefix, "loadings");
            assert_eq!(config.telemetry.log_level, "info");
            assert!(config.telemetry.json);
            Ok(())
        });
    }

    #[test]
    fn file_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bulkyard.toml",
                r#"
                [stock]
                low_threshold = 25

                [storage]
                photo_prefix = "evidence"
                "#,
            )?;
            jail.set_env("BULKYARD_STOCK__LOW_THRESHOLD", "40");
            jail.set_env("BULKYARD_TELEMETRY__JSON", "false");

            let config = LogisticsConfig::load(Some(Path::new("bulkyard.toml"))).expect("load");
            assert_eq!(config.stock.low_threshold, Decimal::from(40));
            assert_eq!(config.storage.photo_prefix, "evidence");
            assert!(!config.telemetry.json);
            assert_eq!(config.concurrency.max_update_retries, 8);
            Ok(())
        });
    }

    #[test]
    fn negative_threshold_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("BULKYARD_STOCK__LOW_THRESHOLD", "-1");
            assert!(matches!(
                LogisticsConfig::load(None),
                Err(ConfigError::Invalid(_))
            ));
            Ok(())
        });
    }
}
