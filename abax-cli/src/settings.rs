//! Layered configuration loading utilities.

use std::path::Path;

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub backtest: BacktestDefaults,
}

/// Defaults applied to every backtest unless the run file overrides them.
#[derive(Debug, Deserialize, Clone)]
pub struct BacktestDefaults {
    #[serde(default = "default_cash")]
    pub cash: Decimal,
    #[serde(default)]
    pub variable_transaction_fee: Decimal,
    #[serde(default)]
    pub fee_per_share: Decimal,
    #[serde(default)]
    pub fixed_transaction_fee: Decimal,
}

impl Default for BacktestDefaults {
    fn default() -> Self {
        Self {
            cash: default_cash(),
            variable_transaction_fee: Decimal::ZERO,
            fee_per_share: Decimal::ZERO,
            fixed_transaction_fee: Decimal::ZERO,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            backtest: BacktestDefaults::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cash() -> Decimal {
    Decimal::from(100_000)
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `ABAX_`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    let base_path = Path::new("config");

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(false));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }
    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));
    builder = builder.add_source(
        Environment::with_prefix("ABAX")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}
