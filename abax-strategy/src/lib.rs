//! Strategy descriptors, the per-tick strategy system contract, the global
//! strategy registry, and a portfolio of reference strategies.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use abax_core::{Price, Quantity, SeriesSpec, Ticker};
use abax_ledger::{ColumnKey, Ledger};

mod pair;
mod sma_cross;

pub use pair::{spread_series, PairStrat, PairStratConfig, SpreadCalculator, SPREAD};
pub use sma_cross::{SmaCross, SmaCrossConfig};

/// Result alias used within strategy implementations.
pub type StrategyResult<T> = Result<T, StrategyError>;

/// Failure variants surfaced by strategies.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// A strategy's configuration cannot be parsed or is invalid.
    #[error("configuration is invalid: {0}")]
    InvalidConfig(String),
    /// The strategy lacks sufficient historical data to proceed.
    #[error("not enough historical data to compute indicators")]
    NotEnoughData,
    /// All other errors that should bubble up to the caller.
    #[error("an internal strategy error occurred: {0}")]
    Internal(String),
}

/// A ledger shared between the runtime's tasks. Writers hold the lock only
/// for short critical sections; never across a suspension point.
pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Wrap a ledger for cross-task sharing.
#[must_use]
pub fn share(ledger: Ledger) -> SharedLedger {
    Arc::new(RwLock::new(ledger))
}

/// An order intent produced by a strategy system during one tick.
#[derive(Clone, Debug, PartialEq)]
pub enum OrderIntent {
    Purchase { ticker: Ticker, quantity: Quantity },
    Sale { ticker: Ticker, quantity: Quantity },
}

/// Everything a strategy system observes during one tick: the asset ledgers
/// in declared ticker order, the combined ledger last, portfolio state, and
/// the scratch collecting order intents.
pub struct StrategyTick<'a> {
    pub time: DateTime<Utc>,
    pub tickers: &'a [Ticker],
    pub assets: &'a [SharedLedger],
    pub combined: &'a SharedLedger,
    pub purchase_power: Price,
    pub positions: &'a HashMap<Ticker, Quantity>,
    pub prices: &'a HashMap<Ticker, Price>,
    pub intents: &'a mut Vec<OrderIntent>,
}

impl StrategyTick<'_> {
    /// Ledger of the `index`-th declared ticker.
    #[must_use]
    pub fn asset(&self, index: usize) -> Option<&SharedLedger> {
        self.assets.get(index)
    }

    /// Signed position for a ticker; zero when untracked.
    #[must_use]
    pub fn position(&self, ticker: &str) -> Quantity {
        self.positions.get(ticker).copied().unwrap_or_default()
    }

    /// Latest known price for a ticker.
    #[must_use]
    pub fn price(&self, ticker: &str) -> Option<Price> {
        self.prices.get(ticker).copied()
    }

    /// Queue a purchase intent.
    pub fn buy(&mut self, ticker: impl Into<Ticker>, quantity: Quantity) {
        self.intents.push(OrderIntent::Purchase {
            ticker: ticker.into(),
            quantity,
        });
    }

    /// Queue a sale intent.
    pub fn sell(&mut self, ticker: impl Into<Ticker>, quantity: Quantity) {
        self.intents.push(OrderIntent::Sale {
            ticker: ticker.into(),
            quantity,
        });
    }
}

/// A unit of strategy computation invoked once per tick.
pub trait StrategySystem: Send + Sync {
    /// Stable identifier used in logs and change tracking.
    fn name(&self) -> &str;

    /// Series this system needs registered in every asset ledger it observes.
    fn required_series(&self) -> Vec<SeriesSpec> {
        Vec::new()
    }

    /// Series this system needs registered in the combined ledger.
    fn required_combined_series(&self) -> Vec<SeriesSpec> {
        Vec::new()
    }

    /// Columns tracked incrementally in the combined ledger; day close
    /// fast-forwards their marks so a new session starts clean.
    fn requests(&self) -> Vec<ColumnKey> {
        Vec::new()
    }

    fn run(&mut self, ctx: &mut StrategyTick<'_>) -> StrategyResult<()>;
}

/// Descriptor binding a name, an ordered list of systems, and the assets the
/// strategy observes.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub name: String,
    pub tickers: Vec<Ticker>,
    #[serde(default)]
    pub only_day: bool,
}

impl StrategyConfig {
    /// Identifier of the strategy's combined ledger.
    #[must_use]
    pub fn combined_id(&self) -> String {
        self.tickers.join("_")
    }
}

/// A configured strategy: its descriptor plus the boxed systems run in order.
pub struct Strategy {
    pub config: StrategyConfig,
    pub systems: Vec<Box<dyn StrategySystem>>,
}

impl Strategy {
    /// Validate the descriptor and create a strategy with no systems yet.
    pub fn new(config: StrategyConfig) -> StrategyResult<Self> {
        if config.tickers.is_empty() {
            return Err(StrategyError::InvalidConfig(format!(
                "strategy '{}' declares no tickers",
                config.name
            )));
        }
        Ok(Self {
            config,
            systems: Vec::new(),
        })
    }

    /// Append a system to the execution order.
    #[must_use]
    pub fn with_system(mut self, system: Box<dyn StrategySystem>) -> Self {
        self.systems.push(system);
        self
    }
}

// -------------------------------------------------------------------------
// Strategy registry
// -------------------------------------------------------------------------

/// Factory contract used to construct strategies from configuration.
pub trait StrategyFactory: Send + Sync {
    /// Canonical, user-facing identifier (e.g. "PairStrat").
    fn canonical_name(&self) -> &'static str;

    /// Build and configure a strategy instance with the provided parameters.
    fn build(&self, params: toml::Value) -> StrategyResult<Strategy>;
}

static STRATEGY_REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn StrategyFactory>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Register a strategy factory with the global registry.
pub fn register_strategy_factory(factory: Arc<dyn StrategyFactory>) {
    let mut registry = STRATEGY_REGISTRY.write();
    let key = normalize_name(factory.canonical_name());
    if registry.insert(key, factory.clone()).is_some() {
        tracing::warn!(
            strategy = factory.canonical_name(),
            "duplicate strategy registration detected; overriding previous factory"
        );
    }
}

/// Build a strategy by name using the registered factories.
pub fn load_strategy(name: &str, params: toml::Value) -> StrategyResult<Strategy> {
    let factory = {
        let registry = STRATEGY_REGISTRY.read();
        registry.get(&normalize_name(name)).cloned()
    };
    factory
        .ok_or_else(|| StrategyError::InvalidConfig(format!("unknown strategy: {name}")))?
        .build(params)
}

/// Names of every registered strategy, sorted.
#[must_use]
pub fn registered_strategies() -> Vec<&'static str> {
    let registry = STRATEGY_REGISTRY.read();
    let mut names: Vec<&'static str> = registry
        .values()
        .map(|factory| factory.canonical_name())
        .collect();
    names.sort_unstable();
    names
}

/// Register the reference strategies shipped with the workspace.
pub fn register_builtin_strategies() {
    register_strategy_factory(Arc::new(sma_cross::SmaCrossFactory));
    register_strategy_factory(Arc::new(pair::PairStratFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_id_joins_tickers_with_underscore() {
        let config = StrategyConfig {
            name: "pair".into(),
            tickers: vec!["AAPL".into(), "MSFT".into()],
            only_day: false,
        };
        assert_eq!(config.combined_id(), "AAPL_MSFT");
    }

    #[test]
    fn strategy_requires_at_least_one_ticker() {
        let config = StrategyConfig {
            name: "empty".into(),
            tickers: vec![],
            only_day: false,
        };
        assert!(matches!(
            Strategy::new(config),
            Err(StrategyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn builtin_strategies_load_by_name() {
        register_builtin_strategies();
        let params = toml::Value::Table(Default::default());
        let strategy = load_strategy("PairStrat", params).unwrap();
        assert_eq!(strategy.config.tickers.len(), 2);
        assert_eq!(strategy.systems.len(), 2);
        assert!(registered_strategies().contains(&"SmaCross"));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let params = toml::Value::Table(Default::default());
        assert!(matches!(
            load_strategy("nope", params),
            Err(StrategyError::InvalidConfig(_))
        ));
    }
}
