//! The trading runtime: bookkeeping components, the main-stage pipeline, and
//! the drivers that make live execution and historical replay share one code
//! path.

use thiserror::Error;

use abax_broker::BrokerError;
use abax_ledger::LedgerError;
use abax_strategy::StrategyError;

mod calendar;
mod components;
mod live;
mod systems;
mod trader;

pub use calendar::TradingCalendar;
pub use components::{
    Cash, Clock, Filled, PortfolioSnapshot, Position, Purchase, PurchasePower, Sale, StrategyTag,
};
pub use live::{NewDataEvent, StopFlags};
pub use systems::{
    DayCloser, Filler, PowerSnapshot, Purchaser, Seller, SnapShotter, StrategyRunner, Timer,
    TraderSystem,
};
pub use trader::{ingest_bar, Backtest, Mode, Trader, TraderCore, TraderSettings};

/// Convenience alias for runtime results.
pub type TraderResult<T> = Result<T, TraderError>;

/// Failure modes surfaced by the runtime.
#[derive(Debug, Error)]
pub enum TraderError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    /// Invalid wiring or run configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
