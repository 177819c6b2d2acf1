//! Bookkeeping and order-lifecycle components carried by the main ledger.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use abax_core::{Price, Quantity, Ticker};
use abax_ledger::Singleton;

/// The runtime's notion of "now" and the step between ticks.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    pub time: DateTime<Utc>,
    pub dtime: Duration,
}

impl Singleton for Clock {}

/// Settled cash balance.
#[derive(Clone, Copy, Debug)]
pub struct Cash {
    pub cash: Price,
}

impl Singleton for Cash {}

/// Cash snapshot taken at the start of each tick; strategies size orders
/// against this, never against the live [`Cash`] balance.
#[derive(Clone, Copy, Debug)]
pub struct PurchasePower {
    pub cash: Price,
}

impl Singleton for PurchasePower {}

/// Signed holdings for one ticker. Exactly one exists per observed ticker.
#[derive(Clone, Debug)]
pub struct Position {
    pub ticker: Ticker,
    pub quantity: Quantity,
}

/// Intent to buy, produced by a strategy system.
#[derive(Clone, Debug)]
pub struct Purchase {
    pub ticker: Ticker,
    pub quantity: Quantity,
}

/// Intent to sell, produced by a strategy system.
#[derive(Clone, Debug)]
pub struct Sale {
    pub ticker: Ticker,
    pub quantity: Quantity,
}

/// Terminal settlement attached once an order's fill is applied.
#[derive(Clone, Copy, Debug)]
pub struct Filled {
    pub avg_price: Price,
    pub quantity: Quantity,
}

/// End-of-tick portfolio valuation: cash plus marked positions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub value: Price,
    pub cash: Price,
    pub positions: Vec<(Ticker, Quantity)>,
}

/// Descriptor of a registered strategy.
#[derive(Clone, Debug)]
pub struct StrategyTag {
    pub name: String,
    pub tickers: Vec<Ticker>,
    pub only_day: bool,
}
