//! Naming scheme for bar fields and derived indicator columns.
//!
//! Every scalar column a ledger can hold is identified by a [`SeriesSpec`]:
//! either a primitive bar field, a derived indicator parametrised by its
//! source column (and a window where applicable), or a free-form series
//! produced directly by a strategy. Concrete parametrisations are values, so
//! the indicator dependency solver can inspect a ledger's columns at runtime
//! and install the calculators they require.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one scalar column inside a ledger.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesSpec {
    /// Opening price of a bar.
    Open,
    /// Highest price of a bar.
    High,
    /// Lowest price of a bar.
    Low,
    /// Closing price of a bar.
    Close,
    /// Traded volume of a bar.
    Volume,
    /// Natural logarithm of the source.
    Log(Box<SeriesSpec>),
    /// Difference between consecutive source values.
    Difference(Box<SeriesSpec>),
    /// Relative difference between consecutive source values.
    RelDifference(Box<SeriesSpec>),
    /// Positive part of the source (gains), zero otherwise.
    Up(Box<SeriesSpec>),
    /// Negative part of the source (losses), zero otherwise.
    Down(Box<SeriesSpec>),
    /// Simple moving average over `window` source values.
    Sma { window: usize, source: Box<SeriesSpec> },
    /// Exponential moving average over `window` source values.
    Ema { window: usize, source: Box<SeriesSpec> },
    /// Sample standard deviation over `window` source values.
    StdDev { window: usize, source: Box<SeriesSpec> },
    /// Relative strength index over `window` source values.
    Rsi { window: usize, source: Box<SeriesSpec> },
    /// Upper Bollinger band over `window` source values.
    BollingerUp { window: usize, source: Box<SeriesSpec> },
    /// Lower Bollinger band over `window` source values.
    BollingerDown { window: usize, source: Box<SeriesSpec> },
    /// Rolling Sharpe ratio over `window` source values.
    Sharpe { window: usize, source: Box<SeriesSpec> },
    /// Free-form series written directly by a strategy (e.g. a pair spread).
    Custom(String),
}

impl SeriesSpec {
    pub fn log(source: SeriesSpec) -> Self {
        Self::Log(Box::new(source))
    }

    pub fn difference(source: SeriesSpec) -> Self {
        Self::Difference(Box::new(source))
    }

    pub fn rel_difference(source: SeriesSpec) -> Self {
        Self::RelDifference(Box::new(source))
    }

    pub fn up(source: SeriesSpec) -> Self {
        Self::Up(Box::new(source))
    }

    pub fn down(source: SeriesSpec) -> Self {
        Self::Down(Box::new(source))
    }

    pub fn sma(window: usize, source: SeriesSpec) -> Self {
        Self::Sma {
            window,
            source: Box::new(source),
        }
    }

    pub fn ema(window: usize, source: SeriesSpec) -> Self {
        Self::Ema {
            window,
            source: Box::new(source),
        }
    }

    pub fn std_dev(window: usize, source: SeriesSpec) -> Self {
        Self::StdDev {
            window,
            source: Box::new(source),
        }
    }

    pub fn rsi(window: usize, source: SeriesSpec) -> Self {
        Self::Rsi {
            window,
            source: Box::new(source),
        }
    }

    pub fn bollinger_up(window: usize, source: SeriesSpec) -> Self {
        Self::BollingerUp {
            window,
            source: Box::new(source),
        }
    }

    pub fn bollinger_down(window: usize, source: SeriesSpec) -> Self {
        Self::BollingerDown {
            window,
            source: Box::new(source),
        }
    }

    pub fn sharpe(window: usize, source: SeriesSpec) -> Self {
        Self::Sharpe {
            window,
            source: Box::new(source),
        }
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// The direct source column of a derived series, if any.
    #[must_use]
    pub fn source(&self) -> Option<&SeriesSpec> {
        match self {
            Self::Log(s)
            | Self::Difference(s)
            | Self::RelDifference(s)
            | Self::Up(s)
            | Self::Down(s) => Some(s),
            Self::Sma { source, .. }
            | Self::Ema { source, .. }
            | Self::StdDev { source, .. }
            | Self::Rsi { source, .. }
            | Self::BollingerUp { source, .. }
            | Self::BollingerDown { source, .. }
            | Self::Sharpe { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The aggregation window of a windowed series, if any.
    #[must_use]
    pub fn window(&self) -> Option<usize> {
        match self {
            Self::Sma { window, .. }
            | Self::Ema { window, .. }
            | Self::StdDev { window, .. }
            | Self::Rsi { window, .. }
            | Self::BollingerUp { window, .. }
            | Self::BollingerDown { window, .. }
            | Self::Sharpe { window, .. } => Some(*window),
            _ => None,
        }
    }

    /// Whether this is a raw input column (bar field or custom series) rather
    /// than one produced by a calculator.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(
            self,
            Self::Open | Self::High | Self::Low | Self::Close | Self::Volume | Self::Custom(_)
        )
    }

    /// Depth of the prerequisite chain below this series.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.source().map_or(0, |source| source.depth() + 1)
    }
}

impl fmt::Display for SeriesSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::High => write!(f, "high"),
            Self::Low => write!(f, "low"),
            Self::Close => write!(f, "close"),
            Self::Volume => write!(f, "volume"),
            Self::Log(s) => write!(f, "log({s})"),
            Self::Difference(s) => write!(f, "diff({s})"),
            Self::RelDifference(s) => write!(f, "reldiff({s})"),
            Self::Up(s) => write!(f, "up({s})"),
            Self::Down(s) => write!(f, "down({s})"),
            Self::Sma { window, source } => write!(f, "sma({window},{source})"),
            Self::Ema { window, source } => write!(f, "ema({window},{source})"),
            Self::StdDev { window, source } => write!(f, "stddev({window},{source})"),
            Self::Rsi { window, source } => write!(f, "rsi({window},{source})"),
            Self::BollingerUp { window, source } => write!(f, "bollup({window},{source})"),
            Self::BollingerDown { window, source } => write!(f, "bolldown({window},{source})"),
            Self::Sharpe { window, source } => write!(f, "sharpe({window},{source})"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_nests_sources() {
        let spec = SeriesSpec::ema(14, SeriesSpec::up(SeriesSpec::difference(SeriesSpec::Close)));
        assert_eq!(spec.to_string(), "ema(14,up(diff(close)))");
    }

    #[test]
    fn depth_counts_prerequisite_chain() {
        assert_eq!(SeriesSpec::Close.depth(), 0);
        let spec = SeriesSpec::rsi(14, SeriesSpec::Close);
        assert_eq!(spec.depth(), 1);
        let chain = SeriesSpec::ema(14, SeriesSpec::up(SeriesSpec::difference(SeriesSpec::Close)));
        assert_eq!(chain.depth(), 3);
    }

    #[test]
    fn raw_columns_are_recognised() {
        assert!(SeriesSpec::Close.is_raw());
        assert!(SeriesSpec::custom("spread").is_raw());
        assert!(!SeriesSpec::sma(3, SeriesSpec::Close).is_raw());
    }
}
