//! Double moving-average crossover reference strategy.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use abax_core::{Price, Quantity, SeriesSpec, Ticker};

use crate::{
    Strategy, StrategyConfig, StrategyError, StrategyFactory, StrategyResult, StrategySystem,
    StrategyTick,
};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SmaCrossConfig {
    pub ticker: Ticker,
    pub fast_window: usize,
    pub slow_window: usize,
    pub quantity: Quantity,
    pub only_day: bool,
}

impl Default for SmaCrossConfig {
    fn default() -> Self {
        Self {
            ticker: "AAPL".to_string(),
            fast_window: 5,
            slow_window: 20,
            quantity: Decimal::ONE,
            only_day: false,
        }
    }
}

/// Goes long when the fast average crosses above the slow one, and exits the
/// long when it crosses back below.
pub struct SmaCross {
    cfg: SmaCrossConfig,
    fast: SeriesSpec,
    slow: SeriesSpec,
    previous: Option<(Price, Price)>,
}

impl SmaCross {
    pub fn new(cfg: SmaCrossConfig) -> StrategyResult<Self> {
        if cfg.fast_window == 0 || cfg.slow_window == 0 {
            return Err(StrategyError::InvalidConfig(
                "window values must be greater than zero".into(),
            ));
        }
        if cfg.fast_window >= cfg.slow_window {
            return Err(StrategyError::InvalidConfig(
                "`fast_window` must be smaller than `slow_window`".into(),
            ));
        }
        Ok(Self {
            fast: SeriesSpec::sma(cfg.fast_window, SeriesSpec::Close),
            slow: SeriesSpec::sma(cfg.slow_window, SeriesSpec::Close),
            cfg,
            previous: None,
        })
    }
}

impl StrategySystem for SmaCross {
    fn name(&self) -> &str {
        "sma-cross"
    }

    fn required_series(&self) -> Vec<SeriesSpec> {
        vec![self.fast.clone(), self.slow.clone()]
    }

    fn run(&mut self, ctx: &mut StrategyTick<'_>) -> StrategyResult<()> {
        let Some(asset) = ctx.asset(0) else {
            return Err(StrategyError::Internal(
                "sma-cross needs one asset ledger".into(),
            ));
        };
        let latest = {
            let ledger = asset.read();
            let fast = ledger.series(&self.fast).and_then(|column| column.last());
            let slow = ledger.series(&self.slow).and_then(|column| column.last());
            match (fast, slow) {
                (Some((_, fast)), Some((_, slow))) => Some((fast, slow)),
                _ => None,
            }
        };
        let Some((fast, slow)) = latest else {
            return Ok(());
        };
        if let Some((prev_fast, prev_slow)) = self.previous {
            let position = ctx.position(&self.cfg.ticker);
            if prev_fast <= prev_slow && fast > slow && position <= Decimal::ZERO {
                ctx.buy(self.cfg.ticker.clone(), self.cfg.quantity);
            } else if prev_fast >= prev_slow && fast < slow && position > Decimal::ZERO {
                ctx.sell(self.cfg.ticker.clone(), position);
            }
        }
        self.previous = Some((fast, slow));
        Ok(())
    }
}

pub struct SmaCrossFactory;

impl StrategyFactory for SmaCrossFactory {
    fn canonical_name(&self) -> &'static str {
        "SmaCross"
    }

    fn build(&self, params: toml::Value) -> StrategyResult<Strategy> {
        let cfg: SmaCrossConfig = params.try_into().map_err(|err: toml::de::Error| {
            StrategyError::InvalidConfig(format!("failed to parse SmaCross config: {err}"))
        })?;
        let descriptor = StrategyConfig {
            name: "sma-cross".into(),
            tickers: vec![cfg.ticker.clone()],
            only_day: cfg.only_day,
        };
        Ok(Strategy::new(descriptor)?.with_system(Box::new(SmaCross::new(cfg)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::Utc;

    use abax_ledger::Ledger;

    use crate::{share, OrderIntent, SharedLedger};

    fn push_averages(asset: &SharedLedger, fast: i64, slow: i64) {
        let mut ledger = asset.write();
        let entity = ledger.create();
        let fast_spec = SeriesSpec::sma(2, SeriesSpec::Close);
        let slow_spec = SeriesSpec::sma(4, SeriesSpec::Close);
        ledger
            .set_series(&fast_spec, entity, Decimal::from(fast))
            .unwrap();
        ledger
            .set_series(&slow_spec, entity, Decimal::from(slow))
            .unwrap();
    }

    #[test]
    fn golden_cross_emits_a_purchase() {
        let cfg = SmaCrossConfig {
            ticker: "AAPL".into(),
            fast_window: 2,
            slow_window: 4,
            quantity: Decimal::from(3),
            only_day: false,
        };
        let mut system = SmaCross::new(cfg).unwrap();
        let asset = share(Ledger::new("AAPL"));
        let combined = share(Ledger::new("AAPL"));
        let tickers = vec!["AAPL".to_string()];
        let assets = vec![asset.clone()];
        let positions = HashMap::new();
        let prices = HashMap::new();

        for (fast, slow) in [(1, 2), (3, 2)] {
            push_averages(&asset, fast, slow);
            let mut intents = Vec::new();
            let mut ctx = StrategyTick {
                time: Utc::now(),
                tickers: &tickers,
                assets: &assets,
                combined: &combined,
                purchase_power: Decimal::from(1_000),
                positions: &positions,
                prices: &prices,
                intents: &mut intents,
            };
            system.run(&mut ctx).unwrap();
            if fast < slow {
                assert!(intents.is_empty());
            } else {
                assert_eq!(
                    intents,
                    vec![OrderIntent::Purchase {
                        ticker: "AAPL".into(),
                        quantity: Decimal::from(3),
                    }]
                );
            }
        }
    }

    #[test]
    fn inverted_windows_are_rejected() {
        let cfg = SmaCrossConfig {
            fast_window: 20,
            slow_window: 5,
            ..SmaCrossConfig::default()
        };
        assert!(SmaCross::new(cfg).is_err());
    }
}
