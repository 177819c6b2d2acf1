//! Pair-spread reference strategy: a spread calculator feeding the combined
//! ledger, and a z-score evaluator emitting hedged order pairs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use abax_core::{SeriesSpec, Ticker, TimeStamp};
use abax_ledger::ColumnKey;

use crate::{
    Strategy, StrategyConfig, StrategyError, StrategyFactory, StrategyResult, StrategySystem,
    StrategyTick,
};

/// Name of the combined-ledger series carrying the pair spread.
pub const SPREAD: &str = "spread";

/// Spec of the spread series.
#[must_use]
pub fn spread_series() -> SeriesSpec {
    SeriesSpec::custom(SPREAD)
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PairStratConfig {
    pub ticker1: Ticker,
    pub ticker2: Ticker,
    /// Hedge ratio γ applied to the second leg.
    pub gamma: Decimal,
    /// Flips the sign of the spread (and thereby the trade direction).
    pub invert: bool,
    pub window: usize,
    pub entry_z: Decimal,
    pub exit_z: Decimal,
    /// Quantity of the first leg; the second leg is hedged from it.
    pub quantity: Decimal,
    pub only_day: bool,
}

impl Default for PairStratConfig {
    fn default() -> Self {
        Self {
            ticker1: "AAPL".to_string(),
            ticker2: "MSFT".to_string(),
            gamma: Decimal::ONE,
            invert: false,
            window: 20,
            entry_z: Decimal::from(2),
            exit_z: Decimal::new(5, 1),
            quantity: Decimal::from(10),
            only_day: false,
        }
    }
}

/// Writes `close₁ − γ·close₂` (sign-flipped when inverted) into the combined
/// ledger for every time slot both legs have a bar.
pub struct SpreadCalculator {
    gamma: Decimal,
    invert: bool,
}

impl SpreadCalculator {
    #[must_use]
    pub fn new(gamma: Decimal, invert: bool) -> Self {
        Self { gamma, invert }
    }
}

impl StrategySystem for SpreadCalculator {
    fn name(&self) -> &str {
        "spread-calculator"
    }

    fn required_combined_series(&self) -> Vec<SeriesSpec> {
        vec![spread_series()]
    }

    fn requests(&self) -> Vec<ColumnKey> {
        vec![ColumnKey::series(spread_series())]
    }

    fn run(&mut self, ctx: &mut StrategyTick<'_>) -> StrategyResult<()> {
        let (Some(first), Some(second)) = (ctx.asset(0), ctx.asset(1)) else {
            return Err(StrategyError::Internal(
                "spread calculator needs two asset ledgers".into(),
            ));
        };
        let spread = spread_series();
        let first = first.read();
        let second = second.read();
        let mut combined = ctx.combined.write();
        let mut cursor = combined.series(&spread).map_or(0, |column| column.len());
        loop {
            let row = {
                let close_a = first.series(&SeriesSpec::Close);
                let close_b = second.series(&SeriesSpec::Close);
                match (
                    close_a.and_then(|column| column.at(cursor)),
                    close_b.and_then(|column| column.at(cursor)),
                ) {
                    (Some((entity_a, a)), Some((_, b))) => Some((entity_a, a, b)),
                    _ => None,
                }
            };
            let Some((entity_a, a, b)) = row else {
                break;
            };
            let value = if self.invert {
                self.gamma * b - a
            } else {
                a - self.gamma * b
            };
            let stamp = first
                .get::<TimeStamp>(entity_a)
                .copied()
                .unwrap_or(TimeStamp(ctx.time));
            let entity = combined.create();
            combined
                .attach(entity, stamp)
                .map_err(|err| StrategyError::Internal(err.to_string()))?;
            combined
                .set_series(&spread, entity, value)
                .map_err(|err| StrategyError::Internal(err.to_string()))?;
            cursor += 1;
        }
        Ok(())
    }
}

/// Trades the spread's z-score against its rolling mean and deviation.
pub struct PairStrat {
    cfg: PairStratConfig,
    sma: SeriesSpec,
    std: SeriesSpec,
}

impl PairStrat {
    pub fn new(cfg: PairStratConfig) -> StrategyResult<Self> {
        if cfg.window < 2 {
            return Err(StrategyError::InvalidConfig(
                "window must be at least 2".into(),
            ));
        }
        if cfg.entry_z <= cfg.exit_z {
            return Err(StrategyError::InvalidConfig(
                "`entry_z` must be greater than `exit_z`".into(),
            ));
        }
        Ok(Self {
            sma: SeriesSpec::sma(cfg.window, spread_series()),
            std: SeriesSpec::std_dev(cfg.window, spread_series()),
            cfg,
        })
    }

    /// Quantity of the second leg hedging `quantity` of the first.
    fn hedged_quantity(
        &self,
        quantity: Decimal,
        price_a: Decimal,
        price_b: Decimal,
    ) -> Option<Decimal> {
        if price_b.is_zero() {
            return None;
        }
        Some((quantity * price_a * self.cfg.gamma / price_b).round())
    }
}

impl StrategySystem for PairStrat {
    fn name(&self) -> &str {
        "pair-strat"
    }

    fn required_combined_series(&self) -> Vec<SeriesSpec> {
        vec![spread_series(), self.sma.clone(), self.std.clone()]
    }

    fn requests(&self) -> Vec<ColumnKey> {
        vec![ColumnKey::series(spread_series())]
    }

    fn run(&mut self, ctx: &mut StrategyTick<'_>) -> StrategyResult<()> {
        let ticker_a = self.cfg.ticker1.clone();
        let ticker_b = self.cfg.ticker2.clone();
        let stats = {
            let combined = ctx.combined.read();
            let spread = spread_series();
            let last = combined.series(&spread).and_then(|column| column.last());
            last.and_then(|(entity, value)| {
                let mean = combined.series(&self.sma)?.get(entity)?;
                let deviation = combined.series(&self.std)?.get(entity)?;
                Some((value, mean, deviation))
            })
        };
        let Some((value, mean, deviation)) = stats else {
            return Ok(());
        };
        if deviation.is_zero() {
            return Ok(());
        }
        let z = (value - mean) / deviation;

        let position_a = ctx.position(&ticker_a);
        if position_a.is_zero() {
            let (Some(price_a), Some(price_b)) = (ctx.price(&ticker_a), ctx.price(&ticker_b))
            else {
                return Ok(());
            };
            let Some(hedge) = self.hedged_quantity(self.cfg.quantity, price_a, price_b) else {
                return Ok(());
            };
            if z >= self.cfg.entry_z {
                ctx.buy(ticker_a, self.cfg.quantity);
                ctx.sell(ticker_b, hedge);
            } else if z <= -self.cfg.entry_z {
                ctx.sell(ticker_a, self.cfg.quantity);
                ctx.buy(ticker_b, hedge);
            }
        } else if z.abs() <= self.cfg.exit_z {
            let position_b = ctx.position(&ticker_b);
            if position_a > Decimal::ZERO {
                ctx.sell(ticker_a, position_a);
            } else {
                ctx.buy(ticker_a, position_a.abs());
            }
            if position_b > Decimal::ZERO {
                ctx.sell(ticker_b, position_b);
            } else if position_b < Decimal::ZERO {
                ctx.buy(ticker_b, position_b.abs());
            }
        }
        Ok(())
    }
}

pub struct PairStratFactory;

impl StrategyFactory for PairStratFactory {
    fn canonical_name(&self) -> &'static str {
        "PairStrat"
    }

    fn build(&self, params: toml::Value) -> StrategyResult<Strategy> {
        let cfg: PairStratConfig = params.try_into().map_err(|err: toml::de::Error| {
            StrategyError::InvalidConfig(format!("failed to parse PairStrat config: {err}"))
        })?;
        let descriptor = StrategyConfig {
            name: "pair-strat".into(),
            tickers: vec![cfg.ticker1.clone(), cfg.ticker2.clone()],
            only_day: cfg.only_day,
        };
        Ok(Strategy::new(descriptor)?
            .with_system(Box::new(SpreadCalculator::new(cfg.gamma, cfg.invert)))
            .with_system(Box::new(PairStrat::new(cfg)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};

    use abax_ledger::Ledger;

    use crate::{share, OrderIntent, SharedLedger};

    fn asset_with_closes(name: &str, closes: &[i64]) -> SharedLedger {
        let mut ledger = Ledger::new(name);
        for (minute, close) in closes.iter().enumerate() {
            let entity = ledger.create();
            let stamp = Utc
                .with_ymd_and_hms(2024, 1, 2, 14, minute as u32, 0)
                .single()
                .unwrap();
            ledger.attach(entity, TimeStamp(stamp)).unwrap();
            ledger
                .set_series(&SeriesSpec::Close, entity, Decimal::from(*close))
                .unwrap();
        }
        share(ledger)
    }

    #[test]
    fn spread_tracks_both_legs() {
        let first = asset_with_closes("A", &[10, 11, 12]);
        let second = asset_with_closes("B", &[5, 6, 7]);
        let combined = share(Ledger::new("A_B"));
        let tickers = vec!["A".to_string(), "B".to_string()];
        let assets = vec![first, second];
        let positions = HashMap::new();
        let prices = HashMap::new();
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
        let mut calculator = SpreadCalculator::new(Decimal::ONE, false);
        calculator.run(&mut ctx).unwrap();

        let combined = combined.read();
        let values: Vec<Decimal> = combined
            .series(&spread_series())
            .unwrap()
            .iter()
            .map(|(_, value)| value)
            .collect();
        assert_eq!(values, vec![5.into(), 5.into(), 5.into()]);
        // spread rows carry the leg timestamps
        let stamps: Vec<TimeStamp> = combined
            .iter::<TimeStamp>()
            .map(|(_, stamp)| *stamp)
            .collect();
        assert_eq!(stamps.len(), 3);
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }

    fn combined_with_stats(spread: i64, mean: i64, deviation: i64) -> SharedLedger {
        let mut ledger = Ledger::new("A_B");
        let entity = ledger.create();
        let sma = SeriesSpec::sma(3, spread_series());
        let std = SeriesSpec::std_dev(3, spread_series());
        ledger
            .set_series(&spread_series(), entity, Decimal::from(spread))
            .unwrap();
        ledger.set_series(&sma, entity, Decimal::from(mean)).unwrap();
        ledger
            .set_series(&std, entity, Decimal::from(deviation))
            .unwrap();
        share(ledger)
    }

    fn pair_config() -> PairStratConfig {
        PairStratConfig {
            ticker1: "A".into(),
            ticker2: "B".into(),
            gamma: Decimal::ONE,
            invert: false,
            window: 3,
            entry_z: Decimal::from(2),
            exit_z: Decimal::new(5, 1),
            quantity: Decimal::from(10),
            only_day: false,
        }
    }

    #[test]
    fn z_score_crossing_emits_hedged_pair() {
        // spread 15 against mean 10 and deviation 2 puts z at 2.5
        let combined = combined_with_stats(15, 10, 2);
        let tickers = vec!["A".to_string(), "B".to_string()];
        let assets: Vec<SharedLedger> = vec![];
        let positions = HashMap::new();
        let mut prices = HashMap::new();
        prices.insert("A".to_string(), Decimal::from(100));
        prices.insert("B".to_string(), Decimal::from(20));
        let mut intents = Vec::new();
        let mut ctx = StrategyTick {
            time: Utc::now(),
            tickers: &tickers,
            assets: &assets,
            combined: &combined,
            purchase_power: Decimal::from(10_000),
            positions: &positions,
            prices: &prices,
            intents: &mut intents,
        };
        let mut strat = PairStrat::new(pair_config()).unwrap();
        strat.run(&mut ctx).unwrap();
        // qty_b = round(10 * 100 * 1 / 20) = 50
        assert_eq!(
            intents,
            vec![
                OrderIntent::Purchase {
                    ticker: "A".into(),
                    quantity: Decimal::from(10),
                },
                OrderIntent::Sale {
                    ticker: "B".into(),
                    quantity: Decimal::from(50),
                },
            ]
        );
    }

    #[test]
    fn settled_z_score_flattens_open_positions() {
        let combined = combined_with_stats(10, 10, 2);
        let tickers = vec!["A".to_string(), "B".to_string()];
        let assets: Vec<SharedLedger> = vec![];
        let mut positions = HashMap::new();
        positions.insert("A".to_string(), Decimal::from(10));
        positions.insert("B".to_string(), Decimal::from(-50));
        let prices = HashMap::new();
        let mut intents = Vec::new();
        let mut ctx = StrategyTick {
            time: Utc::now(),
            tickers: &tickers,
            assets: &assets,
            combined: &combined,
            purchase_power: Decimal::from(10_000),
            positions: &positions,
            prices: &prices,
            intents: &mut intents,
        };
        let mut strat = PairStrat::new(pair_config()).unwrap();
        strat.run(&mut ctx).unwrap();
        assert_eq!(
            intents,
            vec![
                OrderIntent::Sale {
                    ticker: "A".into(),
                    quantity: Decimal::from(10),
                },
                OrderIntent::Purchase {
                    ticker: "B".into(),
                    quantity: Decimal::from(50),
                },
            ]
        );
    }

    #[test]
    fn flat_deviation_holds_fire() {
        let combined = combined_with_stats(15, 10, 0);
        let tickers = vec!["A".to_string(), "B".to_string()];
        let assets: Vec<SharedLedger> = vec![];
        let positions = HashMap::new();
        let prices = HashMap::new();
        let mut intents = Vec::new();
        let mut ctx = StrategyTick {
            time: Utc::now(),
            tickers: &tickers,
            assets: &assets,
            combined: &combined,
            purchase_power: Decimal::from(10_000),
            positions: &positions,
            prices: &prices,
            intents: &mut intents,
        };
        let mut strat = PairStrat::new(pair_config()).unwrap();
        strat.run(&mut ctx).unwrap();
        assert!(intents.is_empty());
    }
}
