//! Calculator systems that populate derived series columns.
//!
//! Every calculator observes fresh source rows through the ledger's
//! change-tracking and writes its output column in the same tick. A value
//! that is undefined at a row (insufficient window, log of a non-positive
//! value, zero deviation) is simply not produced for that row.

use rust_decimal::Decimal;

use abax_core::SeriesSpec;
use abax_ledger::{ColumnKey, Entity, Ledger, LedgerResult, System};

use crate::value::{window_mean, window_sample_std, IndicatorValue};

fn source_value(ledger: &Ledger, spec: &SeriesSpec, entity: Entity) -> Option<Decimal> {
    ledger.series(spec).and_then(|column| column.get(entity))
}

/// Natural logarithm of the source column.
pub struct LogCalc {
    name: String,
    source: SeriesSpec,
    output: SeriesSpec,
}

impl LogCalc {
    pub fn new(output: SeriesSpec, source: SeriesSpec) -> Self {
        Self {
            name: output.to_string(),
            source,
            output,
        }
    }
}

impl System for LogCalc {
    fn name(&self) -> &str {
        &self.name
    }

    fn requests(&self) -> Vec<ColumnKey> {
        vec![
            ColumnKey::series(self.source.clone()),
            ColumnKey::series(self.output.clone()),
        ]
    }

    fn run(&mut self, ledger: &mut Ledger) -> LedgerResult<()> {
        let fresh = ledger.new_entities(&self.name, &[ColumnKey::series(self.source.clone())])?;
        for entity in fresh {
            let value = source_value(ledger, &self.source, entity).and_then(IndicatorValue::ln);
            if let Some(value) = value {
                ledger.set_series(&self.output, entity, value)?;
            }
        }
        Ok(())
    }
}

/// Difference (or relative difference) between consecutive source values.
pub struct DiffCalc {
    name: String,
    relative: bool,
    source: SeriesSpec,
    output: SeriesSpec,
}

impl DiffCalc {
    pub fn new(output: SeriesSpec, source: SeriesSpec, relative: bool) -> Self {
        Self {
            name: output.to_string(),
            relative,
            source,
            output,
        }
    }
}

impl System for DiffCalc {
    fn name(&self) -> &str {
        &self.name
    }

    fn requests(&self) -> Vec<ColumnKey> {
        vec![
            ColumnKey::series(self.source.clone()),
            ColumnKey::series(self.output.clone()),
        ]
    }

    fn run(&mut self, ledger: &mut Ledger) -> LedgerResult<()> {
        let fresh = ledger.new_entities(&self.name, &[ColumnKey::series(self.source.clone())])?;
        for entity in fresh {
            let value = {
                let Some(column) = ledger.series(&self.source) else {
                    continue;
                };
                let Some(pos) = column.position(entity) else {
                    continue;
                };
                if pos == 0 {
                    continue;
                }
                let (_, current) = column.at(pos).expect("position is valid");
                let (_, previous) = column.at(pos - 1).expect("previous row exists");
                if self.relative {
                    current.sub(previous).div(previous)
                } else {
                    Some(current - previous)
                }
            };
            if let Some(value) = value {
                ledger.set_series(&self.output, entity, value)?;
            }
        }
        Ok(())
    }
}

/// Splits a source column into its gain and loss parts.
pub struct UpDownCalc {
    name: String,
    source: SeriesSpec,
    up: SeriesSpec,
    down: SeriesSpec,
}

impl UpDownCalc {
    pub fn new(source: SeriesSpec) -> Self {
        Self {
            name: format!("updown({source})"),
            up: SeriesSpec::up(source.clone()),
            down: SeriesSpec::down(source.clone()),
            source,
        }
    }
}

impl System for UpDownCalc {
    fn name(&self) -> &str {
        &self.name
    }

    fn requests(&self) -> Vec<ColumnKey> {
        vec![
            ColumnKey::series(self.source.clone()),
            ColumnKey::series(self.up.clone()),
            ColumnKey::series(self.down.clone()),
        ]
    }

    fn run(&mut self, ledger: &mut Ledger) -> LedgerResult<()> {
        let fresh = ledger.new_entities(&self.name, &[ColumnKey::series(self.source.clone())])?;
        for entity in fresh {
            let Some(value) = source_value(ledger, &self.source, entity) else {
                continue;
            };
            let up = value.max(Decimal::ZERO);
            let down = value.min(Decimal::ZERO);
            ledger.set_series(&self.up, entity, up)?;
            ledger.set_series(&self.down, entity, down)?;
        }
        Ok(())
    }
}

/// Aggregation applied by a [`WindowCalc`].
#[derive(Clone, Copy)]
pub enum WindowKind {
    Mean,
    SampleStd,
}

/// Rolling-window aggregate over the source column (SMA, moving std-dev).
pub struct WindowCalc {
    name: String,
    kind: WindowKind,
    window: usize,
    source: SeriesSpec,
    output: SeriesSpec,
}

impl WindowCalc {
    pub fn new(output: SeriesSpec, source: SeriesSpec, window: usize, kind: WindowKind) -> Self {
        Self {
            name: output.to_string(),
            kind,
            window,
            source,
            output,
        }
    }
}

impl System for WindowCalc {
    fn name(&self) -> &str {
        &self.name
    }

    fn requests(&self) -> Vec<ColumnKey> {
        vec![
            ColumnKey::series(self.source.clone()),
            ColumnKey::series(self.output.clone()),
        ]
    }

    fn run(&mut self, ledger: &mut Ledger) -> LedgerResult<()> {
        let fresh = ledger.new_entities(&self.name, &[ColumnKey::series(self.source.clone())])?;
        for entity in fresh {
            let value = {
                let Some(column) = ledger.series(&self.source) else {
                    continue;
                };
                let Some(pos) = column.position(entity) else {
                    continue;
                };
                column.window_ending_at(pos, self.window).and_then(|window| {
                    let values: Vec<Decimal> = window.iter().map(|(_, v)| *v).collect();
                    match self.kind {
                        WindowKind::Mean => window_mean(&values),
                        WindowKind::SampleStd => window_sample_std(&values),
                    }
                })
            };
            if let Some(value) = value {
                ledger.set_series(&self.output, entity, value)?;
            }
        }
        Ok(())
    }
}

/// Exponential moving average, seeded with the simple mean of the first
/// window and smoothed with α = 2 / (window + 1) afterwards.
pub struct EmaCalc {
    name: String,
    window: usize,
    source: SeriesSpec,
    output: SeriesSpec,
}

impl EmaCalc {
    pub fn new(output: SeriesSpec, source: SeriesSpec, window: usize) -> Self {
        Self {
            name: output.to_string(),
            window,
            source,
            output,
        }
    }

    fn alpha(&self) -> Decimal {
        Decimal::from(2) / Decimal::from(self.window as u64 + 1)
    }
}

impl System for EmaCalc {
    fn name(&self) -> &str {
        &self.name
    }

    fn requests(&self) -> Vec<ColumnKey> {
        vec![
            ColumnKey::series(self.source.clone()),
            ColumnKey::series(self.output.clone()),
        ]
    }

    fn run(&mut self, ledger: &mut Ledger) -> LedgerResult<()> {
        let fresh = ledger.new_entities(&self.name, &[ColumnKey::series(self.source.clone())])?;
        for entity in fresh {
            let value = {
                let Some(column) = ledger.series(&self.source) else {
                    continue;
                };
                let Some(pos) = column.position(entity) else {
                    continue;
                };
                if pos + 1 < self.window {
                    None
                } else {
                    let (_, current) = column.at(pos).expect("position is valid");
                    let previous = if pos == 0 {
                        None
                    } else {
                        column
                            .at(pos - 1)
                            .and_then(|(prev, _)| {
                                ledger.series(&self.output).and_then(|out| out.get(prev))
                            })
                    };
                    match previous {
                        Some(prev) => {
                            let alpha = self.alpha();
                            Some(alpha * current + (Decimal::ONE - alpha) * prev)
                        }
                        None => column.window_ending_at(pos, self.window).and_then(|window| {
                            let values: Vec<Decimal> =
                                window.iter().map(|(_, v)| *v).collect();
                            window_mean(&values)
                        }),
                    }
                }
            };
            if let Some(value) = value {
                ledger.set_series(&self.output, entity, value)?;
            }
        }
        Ok(())
    }
}

/// Relative strength index combined from the gain/loss EMA pair.
pub struct RsiCalc {
    name: String,
    ema_up: SeriesSpec,
    ema_down: SeriesSpec,
    output: SeriesSpec,
}

impl RsiCalc {
    pub fn new(output: SeriesSpec, ema_up: SeriesSpec, ema_down: SeriesSpec) -> Self {
        Self {
            name: output.to_string(),
            ema_up,
            ema_down,
            output,
        }
    }
}

impl System for RsiCalc {
    fn name(&self) -> &str {
        &self.name
    }

    fn requests(&self) -> Vec<ColumnKey> {
        vec![
            ColumnKey::series(self.ema_up.clone()),
            ColumnKey::series(self.ema_down.clone()),
            ColumnKey::series(self.output.clone()),
        ]
    }

    fn run(&mut self, ledger: &mut Ledger) -> LedgerResult<()> {
        let inputs = [
            ColumnKey::series(self.ema_up.clone()),
            ColumnKey::series(self.ema_down.clone()),
        ];
        let fresh = ledger.new_entities(&self.name, &inputs)?;
        let hundred = Decimal::from(100);
        for entity in fresh {
            let gains = source_value(ledger, &self.ema_up, entity);
            let losses = source_value(ledger, &self.ema_down, entity);
            let (Some(gains), Some(losses)) = (gains, losses) else {
                continue;
            };
            let avg_loss = -losses;
            let value = if avg_loss.is_zero() {
                hundred
            } else {
                let rs = gains / avg_loss;
                hundred - hundred / (Decimal::ONE + rs)
            };
            ledger.set_series(&self.output, entity, value)?;
        }
        Ok(())
    }
}

/// One Bollinger band: the window mean shifted by two deviations.
pub struct BandCalc {
    name: String,
    upper: bool,
    sma: SeriesSpec,
    std: SeriesSpec,
    output: SeriesSpec,
}

impl BandCalc {
    pub fn new(output: SeriesSpec, sma: SeriesSpec, std: SeriesSpec, upper: bool) -> Self {
        Self {
            name: output.to_string(),
            upper,
            sma,
            std,
            output,
        }
    }
}

impl System for BandCalc {
    fn name(&self) -> &str {
        &self.name
    }

    fn requests(&self) -> Vec<ColumnKey> {
        vec![
            ColumnKey::series(self.sma.clone()),
            ColumnKey::series(self.std.clone()),
            ColumnKey::series(self.output.clone()),
        ]
    }

    fn run(&mut self, ledger: &mut Ledger) -> LedgerResult<()> {
        let inputs = [
            ColumnKey::series(self.sma.clone()),
            ColumnKey::series(self.std.clone()),
        ];
        let fresh = ledger.new_entities(&self.name, &inputs)?;
        let width = Decimal::from(2);
        for entity in fresh {
            let mean = source_value(ledger, &self.sma, entity);
            let deviation = source_value(ledger, &self.std, entity);
            let (Some(mean), Some(deviation)) = (mean, deviation) else {
                continue;
            };
            let value = if self.upper {
                mean + width * deviation
            } else {
                mean - width * deviation
            };
            ledger.set_series(&self.output, entity, value)?;
        }
        Ok(())
    }
}

/// Rolling Sharpe ratio: window mean over window deviation.
pub struct SharpeCalc {
    name: String,
    sma: SeriesSpec,
    std: SeriesSpec,
    output: SeriesSpec,
}

impl SharpeCalc {
    pub fn new(output: SeriesSpec, sma: SeriesSpec, std: SeriesSpec) -> Self {
        Self {
            name: output.to_string(),
            sma,
            std,
            output,
        }
    }
}

impl System for SharpeCalc {
    fn name(&self) -> &str {
        &self.name
    }

    fn requests(&self) -> Vec<ColumnKey> {
        vec![
            ColumnKey::series(self.sma.clone()),
            ColumnKey::series(self.std.clone()),
            ColumnKey::series(self.output.clone()),
        ]
    }

    fn run(&mut self, ledger: &mut Ledger) -> LedgerResult<()> {
        let inputs = [
            ColumnKey::series(self.sma.clone()),
            ColumnKey::series(self.std.clone()),
        ];
        let fresh = ledger.new_entities(&self.name, &inputs)?;
        for entity in fresh {
            let mean = source_value(ledger, &self.sma, entity);
            let deviation = source_value(ledger, &self.std, entity);
            let (Some(mean), Some(deviation)) = (mean, deviation) else {
                continue;
            };
            if let Some(value) = mean.div(deviation) {
                ledger.set_series(&self.output, entity, value)?;
            }
        }
        Ok(())
    }
}
