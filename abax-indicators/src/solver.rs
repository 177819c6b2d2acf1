//! Fixed-point dependency solver for indicator columns.
//!
//! Given the series columns a ledger currently knows, [`ensure_systems`]
//! installs exactly the calculator systems required to populate them and
//! registers every transitive prerequisite column, repeating until nothing
//! changes. The user merely registers the column they want; the solver wires
//! the computation.

use std::collections::HashSet;

use tracing::debug;

use abax_core::SeriesSpec;
use abax_ledger::{Ledger, LedgerResult, System};

use crate::calculators::{
    BandCalc, DiffCalc, EmaCalc, LogCalc, RsiCalc, SharpeCalc, UpDownCalc, WindowCalc, WindowKind,
};

/// Name of the stage holding calculator systems.
pub const INDICATOR_STAGE: &str = "indicators";

/// Name of the stage the indicator stage is anchored behind, when present.
pub const MAIN_STAGE: &str = "main";

struct PendingSystem {
    rank: usize,
    system: Box<dyn System>,
}

/// Ensure the ledger's `indicators` stage contains the systems required to
/// populate every registered series column, to a fixed point.
///
/// Answers the number of iterations the fixed-point loop took; calling this
/// again without registering new columns is a no-op.
pub fn ensure_systems(ledger: &mut Ledger) -> LedgerResult<usize> {
    let mut pending: Vec<PendingSystem> = Vec::new();
    let mut planned: HashSet<String> = HashSet::new();
    let mut iterations = 0;

    loop {
        iterations += 1;
        let before = (pending.len(), ledger.column_count());
        for spec in ledger.series_keys() {
            register_series(ledger, &spec, &mut pending, &mut planned)?;
        }
        if (pending.len(), ledger.column_count()) == before {
            break;
        }
    }

    if !pending.is_empty() {
        ledger.insert_stage_after(INDICATOR_STAGE, MAIN_STAGE);
    }
    // Install shallow prerequisites first so one stage pass settles the
    // whole dependency chain within a tick.
    pending.sort_by_key(|entry| entry.rank);
    for entry in pending {
        let name = entry.system.name().to_string();
        if ledger.add_system(INDICATOR_STAGE, entry.system) {
            debug!(ledger = %ledger.name(), system = %name, "calculator registered");
        }
    }
    Ok(iterations)
}

fn plan(
    ledger: &mut Ledger,
    pending: &mut Vec<PendingSystem>,
    planned: &mut HashSet<String>,
    inputs: &[SeriesSpec],
    system: Box<dyn System>,
) {
    for input in inputs {
        ledger.ensure_series(input);
    }
    let name = system.name().to_string();
    if planned.contains(&name) || ledger.has_system(INDICATOR_STAGE, &name) {
        return;
    }
    let rank = inputs.iter().map(|spec| spec.depth() + 1).max().unwrap_or(1);
    planned.insert(name);
    pending.push(PendingSystem { rank, system });
}

fn register_series(
    ledger: &mut Ledger,
    spec: &SeriesSpec,
    pending: &mut Vec<PendingSystem>,
    planned: &mut HashSet<String>,
) -> LedgerResult<()> {
    match spec {
        SeriesSpec::Open
        | SeriesSpec::High
        | SeriesSpec::Low
        | SeriesSpec::Close
        | SeriesSpec::Volume
        | SeriesSpec::Custom(_) => {}
        SeriesSpec::Log(source) => {
            let source = (**source).clone();
            plan(
                ledger,
                pending,
                planned,
                std::slice::from_ref(&source),
                Box::new(LogCalc::new(spec.clone(), source.clone())),
            );
        }
        SeriesSpec::Difference(source) => {
            let source = (**source).clone();
            plan(
                ledger,
                pending,
                planned,
                std::slice::from_ref(&source),
                Box::new(DiffCalc::new(spec.clone(), source.clone(), false)),
            );
        }
        SeriesSpec::RelDifference(source) => {
            let source = (**source).clone();
            plan(
                ledger,
                pending,
                planned,
                std::slice::from_ref(&source),
                Box::new(DiffCalc::new(spec.clone(), source.clone(), true)),
            );
        }
        SeriesSpec::Up(source) | SeriesSpec::Down(source) => {
            let source = (**source).clone();
            // one separator writes both the gain and the loss column
            ledger.ensure_series(&SeriesSpec::up(source.clone()));
            ledger.ensure_series(&SeriesSpec::down(source.clone()));
            plan(
                ledger,
                pending,
                planned,
                std::slice::from_ref(&source),
                Box::new(UpDownCalc::new(source.clone())),
            );
        }
        SeriesSpec::Sma { window, source } => {
            let source = (**source).clone();
            plan(
                ledger,
                pending,
                planned,
                std::slice::from_ref(&source),
                Box::new(WindowCalc::new(
                    spec.clone(),
                    source.clone(),
                    *window,
                    WindowKind::Mean,
                )),
            );
        }
        SeriesSpec::Ema { window, source } => {
            let source = (**source).clone();
            plan(
                ledger,
                pending,
                planned,
                std::slice::from_ref(&source),
                Box::new(EmaCalc::new(spec.clone(), source.clone(), *window)),
            );
        }
        SeriesSpec::StdDev { window, source } => {
            let source = (**source).clone();
            plan(
                ledger,
                pending,
                planned,
                std::slice::from_ref(&source),
                Box::new(WindowCalc::new(
                    spec.clone(),
                    source.clone(),
                    *window,
                    WindowKind::SampleStd,
                )),
            );
        }
        SeriesSpec::Rsi { window, source } => {
            let source = (**source).clone();
            let diff = SeriesSpec::difference(source);
            let ema_up = SeriesSpec::ema(*window, SeriesSpec::up(diff.clone()));
            let ema_down = SeriesSpec::ema(*window, SeriesSpec::down(diff));
            let inputs = [ema_up.clone(), ema_down.clone()];
            plan(
                ledger,
                pending,
                planned,
                &inputs,
                Box::new(RsiCalc::new(spec.clone(), ema_up, ema_down)),
            );
        }
        SeriesSpec::BollingerUp { window, source } | SeriesSpec::BollingerDown { window, source } => {
            let source = (**source).clone();
            ledger.ensure_series(&source);
            let sma = SeriesSpec::sma(*window, source.clone());
            let std = SeriesSpec::std_dev(*window, source);
            let inputs = [sma.clone(), std.clone()];
            let upper = matches!(spec, SeriesSpec::BollingerUp { .. });
            plan(
                ledger,
                pending,
                planned,
                &inputs,
                Box::new(BandCalc::new(spec.clone(), sma, std, upper)),
            );
        }
        SeriesSpec::Sharpe { window, source } => {
            let source = (**source).clone();
            let sma = SeriesSpec::sma(*window, source.clone());
            let std = SeriesSpec::std_dev(*window, source);
            let inputs = [sma.clone(), std.clone()];
            plan(
                ledger,
                pending,
                planned,
                &inputs,
                Box::new(SharpeCalc::new(spec.clone(), sma, std)),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn feed_close(ledger: &mut Ledger, value: i64) {
        let entity = ledger.create();
        ledger
            .set_series(&SeriesSpec::Close, entity, Decimal::from(value))
            .unwrap();
    }

    #[test]
    fn sma_registration_installs_one_calculator() {
        let mut ledger = Ledger::new("asset");
        ledger.ensure_series(&SeriesSpec::sma(3, SeriesSpec::Close));
        ensure_systems(&mut ledger).unwrap();
        assert_eq!(ledger.system_count(), 1);
        assert!(ledger.has_series(&SeriesSpec::Close));
        assert!(ledger.has_system(INDICATOR_STAGE, "sma(3,close)"));
    }

    #[test]
    fn rsi_registration_builds_full_chain() {
        let mut ledger = Ledger::new("asset");
        ledger.ensure_series(&SeriesSpec::rsi(14, SeriesSpec::Close));
        let iterations = ensure_systems(&mut ledger).unwrap();
        let diff = SeriesSpec::difference(SeriesSpec::Close);
        assert!(ledger.has_series(&diff));
        assert!(ledger.has_series(&SeriesSpec::up(diff.clone())));
        assert!(ledger.has_series(&SeriesSpec::down(diff.clone())));
        assert!(ledger.has_series(&SeriesSpec::ema(14, SeriesSpec::up(diff.clone()))));
        assert!(ledger.has_series(&SeriesSpec::ema(14, SeriesSpec::down(diff))));
        // diff + updown + two emas + rsi
        assert_eq!(ledger.system_count(), 5);
        // bounded by kinds plus the deepest prerequisite chain
        assert!(iterations <= 8, "took {iterations} iterations");
    }

    #[test]
    fn ensure_systems_twice_is_a_no_op() {
        let mut ledger = Ledger::new("asset");
        ledger.ensure_series(&SeriesSpec::bollinger_up(20, SeriesSpec::Close));
        ensure_systems(&mut ledger).unwrap();
        let systems = ledger.system_count();
        let columns = ledger.column_count();
        ensure_systems(&mut ledger).unwrap();
        assert_eq!(ledger.system_count(), systems);
        assert_eq!(ledger.column_count(), columns);
    }

    #[test]
    fn bollinger_ensures_mean_and_deviation() {
        let mut ledger = Ledger::new("asset");
        ledger.ensure_series(&SeriesSpec::bollinger_up(20, SeriesSpec::Close));
        ensure_systems(&mut ledger).unwrap();
        assert!(ledger.has_series(&SeriesSpec::sma(20, SeriesSpec::Close)));
        assert!(ledger.has_series(&SeriesSpec::std_dev(20, SeriesSpec::Close)));
        assert!(ledger.has_series(&SeriesSpec::Close));
    }

    #[test]
    fn indicator_stage_is_anchored_after_main() {
        let mut ledger = Ledger::new("asset");
        ledger.ensure_stage(MAIN_STAGE);
        ledger.ensure_stage("cleanup");
        ledger.ensure_series(&SeriesSpec::sma(3, SeriesSpec::Close));
        ensure_systems(&mut ledger).unwrap();
        assert_eq!(
            ledger.stage_names(),
            vec![MAIN_STAGE, INDICATOR_STAGE, "cleanup"]
        );
    }

    #[test]
    fn chain_settles_within_one_stage_pass() {
        let mut ledger = Ledger::new("asset");
        let rsi = SeriesSpec::rsi(2, SeriesSpec::Close);
        ledger.ensure_series(&rsi);
        ensure_systems(&mut ledger).unwrap();
        for value in [10, 11, 13, 12, 15, 16, 14] {
            feed_close(&mut ledger, value);
            ledger.run_stage(INDICATOR_STAGE).unwrap();
        }
        let column = ledger.series(&rsi).unwrap();
        assert!(!column.is_empty());
        let (_, last) = column.last().unwrap();
        assert!(last > Decimal::ZERO && last < Decimal::from(100));
    }

    #[test]
    fn sma_values_follow_the_window() {
        let mut ledger = Ledger::new("asset");
        let sma = SeriesSpec::sma(3, SeriesSpec::Close);
        ledger.ensure_series(&sma);
        ensure_systems(&mut ledger).unwrap();
        for value in [1, 2, 3, 4, 5] {
            feed_close(&mut ledger, value);
            ledger.run_stage(INDICATOR_STAGE).unwrap();
        }
        let values: Vec<Decimal> = ledger.series(&sma).unwrap().iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![2.into(), 3.into(), 4.into()]);
    }
}
