//! Indicator calculators and the dependency solver.
//!
//! Register the series column you want on a ledger and call
//! [`ensure_systems`]; the solver installs the calculator systems required to
//! populate it, together with every transitive prerequisite column.

mod calculators;
mod solver;
mod value;

pub use calculators::{
    BandCalc, DiffCalc, EmaCalc, LogCalc, RsiCalc, SharpeCalc, UpDownCalc, WindowCalc, WindowKind,
};
pub use solver::{ensure_systems, INDICATOR_STAGE, MAIN_STAGE};
pub use value::{window_mean, window_sample_std, IndicatorValue};
