//! The capability set required of values that participate in aggregate
//! indicators, plus the rolling-window helpers built on top of it.
//!
//! Window calculators (moving averages, deviations) are generic over
//! [`IndicatorValue`], so component types lacking these operations are
//! excluded from aggregate indicator math at compile time.

use rust_decimal::{Decimal, MathematicalOps};

/// Arithmetic surface needed by aggregate indicator calculators.
pub trait IndicatorValue: Copy + PartialOrd + Send + Sync + 'static {
    fn zero() -> Self;
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    /// Division; `None` when the divisor is zero.
    fn div(self, rhs: Self) -> Option<Self>;
    /// Embedding of a window length into the value domain.
    fn from_count(count: usize) -> Self;
    /// Square root; `None` when undefined.
    fn sqrt(self) -> Option<Self>;
    /// Natural logarithm; `None` when undefined.
    fn ln(self) -> Option<Self>;
}

impl IndicatorValue for Decimal {
    fn zero() -> Self {
        Decimal::ZERO
    }

    fn add(self, rhs: Self) -> Self {
        self + rhs
    }

    fn sub(self, rhs: Self) -> Self {
        self - rhs
    }

    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }

    fn div(self, rhs: Self) -> Option<Self> {
        if rhs.is_zero() {
            None
        } else {
            Some(self / rhs)
        }
    }

    fn from_count(count: usize) -> Self {
        Decimal::from(count as u64)
    }

    fn sqrt(self) -> Option<Self> {
        MathematicalOps::sqrt(&self)
    }

    fn ln(self) -> Option<Self> {
        if self <= Decimal::ZERO {
            None
        } else {
            Some(MathematicalOps::ln(&self))
        }
    }
}

/// Arithmetic mean of a full window. `None` for an empty slice.
pub fn window_mean<V: IndicatorValue>(values: &[V]) -> Option<V> {
    if values.is_empty() {
        return None;
    }
    let sum = values
        .iter()
        .copied()
        .fold(V::zero(), |acc, value| acc.add(value));
    sum.div(V::from_count(values.len()))
}

/// Sample standard deviation (n − 1 divisor). `None` for windows shorter
/// than two values.
pub fn window_sample_std<V: IndicatorValue>(values: &[V]) -> Option<V> {
    if values.len() < 2 {
        return None;
    }
    let mean = window_mean(values)?;
    let sum_sq = values.iter().copied().fold(V::zero(), |acc, value| {
        let diff = value.sub(mean);
        acc.add(diff.mul(diff))
    });
    let variance = sum_sq.div(V::from_count(values.len() - 1))?;
    variance.sqrt()
}
