//! Deterministic bar stream backed by pre-loaded data.

use std::collections::VecDeque;

use async_trait::async_trait;

use abax_core::Bar;

use crate::{BrokerResult, MarketStream};

/// [`MarketStream`] implementation serving a fixed sequence of bars, used by
/// paper wiring and tests of the live data task.
pub struct ReplayStream {
    bars: VecDeque<Bar>,
}

impl ReplayStream {
    /// Build a stream from bars already sorted by timestamp.
    #[must_use]
    pub fn from_bars(bars: Vec<Bar>) -> Self {
        Self { bars: bars.into() }
    }
}

#[async_trait]
impl MarketStream for ReplayStream {
    async fn next_bar(&mut self) -> BrokerResult<Option<Bar>> {
        Ok(self.bars.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn stream_drains_in_order_then_closes() {
        let bars: Vec<Bar> = (0..2)
            .map(|minute| Bar {
                ticker: "AAPL".into(),
                open: Decimal::from(10 + minute),
                high: Decimal::from(11 + minute),
                low: Decimal::from(9 + minute),
                close: Decimal::from(10 + minute),
                volume: Decimal::from(100),
                timestamp: Utc
                    .with_ymd_and_hms(2024, 1, 2, 14, minute as u32, 0)
                    .single()
                    .unwrap(),
            })
            .collect();
        let mut stream = ReplayStream::from_bars(bars);
        assert_eq!(
            stream.next_bar().await.unwrap().unwrap().open,
            Decimal::from(10)
        );
        assert_eq!(
            stream.next_bar().await.unwrap().unwrap().open,
            Decimal::from(11)
        );
        assert!(stream.next_bar().await.unwrap().is_none());
    }
}
