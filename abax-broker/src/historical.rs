//! Deterministic replay broker: a virtual clock, a bar cache, and a fee
//! model with a hard cap.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::info;

use abax_core::{Bar, OrderReceipt, OrderTicket, Price, Quantity, Ticker, Timeframe, TradeRecord};

use crate::{Broker, BrokerError, BrokerResult};

/// Virtual clock shared between the replay broker and the trading runtime.
#[derive(Clone, Copy, Debug)]
pub struct SimClock {
    pub time: DateTime<Utc>,
    pub dtime: Duration,
}

impl SimClock {
    #[must_use]
    pub fn new(time: DateTime<Utc>, dtime: Duration) -> Self {
        Self { time, dtime }
    }

    /// Advance the clock by one step.
    pub fn advance(&mut self) {
        self.time += self.dtime;
    }
}

/// Handle to a clock shared across tasks.
pub type SharedClock = Arc<RwLock<SimClock>>;

/// Time-indexed bar storage keyed by ticker and granularity.
#[derive(Default)]
pub struct BarCache {
    bars: HashMap<(Ticker, Timeframe), BTreeMap<DateTime<Utc>, Bar>>,
}

impl BarCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one bar under its timestamp.
    pub fn insert(&mut self, timeframe: Timeframe, bar: Bar) {
        self.bars
            .entry((bar.ticker.clone(), timeframe))
            .or_default()
            .insert(bar.timestamp, bar);
    }

    /// Store a batch of bars.
    pub fn extend(&mut self, timeframe: Timeframe, bars: impl IntoIterator<Item = Bar>) {
        for bar in bars {
            self.insert(timeframe, bar);
        }
    }

    /// Most recent bar at or before `at`.
    #[must_use]
    pub fn latest_at(&self, ticker: &str, timeframe: Timeframe, at: DateTime<Utc>) -> Option<&Bar> {
        self.bars
            .get(&(ticker.to_string(), timeframe))?
            .range(..=at)
            .next_back()
            .map(|(_, bar)| bar)
    }

    /// First bar at or after `at`.
    #[must_use]
    pub fn next_at(&self, ticker: &str, timeframe: Timeframe, at: DateTime<Utc>) -> Option<&Bar> {
        self.bars
            .get(&(ticker.to_string(), timeframe))?
            .range(at..)
            .next()
            .map(|(_, bar)| bar)
    }

    /// Bars within `[start, stop]` in timestamp order.
    #[must_use]
    pub fn range(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Vec<Bar> {
        self.bars
            .get(&(ticker.to_string(), timeframe))
            .map(|series| series.range(start..=stop).map(|(_, bar)| bar.clone()).collect())
            .unwrap_or_default()
    }

    /// Earliest timestamp stored for any ticker.
    #[must_use]
    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.bars
            .values()
            .filter_map(|series| series.keys().next().copied())
            .min()
    }
}

/// Per-order fee schedule applied by the replay broker.
///
/// The resulting fee never exceeds `0.005·|qty|·price`, matching the cap
/// real venues advertise.
#[derive(Clone, Copy, Debug)]
pub struct FeeModel {
    pub variable_transaction_fee: Decimal,
    pub fee_per_share: Decimal,
    pub fixed_transaction_fee: Decimal,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self {
            variable_transaction_fee: Decimal::ZERO,
            fee_per_share: Decimal::ZERO,
            fixed_transaction_fee: Decimal::ZERO,
        }
    }
}

impl FeeModel {
    /// Fee for settling `qty` shares at `price`.
    #[must_use]
    pub fn fee(&self, qty: Quantity, price: Price) -> Price {
        let qty = qty.abs();
        let naive =
            qty * (price * self.variable_transaction_fee + self.fee_per_share)
                + self.fixed_transaction_fee;
        let cap = Decimal::new(5, 3) * qty * price;
        naive.min(cap)
    }
}

/// Broker implementation replaying cached bars against a virtual clock.
pub struct HistoricalBroker {
    clock: SharedClock,
    timeframe: Timeframe,
    cache: BarCache,
    fees: FeeModel,
    updates: Mutex<VecDeque<OrderReceipt>>,
}

impl HistoricalBroker {
    #[must_use]
    pub fn new(clock: SharedClock, timeframe: Timeframe, fees: FeeModel) -> Self {
        Self {
            clock,
            timeframe,
            cache: BarCache::new(),
            fees,
            updates: Mutex::new(VecDeque::new()),
        }
    }

    /// Load bars for one ticker into the cache.
    pub fn load_bars(&mut self, bars: impl IntoIterator<Item = Bar>) {
        self.cache.extend(self.timeframe, bars);
    }

    #[must_use]
    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    #[must_use]
    pub fn cache(&self) -> &BarCache {
        &self.cache
    }

    #[must_use]
    pub fn fees(&self) -> &FeeModel {
        &self.fees
    }

    fn now(&self) -> SimClock {
        *self.clock.read().expect("clock lock poisoned")
    }
}

#[async_trait]
impl Broker for HistoricalBroker {
    async fn current_time(&self) -> DateTime<Utc> {
        self.now().time
    }

    async fn current_price(&self, ticker: &str) -> BrokerResult<Price> {
        let now = self.now().time;
        self.cache
            .latest_at(ticker, self.timeframe, now)
            .map(|bar| bar.close)
            .ok_or_else(|| BrokerError::PriceUnavailable {
                ticker: ticker.to_string(),
                at: now,
            })
    }

    async fn submit_order(&self, ticket: &OrderTicket) -> BrokerResult<OrderReceipt> {
        let clock = self.now();
        let slot = clock.time + clock.dtime;
        let receipt = match self.cache.next_at(&ticket.symbol, self.timeframe, slot) {
            Some(bar) => {
                let price = bar.open;
                let fee = self.fees.fee(ticket.qty, price);
                info!(
                    symbol = %ticket.symbol,
                    qty = %ticket.qty,
                    price = %price,
                    fee = %fee,
                    side = ?ticket.side,
                    "replay order filled"
                );
                OrderReceipt::filled(ticket, price, fee, bar.timestamp)
            }
            None => OrderReceipt::failed(
                ticket,
                &format!("no price for {} at {slot}", ticket.symbol),
                slot,
            ),
        };
        self.updates.lock().await.push_back(receipt.clone());
        Ok(receipt)
    }

    async fn receive_order(&self) -> BrokerResult<Option<OrderReceipt>> {
        Ok(self.updates.lock().await.pop_front())
    }

    async fn delete_all_orders(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn trades(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> BrokerResult<Vec<TradeRecord>> {
        Ok(self
            .cache
            .range(ticker, self.timeframe, start, stop)
            .into_iter()
            .map(|bar| TradeRecord {
                ticker: bar.ticker,
                price: bar.close,
                size: bar.volume,
                timestamp: bar.timestamp,
            })
            .collect())
    }

    async fn bars(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> BrokerResult<Vec<Bar>> {
        if timeframe != self.timeframe {
            return Err(BrokerError::InvalidRequest(format!(
                "cache holds {} bars, requested {timeframe}",
                self.timeframe
            )));
        }
        Ok(self.cache.range(ticker, timeframe, start, stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abax_core::Side;
    use chrono::TimeZone;

    fn bar(ticker: &str, minute: u32, price: i64) -> Bar {
        let timestamp = Utc
            .with_ymd_and_hms(2024, 1, 2, 14, minute, 0)
            .single()
            .unwrap();
        Bar {
            ticker: ticker.to_string(),
            open: Decimal::from(price),
            high: Decimal::from(price + 1),
            low: Decimal::from(price - 1),
            close: Decimal::from(price),
            volume: Decimal::from(100),
            timestamp,
        }
    }

    fn broker_at(minute: u32, fees: FeeModel) -> HistoricalBroker {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 2, 14, minute, 0)
            .single()
            .unwrap();
        let clock = Arc::new(RwLock::new(SimClock::new(start, Duration::minutes(1))));
        HistoricalBroker::new(clock, Timeframe::OneMinute, fees)
    }

    #[tokio::test]
    async fn fee_is_capped_at_half_a_percent_of_notional() {
        let fees = FeeModel {
            variable_transaction_fee: Decimal::ZERO,
            fee_per_share: Decimal::ONE,
            fixed_transaction_fee: Decimal::ZERO,
        };
        let mut broker = broker_at(0, fees);
        broker.load_bars([bar("AAPL", 0, 10), bar("AAPL", 1, 10)]);
        let ticket = OrderTicket::market("AAPL", Side::Buy, Decimal::from(100));
        let receipt = broker.submit_order(&ticket).await.unwrap();
        assert!(receipt.is_filled());
        // naive fee would be 100; the cap is 0.005 * 100 * 10 = 5
        assert_eq!(receipt.fee, Some(Decimal::from(5)));
    }

    #[tokio::test]
    async fn small_fees_pass_through_uncapped() {
        let fees = FeeModel {
            variable_transaction_fee: Decimal::new(1, 4), // 0.0001
            fee_per_share: Decimal::ZERO,
            fixed_transaction_fee: Decimal::ONE,
        };
        let mut broker = broker_at(0, fees);
        broker.load_bars([bar("AAPL", 0, 100), bar("AAPL", 1, 100)]);
        let ticket = OrderTicket::market("AAPL", Side::Buy, Decimal::from(10));
        let receipt = broker.submit_order(&ticket).await.unwrap();
        // 10 * 100 * 0.0001 + 1 = 1.1, below the cap of 5
        assert_eq!(receipt.fee, Some(Decimal::new(11, 1)));
    }

    #[tokio::test]
    async fn fills_resolve_at_the_next_slot() {
        let mut broker = broker_at(0, FeeModel::default());
        broker.load_bars([bar("AAPL", 0, 10), bar("AAPL", 1, 11)]);
        let ticket = OrderTicket::market("AAPL", Side::Buy, Decimal::ONE);
        let receipt = broker.submit_order(&ticket).await.unwrap();
        assert_eq!(receipt.filled_avg_price, Some(Decimal::from(11)));
    }

    #[tokio::test]
    async fn missing_price_produces_failed_receipt() {
        let mut broker = broker_at(0, FeeModel::default());
        broker.load_bars([bar("AAPL", 0, 10)]);
        let ticket = OrderTicket::market("AAPL", Side::Buy, Decimal::ONE);
        let receipt = broker.submit_order(&ticket).await.unwrap();
        assert!(receipt.is_failed());
        assert_eq!(receipt.filled_qty, Decimal::ZERO);
    }

    #[tokio::test]
    async fn zero_quantity_fills_with_zero_fee() {
        let fees = FeeModel {
            variable_transaction_fee: Decimal::ZERO,
            fee_per_share: Decimal::ONE,
            fixed_transaction_fee: Decimal::ZERO,
        };
        let mut broker = broker_at(0, fees);
        broker.load_bars([bar("AAPL", 0, 10), bar("AAPL", 1, 10)]);
        let ticket = OrderTicket::market("AAPL", Side::Buy, Decimal::ZERO);
        let receipt = broker.submit_order(&ticket).await.unwrap();
        assert!(receipt.is_filled());
        assert_eq!(receipt.fee, Some(Decimal::ZERO));
    }

    #[tokio::test]
    async fn submitted_receipts_flow_through_the_update_stream() {
        let mut broker = broker_at(0, FeeModel::default());
        broker.load_bars([bar("AAPL", 0, 10), bar("AAPL", 1, 10)]);
        let ticket = OrderTicket::market("AAPL", Side::Buy, Decimal::ONE);
        let submitted = broker.submit_order(&ticket).await.unwrap();
        let received = broker.receive_order().await.unwrap().unwrap();
        assert_eq!(received.id, submitted.id);
        assert!(broker.receive_order().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn current_price_reads_the_latest_bar() {
        let mut broker = broker_at(1, FeeModel::default());
        broker.load_bars([bar("AAPL", 0, 10), bar("AAPL", 1, 12)]);
        assert_eq!(
            broker.current_price("AAPL").await.unwrap(),
            Decimal::from(12)
        );
        assert!(matches!(
            broker.current_price("MSFT").await,
            Err(BrokerError::PriceUnavailable { .. })
        ));
    }
}
