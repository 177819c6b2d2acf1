//! Live-driver smoke test: the three-task loop over a replayed stream.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use abax_broker::{Broker, BrokerResult, ReplayStream};
use abax_core::{
    Bar, OrderReceipt, OrderTicket, Price, SeriesSpec, Timeframe, TradeRecord,
};
use abax_strategy::{Strategy, StrategyConfig, StrategyResult, StrategySystem, StrategyTick};
use abax_trader::{Mode, Trader, TraderSettings, TradingCalendar};

struct StaticBroker {
    price: Price,
}

#[async_trait]
impl Broker for StaticBroker {
    async fn current_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn current_price(&self, _ticker: &str) -> BrokerResult<Price> {
        Ok(self.price)
    }

    async fn submit_order(&self, ticket: &OrderTicket) -> BrokerResult<OrderReceipt> {
        Ok(OrderReceipt::filled(
            ticket,
            self.price,
            Decimal::ZERO,
            Utc::now(),
        ))
    }

    async fn receive_order(&self) -> BrokerResult<Option<OrderReceipt>> {
        Ok(None)
    }

    async fn delete_all_orders(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn trades(
        &self,
        _ticker: &str,
        _start: DateTime<Utc>,
        _stop: DateTime<Utc>,
    ) -> BrokerResult<Vec<TradeRecord>> {
        Ok(Vec::new())
    }

    async fn bars(
        &self,
        _ticker: &str,
        _start: DateTime<Utc>,
        _stop: DateTime<Utc>,
        _timeframe: Timeframe,
    ) -> BrokerResult<Vec<Bar>> {
        Ok(Vec::new())
    }
}

struct AverageProbe;

impl StrategySystem for AverageProbe {
    fn name(&self) -> &str {
        "average-probe"
    }

    fn required_series(&self) -> Vec<SeriesSpec> {
        vec![SeriesSpec::sma(2, SeriesSpec::Close)]
    }

    fn run(&mut self, _ctx: &mut StrategyTick<'_>) -> StrategyResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn live_loop_drains_the_stream_and_snapshots() {
    let start = Utc.with_ymd_and_hms(2024, 1, 2, 14, 0, 0).single().unwrap();
    let bars: Vec<Bar> = (0..3)
        .map(|offset| Bar {
            ticker: "AAPL".to_string(),
            open: Decimal::from(10 + offset),
            high: Decimal::from(11 + offset),
            low: Decimal::from(9 + offset),
            close: Decimal::from(10 + offset),
            volume: Decimal::from(500),
            timestamp: start + Duration::minutes(offset),
        })
        .collect();

    let broker = Arc::new(StaticBroker {
        price: Decimal::from(10),
    });
    let mut trader = Trader::new(
        broker,
        TraderSettings {
            mode: Mode::Live,
            start,
            dtime: Duration::minutes(1),
            timeframe: Timeframe::OneMinute,
            cash: Decimal::from(10_000),
            calendar: TradingCalendar::default(),
        },
    )
    .unwrap();
    trader
        .add_strategy(
            Strategy::new(StrategyConfig {
                name: "average-probe".into(),
                tickers: vec!["AAPL".into()],
                only_day: false,
            })
            .unwrap()
            .with_system(Box::new(AverageProbe)),
        )
        .unwrap();

    let trader = trader
        .run_live(
            ReplayStream::from_bars(bars),
            Some(StdDuration::from_millis(50)),
        )
        .await
        .unwrap();

    let asset = trader.core.asset("AAPL").unwrap().read();
    assert_eq!(asset.series(&SeriesSpec::Close).unwrap().len(), 3);
    // the average column was solved in and populated once enough bars arrived
    let sma = asset.series(&SeriesSpec::sma(2, SeriesSpec::Close)).unwrap();
    assert!(!sma.is_empty());
    drop(asset);
    assert!(!trader.snapshots().is_empty());
}
