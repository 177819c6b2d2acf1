//! The trader: main ledger, per-asset sub-ledgers, and the drivers that run
//! the stage pipeline under replay and live execution.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use abax_broker::{Broker, FeeModel, HistoricalBroker, SharedClock, SimClock};
use abax_core::{Bar, OrderReceipt, Price, Quantity, SeriesSpec, Ticker, TimeStamp, Timeframe};
use abax_indicators::{ensure_systems, INDICATOR_STAGE};
use abax_ledger::Ledger;
use abax_strategy::{share, SharedLedger, Strategy, StrategyConfig, StrategySystem};

use crate::calendar::TradingCalendar;
use crate::components::{Cash, Clock, PortfolioSnapshot, Position, PurchasePower, StrategyTag};
use crate::live::{NewDataEvent, StopFlags};
use crate::systems::{default_pipeline, TraderSystem};
use crate::{TraderError, TraderResult};

/// Execution mode of the runtime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Historical,
    Live,
}

/// Construction parameters shared by both modes.
#[derive(Clone, Copy, Debug)]
pub struct TraderSettings {
    pub mode: Mode,
    pub start: DateTime<Utc>,
    pub dtime: Duration,
    pub timeframe: Timeframe,
    pub cash: Price,
    pub calendar: TradingCalendar,
}

pub(crate) struct StrategyEntry {
    pub(crate) config: StrategyConfig,
    pub(crate) systems: Vec<Box<dyn StrategySystem>>,
}

/// Mutable state shared by every pipeline system during a tick. The owning
/// [`Trader`] holds the only `&mut` to it for the duration of the tick.
pub struct TraderCore<B> {
    pub broker: Arc<B>,
    pub ledger: Ledger,
    pub mode: Mode,
    pub calendar: TradingCalendar,
    pub timeframe: Timeframe,
    pub(crate) assets: BTreeMap<Ticker, SharedLedger>,
    pub(crate) combined: BTreeMap<String, SharedLedger>,
    pub(crate) strategies: Vec<StrategyEntry>,
    pub(crate) clock_handle: Option<SharedClock>,
    pub(crate) updates: Arc<StdMutex<VecDeque<OrderReceipt>>>,
    pub(crate) last_day_closed: Option<NaiveDate>,
}

impl<B: Broker> TraderCore<B> {
    /// The runtime's notion of "now", read from the ledger clock.
    pub fn current_time(&self) -> TraderResult<DateTime<Utc>> {
        Ok(self.ledger.singleton::<Clock>()?.time)
    }

    /// Signed position per ticker; tickers without fills answer zero.
    #[must_use]
    pub fn position_map(&self) -> HashMap<Ticker, Quantity> {
        self.ledger
            .iter::<Position>()
            .map(|(_, position)| (position.ticker.clone(), position.quantity))
            .collect()
    }

    /// Latest close per ticker, read from the asset ledgers.
    #[must_use]
    pub fn latest_prices(&self) -> HashMap<Ticker, Price> {
        let mut prices = HashMap::new();
        for (ticker, asset) in &self.assets {
            let ledger = asset.read();
            if let Some((_, close)) = ledger
                .series(&SeriesSpec::Close)
                .and_then(|column| column.last())
            {
                prices.insert(ticker.clone(), close);
            }
        }
        prices
    }

    /// Handle for cross-task order-update delivery.
    #[must_use]
    pub fn update_inbox(&self) -> Arc<StdMutex<VecDeque<OrderReceipt>>> {
        self.updates.clone()
    }

    pub(crate) fn drain_updates(&self) -> Vec<OrderReceipt> {
        self.updates
            .lock()
            .expect("update inbox poisoned")
            .drain(..)
            .collect()
    }

    /// Sub-ledger for one ticker.
    #[must_use]
    pub fn asset(&self, ticker: &str) -> Option<&SharedLedger> {
        self.assets.get(ticker)
    }

    /// Combined sub-ledger by identifier.
    #[must_use]
    pub fn combined(&self, id: &str) -> Option<&SharedLedger> {
        self.combined.get(id)
    }

    /// Insert one bar into its asset ledger; bars for unobserved tickers are
    /// dropped with a warning.
    pub fn insert_bar(&mut self, bar: &Bar) -> TraderResult<()> {
        match self.assets.get(&bar.ticker) {
            Some(asset) => {
                ingest_bar(asset, bar);
                Ok(())
            }
            None => {
                warn!(ticker = %bar.ticker, "dropping bar for unobserved ticker");
                Ok(())
            }
        }
    }

    /// Entity holding the [`Position`] for `ticker`, created lazily.
    pub fn ensure_position(&mut self, ticker: &str) -> TraderResult<abax_ledger::Entity> {
        let existing = self
            .ledger
            .iter::<Position>()
            .find(|(_, position)| position.ticker == ticker)
            .map(|(entity, _)| entity);
        if let Some(entity) = existing {
            return Ok(entity);
        }
        let now = self.current_time()?;
        let entity = self.ledger.create();
        self.ledger.attach(entity, TimeStamp(now))?;
        self.ledger.attach(
            entity,
            Position {
                ticker: ticker.to_string(),
                quantity: Decimal::ZERO,
            },
        )?;
        Ok(entity)
    }

    pub(crate) fn run_asset_indicators(&mut self) -> TraderResult<()> {
        for asset in self.assets.values() {
            asset.write().run_stage(INDICATOR_STAGE)?;
        }
        Ok(())
    }
}

/// Write one bar into an asset ledger under a short critical section.
pub fn ingest_bar(ledger: &SharedLedger, bar: &Bar) {
    let mut ledger = ledger.write();
    let entity = ledger.create();
    ledger
        .attach(entity, TimeStamp(bar.timestamp))
        .expect("entity just created");
    for (spec, value) in [
        (SeriesSpec::Open, bar.open),
        (SeriesSpec::High, bar.high),
        (SeriesSpec::Low, bar.low),
        (SeriesSpec::Close, bar.close),
        (SeriesSpec::Volume, bar.volume),
    ] {
        ledger
            .set_series(&spec, entity, value)
            .expect("entity just created");
    }
}

/// The component-ledger trading runtime.
pub struct Trader<B: Broker> {
    pub core: TraderCore<B>,
    systems: Vec<Box<dyn TraderSystem<B>>>,
    pub(crate) events: Arc<NewDataEvent>,
    pub(crate) flags: StopFlags,
}

impl<B: Broker + 'static> Trader<B> {
    /// Create a trader with the default main-stage pipeline installed.
    pub fn new(broker: Arc<B>, settings: TraderSettings) -> TraderResult<Self> {
        let mut ledger = Ledger::new("main");
        let clock = ledger.insert_singleton(Clock {
            time: settings.start,
            dtime: settings.dtime,
        })?;
        let cash = ledger.insert_singleton(Cash {
            cash: settings.cash,
        })?;
        let power = ledger.insert_singleton(PurchasePower {
            cash: settings.cash,
        })?;
        for entity in [clock, cash, power] {
            ledger.attach(entity, TimeStamp(settings.start))?;
        }
        Ok(Self {
            core: TraderCore {
                broker,
                ledger,
                mode: settings.mode,
                calendar: settings.calendar,
                timeframe: settings.timeframe,
                assets: BTreeMap::new(),
                combined: BTreeMap::new(),
                strategies: Vec::new(),
                clock_handle: None,
                updates: Arc::new(StdMutex::new(VecDeque::new())),
                last_day_closed: None,
            },
            systems: default_pipeline(),
            events: Arc::new(NewDataEvent::new()),
            flags: StopFlags::new(),
        })
    }

    /// Cooperative stop flags observed by all tasks.
    #[must_use]
    pub fn stop_flags(&self) -> StopFlags {
        self.flags.clone()
    }

    /// Register a strategy: create its asset and combined ledgers, install
    /// the indicator columns its systems require, and record its descriptor.
    pub fn add_strategy(&mut self, strategy: Strategy) -> TraderResult<()> {
        let Strategy { config, systems } = strategy;
        let now = self.core.current_time()?;

        let descriptor = self.core.ledger.create();
        self.core.ledger.attach(descriptor, TimeStamp(now))?;
        self.core.ledger.attach(
            descriptor,
            StrategyTag {
                name: config.name.clone(),
                tickers: config.tickers.clone(),
                only_day: config.only_day,
            },
        )?;

        for ticker in &config.tickers {
            self.core
                .assets
                .entry(ticker.clone())
                .or_insert_with(|| share(Ledger::new(ticker.clone())));
            self.core.ensure_position(ticker)?;
        }
        let combined_id = config.combined_id();
        self.core
            .combined
            .entry(combined_id.clone())
            .or_insert_with(|| share(Ledger::new(combined_id.clone())));

        for system in &systems {
            for ticker in &config.tickers {
                let asset = self.core.assets.get(ticker).expect("asset just created");
                let mut ledger = asset.write();
                for spec in system.required_series() {
                    ledger.ensure_series(&spec);
                }
                ensure_systems(&mut ledger)?;
            }
            let combined = self
                .core
                .combined
                .get(&combined_id)
                .expect("combined just created");
            let mut ledger = combined.write();
            for spec in system.required_combined_series() {
                ledger.ensure_series(&spec);
            }
            ensure_systems(&mut ledger)?;
        }

        info!(
            strategy = %config.name,
            tickers = ?config.tickers,
            only_day = config.only_day,
            "strategy registered"
        );
        self.core.strategies.push(StrategyEntry { config, systems });
        Ok(())
    }

    /// Run one pass of the full pipeline: asset indicator stages, then the
    /// main stage systems in order.
    pub async fn tick(&mut self) -> TraderResult<()> {
        self.core.run_asset_indicators()?;
        let mut systems = std::mem::take(&mut self.systems);
        let mut result = Ok(());
        for system in &mut systems {
            result = system.update(&mut self.core).await;
            if result.is_err() {
                break;
            }
        }
        self.systems = systems;
        result
    }

    /// Portfolio snapshots in emission order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<PortfolioSnapshot> {
        self.core
            .ledger
            .iter::<PortfolioSnapshot>()
            .map(|(_, snapshot)| snapshot.clone())
            .collect()
    }

    /// Current cash balance.
    pub fn cash(&self) -> TraderResult<Price> {
        Ok(self.core.ledger.singleton::<Cash>()?.cash)
    }

    /// Signed position for a ticker; zero when untracked.
    #[must_use]
    pub fn position(&self, ticker: &str) -> Quantity {
        self.core
            .ledger
            .iter::<Position>()
            .find(|(_, position)| position.ticker == ticker)
            .map(|(_, position)| position.quantity)
            .unwrap_or_default()
    }
}

/// Configuration of a historical replay run.
pub struct Backtest {
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    dtime: Duration,
    timeframe: Timeframe,
    cash: Price,
    fees: FeeModel,
    calendar: TradingCalendar,
    bars: Vec<Bar>,
    strategies: Vec<Strategy>,
}

impl Backtest {
    #[must_use]
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self {
            start,
            stop,
            dtime: Duration::minutes(1),
            timeframe: Timeframe::OneMinute,
            cash: Decimal::from(100_000),
            fees: FeeModel::default(),
            calendar: TradingCalendar::default(),
            bars: Vec::new(),
            strategies: Vec::new(),
        }
    }

    #[must_use]
    pub fn dtime(mut self, dtime: Duration) -> Self {
        self.dtime = dtime;
        self
    }

    #[must_use]
    pub fn cash(mut self, cash: Price) -> Self {
        self.cash = cash;
        self
    }

    #[must_use]
    pub fn fees(mut self, fees: FeeModel) -> Self {
        self.fees = fees;
        self
    }

    #[must_use]
    pub fn calendar(mut self, calendar: TradingCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    /// Add replay bars (any tickers, any order).
    #[must_use]
    pub fn bars(mut self, bars: Vec<Bar>) -> Self {
        self.bars.extend(bars);
        self
    }

    #[must_use]
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Run the deterministic replay loop and hand back the trader for
    /// inspection.
    pub async fn run(self) -> TraderResult<Trader<HistoricalBroker>> {
        if self.stop < self.start {
            return Err(TraderError::Config(
                "backtest stop precedes its start".into(),
            ));
        }
        let clock: SharedClock = Arc::new(std::sync::RwLock::new(SimClock::new(
            self.start, self.dtime,
        )));
        let mut broker = HistoricalBroker::new(clock.clone(), self.timeframe, self.fees);
        broker.load_bars(self.bars.clone());

        let settings = TraderSettings {
            mode: Mode::Historical,
            start: self.start,
            dtime: self.dtime,
            timeframe: self.timeframe,
            cash: self.cash,
            calendar: self.calendar,
        };
        let mut trader = Trader::new(Arc::new(broker), settings)?;
        trader.core.clock_handle = Some(clock);
        for strategy in self.strategies {
            trader.add_strategy(strategy)?;
        }

        let mut feeds: BTreeMap<Ticker, VecDeque<Bar>> = BTreeMap::new();
        let mut sorted = self.bars;
        sorted.sort_by_key(|bar| bar.timestamp);
        for bar in sorted {
            feeds.entry(bar.ticker.clone()).or_default().push_back(bar);
        }

        let flags = trader.stop_flags();
        loop {
            let now = trader.core.current_time()?;
            if now > self.stop || flags.main_stopped() {
                break;
            }
            let mut due = Vec::new();
            for feed in feeds.values_mut() {
                while feed
                    .front()
                    .is_some_and(|bar| bar.timestamp <= now)
                {
                    due.push(feed.pop_front().expect("front just checked"));
                }
            }
            for bar in &due {
                trader.core.insert_bar(bar)?;
            }
            trader.tick().await?;
        }
        Ok(trader)
    }
}
