//! The main-stage pipeline: strategy execution, order intake, fills,
//! portfolio snapshots, clock advance, and day close.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use abax_broker::{insufficient_qty_available, is_insufficient_buying_power, Broker};
use abax_core::{OrderReceipt, OrderTicket, Side, Ticker, TimeStamp};
use abax_indicators::INDICATOR_STAGE;
use abax_ledger::Entity;
use abax_strategy::{OrderIntent, SharedLedger, StrategyTick};

use crate::components::{
    Cash, Clock, Filled, PortfolioSnapshot, Position, Purchase, PurchasePower, Sale,
};
use crate::trader::{Mode, TraderCore};
use crate::{TraderError, TraderResult};

/// A unit of the main-stage pipeline, invoked once per tick in stage order.
#[async_trait]
pub trait TraderSystem<B: Broker>: Send + Sync {
    fn name(&self) -> &str;

    async fn update(&mut self, core: &mut TraderCore<B>) -> TraderResult<()>;
}

/// The default main stage in execution order.
pub(crate) fn default_pipeline<B: Broker + 'static>() -> Vec<Box<dyn TraderSystem<B>>> {
    vec![
        Box::new(PowerSnapshot),
        Box::new(StrategyRunner),
        Box::new(Purchaser),
        Box::new(Seller),
        Box::new(Filler),
        Box::new(SnapShotter),
        Box::new(Timer),
        Box::new(DayCloser),
    ]
}

/// Copies `Cash` into `PurchasePower` before any other system runs, so every
/// sizing decision within the tick reads one consistent number.
pub struct PowerSnapshot;

#[async_trait]
impl<B: Broker> TraderSystem<B> for PowerSnapshot {
    fn name(&self) -> &str {
        "power-snapshot"
    }

    async fn update(&mut self, core: &mut TraderCore<B>) -> TraderResult<()> {
        let cash = core.ledger.singleton::<Cash>()?.cash;
        core.ledger.singleton_mut::<PurchasePower>()?.cash = cash;
        Ok(())
    }
}

/// Invokes each registered strategy's systems in declared order, handing them
/// their asset ledgers plus the combined ledger, and materialises the order
/// intents they emit as `Purchase`/`Sale` entities.
pub struct StrategyRunner;

#[async_trait]
impl<B: Broker> TraderSystem<B> for StrategyRunner {
    fn name(&self) -> &str {
        "strategy-runner"
    }

    async fn update(&mut self, core: &mut TraderCore<B>) -> TraderResult<()> {
        let now = core.current_time()?;
        let in_session = core.calendar.in_session(now);
        let power = core.ledger.singleton::<PurchasePower>()?.cash;
        let positions = core.position_map();
        let prices = core.latest_prices();

        let mut entries = std::mem::take(&mut core.strategies);
        let mut failure: Option<TraderError> = None;
        let mut intents: Vec<OrderIntent> = Vec::new();

        'entries: for entry in &mut entries {
            if entry.config.only_day && !in_session {
                continue;
            }
            let assets: Vec<SharedLedger> = entry
                .config
                .tickers
                .iter()
                .filter_map(|ticker| core.assets.get(ticker).cloned())
                .collect();
            let Some(combined) = core.combined.get(&entry.config.combined_id()).cloned() else {
                continue;
            };
            let tickers = entry.config.tickers.clone();
            for system in &mut entry.systems {
                let mut ctx = StrategyTick {
                    time: now,
                    tickers: &tickers,
                    assets: &assets,
                    combined: &combined,
                    purchase_power: power,
                    positions: &positions,
                    prices: &prices,
                    intents: &mut intents,
                };
                if let Err(err) = system.run(&mut ctx) {
                    failure = Some(err.into());
                    break 'entries;
                }
                // derived combined series must be fresh for the next system
                if let Err(err) = combined.write().run_stage(INDICATOR_STAGE) {
                    failure = Some(err.into());
                    break 'entries;
                }
            }
        }
        core.strategies = entries;
        if let Some(err) = failure {
            return Err(err);
        }

        for intent in intents {
            let entity = core.ledger.create();
            core.ledger.attach(entity, TimeStamp(now))?;
            match intent {
                OrderIntent::Purchase { ticker, quantity } => {
                    debug!(%ticker, %quantity, "purchase intent");
                    core.ledger.attach(entity, Purchase { ticker, quantity })?;
                }
                OrderIntent::Sale { ticker, quantity } => {
                    debug!(%ticker, %quantity, "sale intent");
                    core.ledger.attach(entity, Sale { ticker, quantity })?;
                }
            }
        }
        Ok(())
    }
}

/// Submit a ticket, shrinking the quantity on the venue's two quantity
/// rejections; any other error becomes a failed terminal receipt. Retries
/// always make progress, so the loop terminates.
pub(crate) async fn submit_with_retry<B: Broker>(
    broker: &B,
    mut ticket: OrderTicket,
    now: DateTime<Utc>,
) -> TraderResult<OrderReceipt> {
    loop {
        match broker.submit_order(&ticket).await {
            Ok(receipt) => return Ok(receipt),
            Err(err) => {
                let message = err.to_string();
                if is_insufficient_buying_power(&message) {
                    let shrunk = (ticket.qty * Decimal::new(9, 1)).round();
                    let next = if shrunk >= ticket.qty {
                        ticket.qty - Decimal::ONE
                    } else {
                        shrunk
                    };
                    if next <= Decimal::ZERO {
                        return Ok(OrderReceipt::failed(&ticket, &message, now));
                    }
                    debug!(symbol = %ticket.symbol, qty = %next, "buying power rejected; shrinking");
                    ticket.qty = next;
                } else if let Some(available) = insufficient_qty_available(&message) {
                    if available <= Decimal::ZERO || available >= ticket.qty {
                        return Ok(OrderReceipt::failed(&ticket, &message, now));
                    }
                    debug!(symbol = %ticket.symbol, qty = %available, "retrying with available quantity");
                    ticket.qty = available;
                } else {
                    warn!(symbol = %ticket.symbol, error = %message, "order submission failed");
                    return Ok(OrderReceipt::failed(&ticket, &message, now));
                }
            }
        }
    }
}

/// Submits every `Purchase` entity that has no order yet.
pub struct Purchaser;

#[async_trait]
impl<B: Broker> TraderSystem<B> for Purchaser {
    fn name(&self) -> &str {
        "purchaser"
    }

    async fn update(&mut self, core: &mut TraderCore<B>) -> TraderResult<()> {
        let now = core.current_time()?;
        let pending: Vec<(Entity, Ticker, Decimal)> = core
            .ledger
            .iter_without::<Purchase, OrderReceipt>()
            .into_iter()
            .map(|(entity, purchase)| (entity, purchase.ticker.clone(), purchase.quantity))
            .collect();
        for (entity, ticker, quantity) in pending {
            let ticket = OrderTicket::market(ticker, Side::Buy, quantity);
            let receipt = submit_with_retry(core.broker.as_ref(), ticket, now).await?;
            core.ledger.attach(entity, receipt)?;
        }
        Ok(())
    }
}

/// Submits every `Sale` entity that has no order yet.
pub struct Seller;

#[async_trait]
impl<B: Broker> TraderSystem<B> for Seller {
    fn name(&self) -> &str {
        "seller"
    }

    async fn update(&mut self, core: &mut TraderCore<B>) -> TraderResult<()> {
        let now = core.current_time()?;
        let pending: Vec<(Entity, Ticker, Decimal)> = core
            .ledger
            .iter_without::<Sale, OrderReceipt>()
            .into_iter()
            .map(|(entity, sale)| (entity, sale.ticker.clone(), sale.quantity))
            .collect();
        for (entity, ticker, quantity) in pending {
            let ticket = OrderTicket::market(ticker, Side::Sell, quantity);
            let receipt = submit_with_retry(core.broker.as_ref(), ticket, now).await?;
            core.ledger.attach(entity, receipt)?;
        }
        Ok(())
    }
}

/// Applies order updates, attaches `Filled`, and adjusts position and cash.
pub struct Filler;

#[async_trait]
impl<B: Broker> TraderSystem<B> for Filler {
    fn name(&self) -> &str {
        "filler"
    }

    async fn update(&mut self, core: &mut TraderCore<B>) -> TraderResult<()> {
        let mut updates = core.drain_updates();
        if core.mode == Mode::Historical {
            // no trading task under replay; drain the broker inline
            while let Some(update) = core.broker.receive_order().await? {
                updates.push(update);
            }
        }
        for update in updates {
            let target = core
                .ledger
                .iter::<OrderReceipt>()
                .find(|(_, receipt)| receipt.id == update.id)
                .map(|(entity, _)| entity);
            match target {
                Some(entity) => {
                    if let Some(receipt) = core.ledger.get_mut::<OrderReceipt>(entity) {
                        *receipt = update;
                    }
                }
                None => debug!(order = %update.id, "update for unknown order ignored"),
            }
        }

        let ready: Vec<(Entity, OrderReceipt)> = core
            .ledger
            .iter_without::<OrderReceipt, Filled>()
            .into_iter()
            .filter(|(_, receipt)| receipt.is_filled())
            .map(|(entity, receipt)| (entity, receipt.clone()))
            .collect();
        for (entity, receipt) in ready {
            let is_purchase = core.ledger.has::<Purchase>(entity);
            if !is_purchase && !core.ledger.has::<Sale>(entity) {
                warn!(order = %receipt.id, "filled order lacks a purchase or sale intent");
                continue;
            }
            let quantity = receipt.filled_qty;
            let price = receipt.filled_avg_price.unwrap_or_default();
            let fee = receipt.fee.unwrap_or_default();
            core.ledger.attach(
                entity,
                Filled {
                    avg_price: price,
                    quantity,
                },
            )?;
            let position_entity = core.ensure_position(&receipt.symbol)?;
            if let Some(position) = core.ledger.get_mut::<Position>(position_entity) {
                position.quantity += if is_purchase { quantity } else { -quantity };
            }
            let cash = core.ledger.singleton_mut::<Cash>()?;
            if is_purchase {
                cash.cash -= quantity * price + fee;
            } else {
                cash.cash += quantity * price - fee;
            }
            info!(
                symbol = %receipt.symbol,
                qty = %quantity,
                price = %price,
                fee = %fee,
                purchase = is_purchase,
                "fill applied"
            );
        }
        Ok(())
    }
}

/// Emits one `PortfolioSnapshot` per tick valuing cash plus positions.
pub struct SnapShotter;

#[async_trait]
impl<B: Broker> TraderSystem<B> for SnapShotter {
    fn name(&self) -> &str {
        "snapshotter"
    }

    async fn update(&mut self, core: &mut TraderCore<B>) -> TraderResult<()> {
        let now = core.current_time()?;
        let cash = core.ledger.singleton::<Cash>()?.cash;
        let positions: Vec<(Ticker, Decimal)> = core
            .ledger
            .iter::<Position>()
            .map(|(_, position)| (position.ticker.clone(), position.quantity))
            .collect();
        let mut value = cash;
        for (ticker, quantity) in &positions {
            if quantity.is_zero() {
                continue;
            }
            match core.broker.current_price(ticker).await {
                Ok(price) => value += price * *quantity,
                Err(err) => {
                    warn!(ticker = %ticker, error = %err, "price unavailable for snapshot")
                }
            }
        }
        let entity = core.ledger.create();
        core.ledger.attach(entity, TimeStamp(now))?;
        core.ledger.attach(
            entity,
            PortfolioSnapshot {
                value,
                cash,
                positions,
            },
        )?;
        Ok(())
    }
}

/// Advances the clock: by one step under replay, to wall time when live.
pub struct Timer;

#[async_trait]
impl<B: Broker> TraderSystem<B> for Timer {
    fn name(&self) -> &str {
        "timer"
    }

    async fn update(&mut self, core: &mut TraderCore<B>) -> TraderResult<()> {
        match core.mode {
            Mode::Historical => {
                let clock = core.ledger.singleton_mut::<Clock>()?;
                clock.time = clock.time + clock.dtime;
                let time = clock.time;
                if let Some(handle) = &core.clock_handle {
                    handle.write().expect("clock lock poisoned").time = time;
                }
            }
            Mode::Live => {
                core.ledger.singleton_mut::<Clock>()?.time = Utc::now();
            }
        }
        Ok(())
    }
}

/// Performs end-of-day reconciliation: cancels resting day orders and resets
/// the incremental-work marks of every strategy system so the next session
/// starts clean.
pub struct DayCloser;

#[async_trait]
impl<B: Broker> TraderSystem<B> for DayCloser {
    fn name(&self) -> &str {
        "day-closer"
    }

    async fn update(&mut self, core: &mut TraderCore<B>) -> TraderResult<()> {
        let clock = *core.ledger.singleton::<Clock>()?;
        let today = clock.time.date_naive();
        if !core.calendar.after_close(clock.time) || core.last_day_closed == Some(today) {
            return Ok(());
        }
        core.last_day_closed = Some(today);
        core.broker.delete_all_orders().await?;
        for entry in &core.strategies {
            for system in &entry.systems {
                for ticker in &entry.config.tickers {
                    if let Some(asset) = core.assets.get(ticker) {
                        asset.write().fast_forward_all(system.name());
                    }
                }
                if let Some(combined) = core.combined.get(&entry.config.combined_id()) {
                    combined.write().fast_forward_all(system.name());
                }
            }
        }
        info!(date = %today, "trading day closed");
        Ok(())
    }
}
