//! Live-mode plumbing: cooperative stop flags, the new-data event, and the
//! three-task driver (data, trading, main).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

use abax_broker::{Broker, MarketStream};
use abax_core::Ticker;
use abax_strategy::SharedLedger;

use crate::trader::{ingest_bar, Trader};
use crate::TraderResult;

/// Per-task stop flags checked between iterations.
#[derive(Clone)]
pub struct StopFlags {
    inner: Arc<Flags>,
}

struct Flags {
    main: AtomicBool,
    trading: AtomicBool,
    data: AtomicBool,
}

impl StopFlags {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Flags {
                main: AtomicBool::new(false),
                trading: AtomicBool::new(false),
                data: AtomicBool::new(false),
            }),
        }
    }

    pub fn stop_all(&self) {
        self.stop_main();
        self.stop_trading();
        self.stop_data();
    }

    pub fn stop_main(&self) {
        self.inner.main.store(true, Ordering::SeqCst);
    }

    pub fn stop_trading(&self) {
        self.inner.trading.store(true, Ordering::SeqCst);
    }

    pub fn stop_data(&self) {
        self.inner.data.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn main_stopped(&self) -> bool {
        self.inner.main.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn trading_stopped(&self) -> bool {
        self.inner.trading.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn data_stopped(&self) -> bool {
        self.inner.data.load(Ordering::SeqCst)
    }
}

impl Default for StopFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Level-triggered event the data and trading tasks raise when the ledger
/// gained new work for the main task.
pub struct NewDataEvent {
    notify: Notify,
    pending: AtomicBool,
}

impl NewDataEvent {
    #[must_use]
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
            pending: AtomicBool::new(false),
        }
    }

    /// Raise the event.
    pub fn signal(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Wait until the event is raised, or until `deadline` elapses.
    /// Answers whether new data is pending.
    pub async fn wait(&self, deadline: Option<Duration>) -> bool {
        if self.pending.swap(false, Ordering::SeqCst) {
            return true;
        }
        match deadline {
            Some(limit) => {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(limit) => {}
                }
            }
            None => self.notify.notified().await,
        }
        self.pending.swap(false, Ordering::SeqCst)
    }
}

impl Default for NewDataEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Broker + 'static> Trader<B> {
    /// Drive the runtime live: a data task pushes bars into the asset
    /// ledgers, a trading task consumes order updates, and the main task
    /// runs the stage pipeline whenever new data is signalled.
    ///
    /// Returns the trader for inspection once the stream ends or the stop
    /// flags fire.
    pub async fn run_live<S>(
        mut self,
        mut stream: S,
        tick_deadline: Option<Duration>,
    ) -> TraderResult<Self>
    where
        S: MarketStream + 'static,
    {
        let assets: HashMap<Ticker, SharedLedger> = self
            .core
            .assets
            .iter()
            .map(|(ticker, ledger)| (ticker.clone(), ledger.clone()))
            .collect();
        let events = self.events.clone();
        let flags = self.flags.clone();

        let data_task = tokio::spawn({
            let events = events.clone();
            let flags = flags.clone();
            async move {
                loop {
                    if flags.data_stopped() {
                        break;
                    }
                    match stream.next_bar().await {
                        Ok(Some(bar)) => {
                            if let Some(ledger) = assets.get(&bar.ticker) {
                                ingest_bar(ledger, &bar);
                                events.signal();
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!(error = %err, "market stream terminated");
                            break;
                        }
                    }
                }
                flags.stop_data();
                events.signal();
            }
        });

        let trading_task = tokio::spawn({
            let broker = self.core.broker.clone();
            let inbox = self.core.update_inbox();
            let events = events.clone();
            let flags = flags.clone();
            async move {
                loop {
                    if flags.trading_stopped() {
                        break;
                    }
                    match broker.receive_order().await {
                        Ok(Some(receipt)) => {
                            inbox.lock().expect("update inbox poisoned").push_back(receipt);
                            events.signal();
                        }
                        Ok(None) => tokio::time::sleep(Duration::from_millis(25)).await,
                        Err(err) => {
                            warn!(error = %err, "order update stream terminated");
                            break;
                        }
                    }
                }
            }
        });

        info!("live session started");
        let idle = tick_deadline.unwrap_or(Duration::from_millis(100));
        let run = loop {
            if self.flags.main_stopped() {
                break Ok(());
            }
            let fired = self.events.wait(Some(idle)).await;
            if self.flags.main_stopped() {
                break Ok(());
            }
            if fired {
                if let Err(err) = self.tick().await {
                    break Err(err);
                }
            } else if self.flags.data_stopped() {
                break Ok(());
            }
        };

        self.flags.stop_all();
        // the trading task may be suspended in a network read; abandon it
        trading_task.abort();
        if let Err(err) = data_task.await {
            if !err.is_cancelled() {
                warn!(error = %err, "data task join failed");
            }
        }
        let _ = trading_task.await;
        info!("live session stopped");
        run.map(|()| self)
    }
}
