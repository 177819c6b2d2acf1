//! Venue-agnostic traits consumed by the trading runtime.
//!
//! A [`Broker`] answers time, prices and order flow; a [`MarketStream`]
//! delivers bars. Live connectors implement both against a venue's REST and
//! WebSocket surfaces; the [`HistoricalBroker`] implements them against a
//! virtual clock and a bar cache so back-tests drive the identical runtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use abax_core::{
    Bar, OrderReceipt, OrderTicket, Price, Quantity, StreamMessage, Timeframe, TradeRecord,
};

mod historical;
mod replay;

pub use historical::{BarCache, FeeModel, HistoricalBroker, SimClock, SharedClock};
pub use replay::ReplayStream;

/// Convenience alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Common error type returned by broker implementations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Transport-level failures (network, timeouts, closed streams).
    #[error("transport error: {0}")]
    Transport(String),
    /// Authentication failed or credentials are missing.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The request parameters are invalid for the target venue.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Serialization or parsing failures.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The venue answered with a business error (e.g. insufficient funds).
    #[error("exchange error: {0}")]
    Exchange(String),
    /// No price is known for the requested instant.
    #[error("no price for {ticker} at {at}")]
    PriceUnavailable { ticker: String, at: DateTime<Utc> },
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

/// The execution and data surface the runtime consumes.
#[async_trait]
pub trait Broker: Send + Sync {
    /// The broker's notion of "now" (virtual under replay).
    async fn current_time(&self) -> DateTime<Utc>;

    /// Latest known price for a ticker.
    async fn current_price(&self, ticker: &str) -> BrokerResult<Price>;

    /// Place an order; the receipt reflects the venue's immediate answer.
    async fn submit_order(&self, ticket: &OrderTicket) -> BrokerResult<OrderReceipt>;

    /// Next order update from the venue's stream. May suspend; `None` means
    /// the stream is exhausted (or, under replay, momentarily drained).
    async fn receive_order(&self) -> BrokerResult<Option<OrderReceipt>>;

    /// Cancel every outstanding order.
    async fn delete_all_orders(&self) -> BrokerResult<()>;

    /// Historical trade prints within `[start, stop]`.
    async fn trades(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> BrokerResult<Vec<TradeRecord>>;

    /// Historical bars within `[start, stop]` at the given granularity.
    async fn bars(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> BrokerResult<Vec<Bar>>;
}

/// Bar subscription consumed by the data task during live trading.
#[async_trait]
pub trait MarketStream: Send {
    /// Next bar in arrival order; `None` when the stream is closed.
    async fn next_bar(&mut self) -> BrokerResult<Option<Bar>>;
}

/// Decode one frame of a broker's order-update stream.
///
/// Answers the nested order for `trade_updates` messages and `None` for
/// every other stream value; malformed frames are a serialization error.
pub fn decode_order_update(bytes: &[u8]) -> BrokerResult<Option<OrderReceipt>> {
    let message: StreamMessage = serde_json::from_slice(bytes)
        .map_err(|err| BrokerError::Serialization(format!("bad stream frame: {err}")))?;
    Ok(message.into_order())
}

/// Venue text reported when day-trading buying power is exhausted.
pub const INSUFFICIENT_BUYING_POWER: &str = "insufficient day-trading buying power";

/// Whether an exchange error message reports exhausted buying power.
#[must_use]
pub fn is_insufficient_buying_power(message: &str) -> bool {
    message.contains(INSUFFICIENT_BUYING_POWER)
}

/// Extract the available quantity from an "insufficient qty available for
/// order (available: N)" exchange message.
#[must_use]
pub fn insufficient_qty_available(message: &str) -> Option<Quantity> {
    let marker = "insufficient qty available for order (available: ";
    let start = message.find(marker)? + marker.len();
    let rest = &message[start..];
    let end = rest.find(')')?;
    rest[..end].trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn parses_available_quantity_from_exchange_text() {
        let message = "exchange error: insufficient qty available for order (available: 7)";
        assert_eq!(insufficient_qty_available(message), Some(Decimal::from(7)));
    }

    #[test]
    fn parses_zero_available_quantity() {
        let message = "insufficient qty available for order (available: 0)";
        assert_eq!(insufficient_qty_available(message), Some(Decimal::ZERO));
    }

    #[test]
    fn unrelated_messages_yield_nothing() {
        assert_eq!(insufficient_qty_available("order rejected"), None);
        assert!(!is_insufficient_buying_power("order rejected"));
        assert!(is_insufficient_buying_power(
            "got: insufficient day-trading buying power"
        ));
    }

    #[test]
    fn decodes_trade_update_frames_only() {
        let frame = br#"{
            "stream": "trade_updates",
            "data": {
                "order": {
                    "symbol": "AAPL",
                    "side": "buy",
                    "id": "7f1b1c1e-52f0-4a23-9c5d-2f4f6a1f0b11",
                    "filled_qty": "10",
                    "filled_avg_price": "101.5",
                    "status": "filled",
                    "qty": "10"
                }
            }
        }"#;
        let order = decode_order_update(frame).unwrap().unwrap();
        assert!(order.is_filled());
        assert_eq!(order.symbol, "AAPL");

        let other = br#"{"stream": "listening", "data": {}}"#;
        assert!(decode_order_update(other).unwrap().is_none());

        assert!(matches!(
            decode_order_update(b"not json"),
            Err(BrokerError::Serialization(_))
        ));
    }
}
