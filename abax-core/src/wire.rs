//! Broker-agnostic order wire format.
//!
//! The submit shape and the response shape mirror what REST venues expose;
//! connectors translate their native payloads into these types so the rest of
//! the runtime never sees venue-specific JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{OrderKind, Price, Quantity, Side, Ticker, TimeInForce};

/// Status prefix shared by every terminally failed order.
pub const FAILED_PREFIX: &str = "failed\n";

/// Status carried by fully settled orders.
pub const STATUS_FILLED: &str = "filled";

/// Desired order placement parameters (submit request shape).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderTicket {
    pub symbol: Ticker,
    pub qty: Quantity,
    pub side: Side,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Price>,
}

impl OrderTicket {
    /// A day market order, the form emitted by the trading pipeline.
    #[must_use]
    pub fn market(symbol: impl Into<Ticker>, side: Side, qty: Quantity) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side,
            kind: OrderKind::Market,
            time_in_force: TimeInForce::Day,
            limit_price: None,
        }
    }

    /// A day limit order at the provided price.
    #[must_use]
    pub fn limit(symbol: impl Into<Ticker>, side: Side, qty: Quantity, price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side,
            kind: OrderKind::Limit,
            time_in_force: TimeInForce::Day,
            limit_price: Some(price),
        }
    }
}

/// Order state echoed back by a broker (submit response and stream updates).
///
/// Absent timestamps stay `None`; `status` is the venue's free-form label,
/// with `"filled"` and the `"failed\n…"` terminal form carrying meaning for
/// the pipeline.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderReceipt {
    pub symbol: Ticker,
    pub side: Side,
    pub id: Uuid,
    #[serde(default)]
    pub client_order_id: Option<Uuid>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub filled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub canceled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    pub filled_qty: Quantity,
    #[serde(default)]
    pub filled_avg_price: Option<Price>,
    pub status: String,
    pub qty: Quantity,
    #[serde(default)]
    pub fee: Option<Price>,
}

impl OrderReceipt {
    /// Synthetic receipt for an order settled in full at `price`.
    #[must_use]
    pub fn filled(
        ticket: &OrderTicket,
        price: Price,
        fee: Price,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: ticket.symbol.clone(),
            side: ticket.side,
            id: Uuid::new_v4(),
            client_order_id: None,
            created_at: Some(at),
            updated_at: Some(at),
            submitted_at: Some(at),
            filled_at: Some(at),
            expired_at: None,
            canceled_at: None,
            failed_at: None,
            filled_qty: ticket.qty,
            filled_avg_price: Some(price),
            status: STATUS_FILLED.to_string(),
            qty: ticket.qty,
            fee: Some(fee),
        }
    }

    /// Terminal receipt for an order that could not be placed.
    #[must_use]
    pub fn failed(ticket: &OrderTicket, reason: &str, at: DateTime<Utc>) -> Self {
        Self {
            symbol: ticket.symbol.clone(),
            side: ticket.side,
            id: Uuid::new_v4(),
            client_order_id: None,
            created_at: Some(at),
            updated_at: Some(at),
            submitted_at: Some(at),
            filled_at: None,
            expired_at: None,
            canceled_at: None,
            failed_at: Some(at),
            filled_qty: Quantity::ZERO,
            filled_avg_price: None,
            status: format!("{FAILED_PREFIX}{reason}"),
            qty: ticket.qty,
            fee: None,
        }
    }

    /// Whether the order has settled in full.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.status == STATUS_FILLED
    }

    /// Whether the order terminated without settling.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status.starts_with(FAILED_PREFIX)
    }
}

/// Envelope of the broker's order-update stream.
///
/// Only messages whose `stream` field equals `trade_updates` carry an order;
/// every other stream value is ignored by the runtime.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StreamMessage {
    pub stream: String,
    #[serde(default)]
    pub data: StreamPayload,
}

/// Payload half of a [`StreamMessage`].
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StreamPayload {
    #[serde(default)]
    pub order: Option<OrderReceipt>,
}

impl StreamMessage {
    /// Extract the order update, if this message is a trade update.
    #[must_use]
    pub fn into_order(self) -> Option<OrderReceipt> {
        if self.stream == "trade_updates" {
            self.data.order
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn sample_ticket() -> OrderTicket {
        OrderTicket::market("AAPL", Side::Buy, Decimal::from(10))
    }

    #[test]
    fn ticket_serializes_wire_field_names() {
        let ticket = OrderTicket::limit("MSFT", Side::Sell, Decimal::from(3), Decimal::from(410));
        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["type"], "limit");
        assert_eq!(json["side"], "sell");
        assert_eq!(json["time_in_force"], "day");
        assert_eq!(json["limit_price"], "410");
    }

    #[test]
    fn market_ticket_omits_limit_price() {
        let json = serde_json::to_value(sample_ticket()).unwrap();
        assert!(json.get("limit_price").is_none());
    }

    #[test]
    fn receipt_round_trips_through_wire_shape() {
        let receipt = OrderReceipt::filled(
            &sample_ticket(),
            Decimal::from(100),
            Decimal::ONE,
            Utc::now(),
        );
        let json = serde_json::to_string(&receipt).unwrap();
        let parsed: OrderReceipt = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, receipt);
    }

    #[test]
    fn receipt_parses_with_absent_timestamps() {
        let json = r#"{
            "symbol": "AAPL",
            "side": "buy",
            "id": "7f1b1c1e-52f0-4a23-9c5d-2f4f6a1f0b11",
            "filled_qty": "0",
            "status": "new",
            "qty": "10"
        }"#;
        let parsed: OrderReceipt = serde_json::from_str(json).unwrap();
        assert!(parsed.filled_at.is_none());
        assert!(!parsed.is_filled());
        assert!(!parsed.is_failed());
    }

    #[test]
    fn failed_status_carries_reason_after_prefix() {
        let receipt = OrderReceipt::failed(&sample_ticket(), "no price", Utc::now());
        assert!(receipt.is_failed());
        assert_eq!(receipt.status, "failed\nno price");
        assert_eq!(receipt.filled_qty, Decimal::ZERO);
    }

    #[test]
    fn stream_message_gates_on_trade_updates() {
        let receipt = OrderReceipt::filled(
            &sample_ticket(),
            Decimal::from(100),
            Decimal::ZERO,
            Utc::now(),
        );
        let update = StreamMessage {
            stream: "trade_updates".into(),
            data: StreamPayload {
                order: Some(receipt.clone()),
            },
        };
        assert_eq!(update.into_order().unwrap().id, receipt.id);

        let other = StreamMessage {
            stream: "listening".into(),
            data: StreamPayload {
                order: Some(receipt),
            },
        };
        assert!(other.into_order().is_none());
    }
}
