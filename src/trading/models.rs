//! Normalized models for execution + portfolio plumbing.
//!
//! Venue-agnostic intents, commands, and lifecycle events. Commands and
//! events are closed sum types with a `type` discriminator so consumers
//! dispatch exhaustively and serialized forms stay stable for observability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type TradeId = String;
pub type ClientOrderId = String;
pub type VenueOrderId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Kalshi,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Kalshi => "kalshi",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Yes,
    No,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Yes => "yes",
            OrderSide::No => "no",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderAction::Buy => "buy",
            OrderAction::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }
}

/// A venue-agnostic order intent from the portfolio manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Caller-chosen correlation key; stitches events back to the intent.
    pub trade_id: TradeId,
    pub venue: Venue,
    pub ticker: String,
    pub side: OrderSide,
    pub action: OrderAction,
    pub count: i64,
    pub order_type: OrderType,

    /// Required for limit orders. Interpreted as the YES or NO price in
    /// dollars depending on `side`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price_dollars: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<ClientOrderId>,
}

/// Commands consumed by the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionCommand {
    SubmitOrder {
        request: OrderRequest,
    },
    CancelOrder {
        venue_order_id: VenueOrderId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ExecutionCommand {
    pub fn type_label(&self) -> &'static str {
        match self {
            ExecutionCommand::SubmitOrder { .. } => "submit_order",
            ExecutionCommand::CancelOrder { .. } => "cancel_order",
        }
    }

    pub fn trade_id(&self) -> Option<&str> {
        match self {
            ExecutionCommand::SubmitOrder { request } => Some(&request.trade_id),
            ExecutionCommand::CancelOrder { .. } => None,
        }
    }

    pub fn venue_order_id(&self) -> Option<&str> {
        match self {
            ExecutionCommand::SubmitOrder { .. } => None,
            ExecutionCommand::CancelOrder { venue_order_id, .. } => Some(venue_order_id),
        }
    }
}

/// A coarse position in a single market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub market_exposure_dollars: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_ts: Option<DateTime<Utc>>,
}

/// Normalized lifecycle events published by the execution engine.
///
/// Every event carries a wall-clock `ts` captured when it was built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    OrderSubmitted {
        trade_id: TradeId,
        venue: Venue,
        venue_order_id: VenueOrderId,
        request: OrderRequest,
        ts: DateTime<Utc>,
    },
    OrderRejected {
        trade_id: TradeId,
        venue: Venue,
        request: OrderRequest,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        ts: DateTime<Utc>,
    },
    OrderCanceled {
        venue: Venue,
        venue_order_id: VenueOrderId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        ts: DateTime<Utc>,
    },
    OrderUpdate {
        venue: Venue,
        venue_order_id: VenueOrderId,
        status: String,
        fill_count: i64,
        ts: DateTime<Utc>,
    },
    FillUpdate {
        venue: Venue,
        venue_order_id: VenueOrderId,
        filled_delta: i64,
        filled_total: i64,
        ts: DateTime<Utc>,
    },
    PositionSnapshot {
        venue: Venue,
        positions: Vec<Position>,
        ts: DateTime<Utc>,
    },
    ExecutionError {
        #[serde(skip_serializing_if = "Option::is_none")]
        venue: Option<Venue>,
        #[serde(skip_serializing_if = "Option::is_none")]
        venue_order_id: Option<VenueOrderId>,
        message: String,
        retryable: bool,
        ts: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn type_label(&self) -> &'static str {
        match self {
            ExecutionEvent::OrderSubmitted { .. } => "order_submitted",
            ExecutionEvent::OrderRejected { .. } => "order_rejected",
            ExecutionEvent::OrderCanceled { .. } => "order_canceled",
            ExecutionEvent::OrderUpdate { .. } => "order_update",
            ExecutionEvent::FillUpdate { .. } => "fill_update",
            ExecutionEvent::PositionSnapshot { .. } => "position_snapshot",
            ExecutionEvent::ExecutionError { .. } => "execution_error",
        }
    }

    pub fn ts(&self) -> DateTime<Utc> {
        match self {
            ExecutionEvent::OrderSubmitted { ts, .. }
            | ExecutionEvent::OrderRejected { ts, .. }
            | ExecutionEvent::OrderCanceled { ts, .. }
            | ExecutionEvent::OrderUpdate { ts, .. }
            | ExecutionEvent::FillUpdate { ts, .. }
            | ExecutionEvent::PositionSnapshot { ts, .. }
            | ExecutionEvent::ExecutionError { ts, .. } => *ts,
        }
    }

    pub fn trade_id(&self) -> Option<&str> {
        match self {
            ExecutionEvent::OrderSubmitted { trade_id, .. }
            | ExecutionEvent::OrderRejected { trade_id, .. } => Some(trade_id),
            _ => None,
        }
    }

    pub fn venue_order_id(&self) -> Option<&str> {
        match self {
            ExecutionEvent::OrderSubmitted { venue_order_id, .. }
            | ExecutionEvent::OrderCanceled { venue_order_id, .. }
            | ExecutionEvent::OrderUpdate { venue_order_id, .. }
            | ExecutionEvent::FillUpdate { venue_order_id, .. } => Some(venue_order_id),
            ExecutionEvent::ExecutionError { venue_order_id, .. } => venue_order_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> OrderRequest {
        OrderRequest {
            trade_id: "t1".into(),
            venue: Venue::Kalshi,
            ticker: "ABC".into(),
            side: OrderSide::Yes,
            action: OrderAction::Buy,
            count: 1,
            order_type: OrderType::Limit,
            limit_price_dollars: Some(0.10),
            client_order_id: Some("t1".into()),
        }
    }

    #[test]
    fn commands_carry_their_type_discriminator() {
        let cmd = ExecutionCommand::SubmitOrder { request: request() };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["type"], "submit_order");
        assert_eq!(value["request"]["venue"], "kalshi");
        assert_eq!(value["request"]["side"], "yes");
    }

    #[test]
    fn events_serialize_snake_case_labels() {
        let event = ExecutionEvent::FillUpdate {
            venue: Venue::Kalshi,
            venue_order_id: "OID1".into(),
            filled_delta: 1,
            filled_total: 2,
            ts: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "fill_update");
        assert_eq!(event.type_label(), "fill_update");
        assert_eq!(event.venue_order_id(), Some("OID1"));
    }

    #[test]
    fn optional_fields_are_omitted_when_absent() {
        let event = ExecutionEvent::ExecutionError {
            venue: None,
            venue_order_id: None,
            message: "boom".into(),
            retryable: true,
            ts: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("venue").is_none());
        assert!(value.get("venue_order_id").is_none());
        assert_eq!(value["retryable"], json!(true));
    }

    #[test]
    fn submit_command_exposes_nested_trade_id() {
        let cmd = ExecutionCommand::SubmitOrder { request: request() };
        assert_eq!(cmd.trade_id(), Some("t1"));
        let cancel = ExecutionCommand::CancelOrder {
            venue_order_id: "OID9".into(),
            reason: None,
        };
        assert_eq!(cancel.trade_id(), None);
        assert_eq!(cancel.venue_order_id(), Some("OID9"));
    }
}
