//! Observability record model and message introspection.
//!
//! Records are append-only and linkable across an end-to-end flow via
//! correlation identifiers. Summaries are stored rather than raw payloads,
//! with secret-looking keys redacted and nested requests projected to a
//! fixed allow-list.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::trading::models::{ExecutionCommand, ExecutionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Command,
    Event,
    Error,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Command => "command",
            RecordKind::Event => "event",
            RecordKind::Error => "error",
        }
    }
}

/// A durable, structured record derived from an internal message.
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityRecord {
    pub kind: RecordKind,
    /// Stable type label, e.g. `submit_order`, `order_update`.
    pub event_type: String,
    /// Where in the pipeline the record was produced.
    pub stage: String,
    pub correlation_id: Option<String>,
    pub trade_id: Option<String>,
    pub venue_order_id: Option<String>,
    /// The message's own timestamp when it carries one.
    pub occurred_at: DateTime<Utc>,
    pub logged_at: DateTime<Utc>,
    pub summary: Value,
}

impl ObservabilityRecord {
    /// Canonical serialization of the summary: compact, keys sorted.
    pub fn summary_json(&self) -> String {
        serde_json::to_string(&self.summary).unwrap_or_else(|_| "{}".to_string())
    }
}

/// What the recorder needs to know about a message to log it.
pub trait Observable {
    fn event_type(&self) -> String;

    fn trade_id(&self) -> Option<String> {
        None
    }

    fn venue_order_id(&self) -> Option<String> {
        None
    }

    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Structural dump of the message, pre-redaction.
    fn summary(&self) -> Value;
}

impl Observable for ExecutionCommand {
    fn event_type(&self) -> String {
        self.type_label().to_string()
    }

    fn trade_id(&self) -> Option<String> {
        ExecutionCommand::trade_id(self).map(str::to_string)
    }

    fn venue_order_id(&self) -> Option<String> {
        ExecutionCommand::venue_order_id(self).map(str::to_string)
    }

    fn summary(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "repr": format!("{self:?}") }))
    }
}

impl Observable for ExecutionEvent {
    fn event_type(&self) -> String {
        self.type_label().to_string()
    }

    fn trade_id(&self) -> Option<String> {
        ExecutionEvent::trade_id(self).map(str::to_string)
    }

    fn venue_order_id(&self) -> Option<String> {
        ExecutionEvent::venue_order_id(self).map(str::to_string)
    }

    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        Some(self.ts())
    }

    fn summary(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "repr": format!("{self:?}") }))
    }
}

/// Raw JSON messages are recordable too (ad-hoc errors, external payloads).
impl Observable for Value {
    fn event_type(&self) -> String {
        match self.get("type").and_then(Value::as_str) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => "object".to_string(),
        }
    }

    fn trade_id(&self) -> Option<String> {
        if let Some(t) = self.get("trade_id").and_then(Value::as_str) {
            if !t.is_empty() {
                return Some(t.to_string());
            }
        }
        self.get("request")
            .and_then(|r| r.get("trade_id"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    fn venue_order_id(&self) -> Option<String> {
        self.get("venue_order_id")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn summary(&self) -> Value {
        self.clone()
    }
}

const SECRET_KEYS: [&str; 5] = ["api_key", "private_key", "secret", "token", "password"];

const REQUEST_ALLOW_LIST: [&str; 9] = [
    "trade_id",
    "venue",
    "ticker",
    "side",
    "action",
    "count",
    "order_type",
    "limit_price_dollars",
    "client_order_id",
];

/// Redact secret-like keys and project nested request payloads down to the
/// allow-list. Applied to every summary before it leaves the process.
pub fn sanitize_summary(mut summary: Value) -> Value {
    let Value::Object(map) = &mut summary else {
        return summary;
    };

    for key in SECRET_KEYS {
        if map.contains_key(key) {
            map.insert(key.to_string(), json!("[REDACTED]"));
        }
    }

    if let Some(request) = map.remove("request") {
        if let Value::Object(request) = request {
            let selected: Map<String, Value> = REQUEST_ALLOW_LIST
                .iter()
                .filter_map(|k| request.get(*k).map(|v| ((*k).to_string(), v.clone())))
                .collect();
            if !selected.is_empty() {
                map.insert("request".to_string(), Value::Object(selected));
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_redacted() {
        let sanitized = sanitize_summary(json!({
            "api_key": "secret-key",
            "token": "tok",
            "message": "ok",
        }));
        assert_eq!(sanitized["api_key"], "[REDACTED]");
        assert_eq!(sanitized["token"], "[REDACTED]");
        assert_eq!(sanitized["message"], "ok");
    }

    #[test]
    fn request_projected_to_allow_list() {
        let sanitized = sanitize_summary(json!({
            "api_key": "secret",
            "request": {
                "trade_id": "t",
                "venue": "kalshi",
                "ticker": "ABC",
                "side": "yes",
                "action": "buy",
                "count": 1,
                "order_type": "limit",
                "limit_price_dollars": 0.10,
                "client_order_id": "t",
                "extra": "drop",
            },
        }));
        assert_eq!(sanitized["api_key"], "[REDACTED]");
        let request = sanitized["request"].as_object().unwrap();
        assert!(request.get("extra").is_none());
        assert_eq!(request["trade_id"], "t");
        assert_eq!(request["limit_price_dollars"], 0.10);
    }

    #[test]
    fn empty_projection_drops_request_entirely() {
        let sanitized = sanitize_summary(json!({
            "request": { "unrelated": 1 },
        }));
        assert!(sanitized.get("request").is_none());
    }

    #[test]
    fn summary_json_is_canonical() {
        let record = ObservabilityRecord {
            kind: RecordKind::Event,
            event_type: "order_update".into(),
            stage: "execution_engine".into(),
            correlation_id: None,
            trade_id: None,
            venue_order_id: Some("OID1".into()),
            occurred_at: Utc::now(),
            logged_at: Utc::now(),
            summary: json!({"zeta": 1, "alpha": 2}),
        };
        // serde_json keeps object keys sorted, so the dump is canonical.
        assert_eq!(record.summary_json(), r#"{"alpha":2,"zeta":1}"#);
    }

    #[test]
    fn raw_values_expose_nested_trade_ids() {
        let value = json!({"request": {"trade_id": "t9"}});
        assert_eq!(Observable::trade_id(&value), Some("t9".to_string()));
        assert_eq!(Observable::event_type(&value), "object");

        let tagged = json!({"type": "order_update", "venue_order_id": "OID2"});
        assert_eq!(Observable::event_type(&tagged), "order_update");
        assert_eq!(Observable::venue_order_id(&tagged), Some("OID2".to_string()));
    }
}
