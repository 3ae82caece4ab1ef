//! Kalshi REST payload models.
//!
//! A purpose-built subset of the Kalshi API responses: only the fields the
//! execution core reads. Dollar amounts arrive as fixed-point strings with
//! four decimals and are coerced to `f64` here; timestamps are RFC 3339.
//! Unknown fields are ignored so payload growth never breaks parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Coerce a fixed-point dollars field (string or number) into `f64`.
fn parse_dollars(raw: Option<DollarsRaw>) -> Result<Option<f64>, String> {
    match raw {
        None => Ok(None),
        Some(DollarsRaw::Num(n)) => Ok(Some(n)),
        Some(DollarsRaw::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(DollarsRaw::Str(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| format!("bad dollars value {s:?}: {e}")),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DollarsRaw {
    Num(f64),
    Str(String),
}

fn dollars<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let raw = Option::<DollarsRaw>::deserialize(d)?;
    parse_dollars(raw)
        .map(|v| v.unwrap_or(0.0))
        .map_err(serde::de::Error::custom)
}

fn dollars_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let raw = Option::<DollarsRaw>::deserialize(d)?;
    parse_dollars(raw).map_err(serde::de::Error::custom)
}

fn time_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Time(DateTime<Utc>),
        Str(String),
    }
    match Option::<Raw>::deserialize(d)? {
        None => Ok(None),
        Some(Raw::Time(t)) => Ok(Some(t)),
        Some(Raw::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Str(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
    }
}

/// Subset of Kalshi market fields used by this crate.
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiMarket {
    pub ticker: String,
    pub event_ticker: String,
    #[serde(default)]
    pub yes_sub_title: String,
    #[serde(default)]
    pub no_sub_title: String,

    #[serde(default, deserialize_with = "dollars")]
    pub yes_bid_dollars: f64,
    #[serde(default, deserialize_with = "dollars")]
    pub yes_ask_dollars: f64,
    #[serde(default, deserialize_with = "dollars")]
    pub no_bid_dollars: f64,
    #[serde(default, deserialize_with = "dollars")]
    pub no_ask_dollars: f64,

    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub status: String,
    pub close_time: DateTime<Utc>,
}

/// Single orderbook level (price + resting contract count).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalshiPriceLevel {
    pub dollars: f64,
    pub count: i64,
}

/// Orderbook snapshot with YES/NO dollar ladders.
#[derive(Debug, Clone, Default)]
pub struct KalshiOrderBook {
    pub yes_dollars: Vec<KalshiPriceLevel>,
    pub no_dollars: Vec<KalshiPriceLevel>,
}

impl KalshiOrderBook {
    /// Lenient parse of the `{orderbook: {yes_dollars: [[price, count], …]}}`
    /// payload. Malformed levels are skipped rather than failing the whole
    /// snapshot.
    pub fn from_api(payload: &Value) -> Self {
        let orderbook = payload.get("orderbook").cloned().unwrap_or_default();

        fn levels(raw: Option<&Value>) -> Vec<KalshiPriceLevel> {
            let Some(items) = raw.and_then(Value::as_array) else {
                return Vec::new();
            };
            items
                .iter()
                .filter_map(|item| {
                    let pair = item.as_array()?;
                    if pair.len() < 2 {
                        return None;
                    }
                    let dollars = match &pair[0] {
                        Value::Number(n) => n.as_f64()?,
                        Value::String(s) => s.trim().parse().ok()?,
                        _ => return None,
                    };
                    let count = pair[1].as_i64()?;
                    Some(KalshiPriceLevel { dollars, count })
                })
                .collect()
        }

        Self {
            yes_dollars: levels(orderbook.get("yes_dollars")),
            no_dollars: levels(orderbook.get("no_dollars")),
        }
    }
}

/// Subset of order fields used for create + polling.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KalshiOrder {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,

    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default, rename = "type")]
    pub order_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default, deserialize_with = "dollars_opt")]
    pub yes_price_dollars: Option<f64>,
    #[serde(default, deserialize_with = "dollars_opt")]
    pub no_price_dollars: Option<f64>,

    // REST responses carry `initial_count`, not `count`.
    #[serde(default, alias = "initial_count")]
    pub count: Option<i64>,

    #[serde(default)]
    pub fill_count: i64,
    #[serde(default)]
    pub queue_position: i64,
    #[serde(default, deserialize_with = "dollars_opt")]
    pub taker_fees_dollars: Option<f64>,
    #[serde(default, deserialize_with = "dollars_opt")]
    pub maker_fees_dollars: Option<f64>,

    #[serde(default, deserialize_with = "time_opt")]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "time_opt")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "time_opt")]
    pub last_update_time: Option<DateTime<Utc>>,
}

/// Subset of position fields behind the normalized snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiPosition {
    pub ticker: String,
    #[serde(default, deserialize_with = "dollars")]
    pub total_traded_dollars: f64,
    #[serde(default)]
    pub position: i64,
    #[serde(default, deserialize_with = "dollars")]
    pub market_exposure_dollars: f64,
    #[serde(default)]
    pub realized_pnl_dollars: Option<String>,
    #[serde(default)]
    pub fees_paid_dollars: Option<String>,
    #[serde(default, deserialize_with = "time_opt")]
    pub last_updated_ts: Option<DateTime<Utc>>,
}

/// Account balance (cents).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct KalshiBalance {
    pub balance: i64,
    pub portfolio_value: i64,
    pub updated_ts: i64,
}
