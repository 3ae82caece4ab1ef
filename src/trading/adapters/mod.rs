//! Venue adapter seam.
//!
//! The execution engine depends on this small trait so venues can be
//! swapped without touching engine or portfolio code.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::kalshi::ClientError;

use super::models::{OrderRequest, Position, Venue, VenueOrderId};

pub mod kalshi;

pub use kalshi::KalshiExecutionAdapter;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("limit orders require limit_price_dollars")]
    MissingPrice,

    #[error("venue did not return an order id")]
    EmptyOrderId,

    /// API-level refusal carried inside a successful HTTP exchange.
    #[error("venue rejected the order: {payload}")]
    VenueReject { payload: Value },

    #[error(transparent)]
    Client(#[from] ClientError),
}

#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Which venue this adapter talks to.
    fn venue(&self) -> Venue;

    /// Place an order and return the venue-assigned order id.
    async fn place_order(&self, request: &OrderRequest) -> Result<VenueOrderId, AdapterError>;

    /// Cancel an existing order by venue order id.
    async fn cancel_order(&self, venue_order_id: &str) -> Result<(), AdapterError>;

    /// `(status, fill_count)` for an order; `status` is the venue's own
    /// lifecycle label, `fill_count` the cumulative executed count.
    async fn get_order_status(&self, venue_order_id: &str) -> Result<(String, i64), AdapterError>;

    /// Point-in-time normalized view of all open positions.
    async fn get_positions_snapshot(&self) -> Result<Vec<Position>, AdapterError>;
}
