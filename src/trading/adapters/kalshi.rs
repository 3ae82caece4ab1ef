//! Kalshi implementation of the execution adapter.

use std::sync::Arc;

use async_trait::async_trait;

use crate::kalshi::models::KalshiOrder;
use crate::kalshi::{ClientError, KalshiClient};
use crate::trading::models::{OrderRequest, OrderSide, OrderType, Position, Venue, VenueOrderId};

use super::{AdapterError, ExecutionAdapter};

const POSITIONS_PAGE_LIMIT: u32 = 200;

pub struct KalshiExecutionAdapter {
    client: Arc<KalshiClient>,
}

impl KalshiExecutionAdapter {
    pub fn new(client: Arc<KalshiClient>) -> Self {
        Self { client }
    }
}

/// Map a normalized request onto the venue order shape. The side picks
/// which per-side price field carries the limit price.
fn to_kalshi_order(request: &OrderRequest) -> Result<KalshiOrder, AdapterError> {
    let mut order = KalshiOrder {
        ticker: Some(request.ticker.clone()),
        side: Some(request.side.as_str().to_string()),
        action: Some(request.action.as_str().to_string()),
        order_type: Some(request.order_type.as_str().to_string()),
        count: Some(request.count),
        client_order_id: request.client_order_id.clone(),
        ..KalshiOrder::default()
    };

    if request.order_type == OrderType::Limit {
        let price = request.limit_price_dollars.ok_or(AdapterError::MissingPrice)?;
        match request.side {
            OrderSide::Yes => order.yes_price_dollars = Some(price),
            OrderSide::No => order.no_price_dollars = Some(price),
        }
    }
    Ok(order)
}

fn from_client_error(err: ClientError) -> AdapterError {
    match err {
        ClientError::VenueReject { payload } => AdapterError::VenueReject { payload },
        other => AdapterError::Client(other),
    }
}

#[async_trait]
impl ExecutionAdapter for KalshiExecutionAdapter {
    fn venue(&self) -> Venue {
        Venue::Kalshi
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<VenueOrderId, AdapterError> {
        let order = to_kalshi_order(request)?;
        let created = self
            .client
            .create_order(&order)
            .await
            .map_err(from_client_error)?;
        created
            .order_id
            .filter(|id| !id.is_empty())
            .ok_or(AdapterError::EmptyOrderId)
    }

    async fn cancel_order(&self, venue_order_id: &str) -> Result<(), AdapterError> {
        self.client
            .cancel_order(venue_order_id)
            .await
            .map_err(from_client_error)
    }

    async fn get_order_status(&self, venue_order_id: &str) -> Result<(String, i64), AdapterError> {
        let order = self
            .client
            .get_order(venue_order_id)
            .await
            .map_err(from_client_error)?;
        Ok((order.status.unwrap_or_default(), order.fill_count))
    }

    async fn get_positions_snapshot(&self) -> Result<Vec<Position>, AdapterError> {
        let positions = self
            .client
            .get_positions(None, None, POSITIONS_PAGE_LIMIT)
            .await
            .map_err(from_client_error)?;
        Ok(positions
            .into_iter()
            .map(|p| Position {
                ticker: p.ticker,
                position: p.position,
                market_exposure_dollars: p.market_exposure_dollars,
                last_updated_ts: p.last_updated_ts,
            })
            .collect())
    }
}
