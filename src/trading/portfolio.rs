//! Portfolio manager.
//!
//! Client-facing submit/cancel API plus an in-memory view of order and
//! position state, maintained by consuming the event stream. No risk,
//! sizing, or strategy logic lives here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;

use super::bus::{CommandBus, EventBus, EventSubscription};
use super::models::{
    ExecutionCommand, ExecutionEvent, OrderRequest, Position, TradeId, Venue, VenueOrderId,
};

pub const PORTFOLIO_MANAGER_STAGE: &str = "portfolio_manager";

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("timed out after {timeout:?} waiting for submission of trade {trade_id}")]
    SubmitTimeout { trade_id: TradeId, timeout: Duration },
}

/// Most recent position snapshot observed on the event bus.
#[derive(Debug, Clone)]
pub struct PositionsView {
    pub venue: Venue,
    pub positions: Vec<Position>,
    pub ts: DateTime<Utc>,
}

#[derive(Default)]
struct PortfolioState {
    venue_order_by_trade: HashMap<TradeId, VenueOrderId>,
    order_status: HashMap<VenueOrderId, String>,
    order_fill_count: HashMap<VenueOrderId, i64>,
    latest_positions: Option<PositionsView>,
}

pub struct PortfolioManager {
    commands: Arc<CommandBus>,
    subscription: tokio::sync::Mutex<Option<EventSubscription>>,
    state: Mutex<PortfolioState>,
    submitted: Mutex<HashMap<TradeId, Arc<Notify>>>,
}

impl PortfolioManager {
    /// Subscribes to the event bus at construction so no event published
    /// afterwards is missed.
    pub fn new(commands: Arc<CommandBus>, events: &EventBus) -> Self {
        let subscription = events.subscribe();
        Self {
            commands,
            subscription: tokio::sync::Mutex::new(Some(subscription)),
            state: Mutex::new(PortfolioState::default()),
            submitted: Mutex::new(HashMap::new()),
        }
    }

    /// Consume execution events forever.
    pub async fn run(&self) {
        let mut subscription = match self.subscription.lock().await.take() {
            Some(subscription) => subscription,
            None => {
                warn!("portfolio manager event loop is already running");
                return;
            }
        };
        while let Some(event) = subscription.recv().await {
            self.handle_event(event);
        }
    }

    /// Submit an order via the execution engine.
    pub fn submit_order(&self, request: OrderRequest) {
        // Register the awaiter before the command leaves, so a fast
        // submission can never be missed.
        self.notify_handle(&request.trade_id);
        self.commands.put_from(
            PORTFOLIO_MANAGER_STAGE,
            ExecutionCommand::SubmitOrder { request },
        );
    }

    pub fn cancel_order(&self, venue_order_id: &str, reason: Option<&str>) {
        self.commands.put_from(
            PORTFOLIO_MANAGER_STAGE,
            ExecutionCommand::CancelOrder {
                venue_order_id: venue_order_id.to_string(),
                reason: reason.map(str::to_string),
            },
        );
    }

    /// Wait until a venue order id exists for `trade_id`.
    pub async fn wait_for_order_submitted(
        &self,
        trade_id: &str,
        timeout: Duration,
    ) -> Result<VenueOrderId, PortfolioError> {
        let notify = self.notify_handle(trade_id);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            // Arm the waiter before checking state, closing the window
            // between the check and the notification.
            notified.as_mut().enable();

            if let Some(venue_order_id) = self.venue_order_for(trade_id) {
                return Ok(venue_order_id);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(PortfolioError::SubmitTimeout {
                    trade_id: trade_id.to_string(),
                    timeout,
                });
            }
        }
    }

    // ── State accessors ──────────────────────────────────

    pub fn venue_order_for(&self, trade_id: &str) -> Option<VenueOrderId> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .venue_order_by_trade
            .get(trade_id)
            .cloned()
    }

    pub fn order_status(&self, venue_order_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .order_status
            .get(venue_order_id)
            .cloned()
    }

    pub fn order_fill_count(&self, venue_order_id: &str) -> Option<i64> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .order_fill_count
            .get(venue_order_id)
            .copied()
    }

    pub fn latest_positions(&self) -> Option<PositionsView> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .latest_positions
            .clone()
    }

    // ── Internals ────────────────────────────────────────

    fn notify_handle(&self, trade_id: &str) -> Arc<Notify> {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(trade_id.to_string())
            .or_default()
            .clone()
    }

    fn handle_event(&self, event: ExecutionEvent) {
        match event {
            ExecutionEvent::OrderSubmitted {
                trade_id,
                venue_order_id,
                ..
            } => {
                {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state
                        .venue_order_by_trade
                        .insert(trade_id.clone(), venue_order_id.clone());
                    state
                        .order_status
                        .insert(venue_order_id.clone(), "submitted".to_string());
                    state.order_fill_count.insert(venue_order_id, 0);
                }
                self.notify_handle(&trade_id).notify_waiters();
            }
            ExecutionEvent::OrderUpdate {
                venue_order_id,
                status,
                fill_count,
                ..
            } => {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.order_status.insert(venue_order_id.clone(), status);
                state.order_fill_count.insert(venue_order_id, fill_count);
            }
            ExecutionEvent::FillUpdate {
                venue_order_id,
                filled_total,
                ..
            } => {
                self.state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .order_fill_count
                    .insert(venue_order_id, filled_total);
            }
            ExecutionEvent::PositionSnapshot {
                venue,
                positions,
                ts,
            } => {
                self.state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .latest_positions = Some(PositionsView {
                    venue,
                    positions,
                    ts,
                });
            }
            // Observed, but no local state to update.
            ExecutionEvent::OrderRejected { .. }
            | ExecutionEvent::OrderCanceled { .. }
            | ExecutionEvent::ExecutionError { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (Arc<PortfolioManager>, Arc<EventBus>) {
        let commands = Arc::new(CommandBus::new());
        let events = Arc::new(EventBus::new());
        let pm = Arc::new(PortfolioManager::new(commands, &events));
        (pm, events)
    }

    fn submitted(trade_id: &str, venue_order_id: &str) -> ExecutionEvent {
        ExecutionEvent::OrderSubmitted {
            trade_id: trade_id.into(),
            venue: Venue::Kalshi,
            venue_order_id: venue_order_id.into(),
            request: OrderRequest {
                trade_id: trade_id.into(),
                venue: Venue::Kalshi,
                ticker: "ABC".into(),
                side: crate::trading::models::OrderSide::Yes,
                action: crate::trading::models::OrderAction::Buy,
                count: 1,
                order_type: crate::trading::models::OrderType::Market,
                limit_price_dollars: None,
                client_order_id: None,
            },
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn submitted_event_updates_view_and_wakes_waiters() {
        let (pm, _) = manager();
        pm.handle_event(submitted("t1", "OID1"));
        assert_eq!(pm.venue_order_for("t1").as_deref(), Some("OID1"));
        assert_eq!(pm.order_status("OID1").as_deref(), Some("submitted"));
        assert_eq!(pm.order_fill_count("OID1"), Some(0));
    }

    #[tokio::test]
    async fn updates_overwrite_status_and_fill_counts() {
        let (pm, _) = manager();
        pm.handle_event(submitted("t1", "OID1"));
        pm.handle_event(ExecutionEvent::OrderUpdate {
            venue: Venue::Kalshi,
            venue_order_id: "OID1".into(),
            status: "resting".into(),
            fill_count: 1,
            ts: Utc::now(),
        });
        assert_eq!(pm.order_status("OID1").as_deref(), Some("resting"));
        assert_eq!(pm.order_fill_count("OID1"), Some(1));

        pm.handle_event(ExecutionEvent::FillUpdate {
            venue: Venue::Kalshi,
            venue_order_id: "OID1".into(),
            filled_delta: 1,
            filled_total: 2,
            ts: Utc::now(),
        });
        assert_eq!(pm.order_fill_count("OID1"), Some(2));
    }

    #[tokio::test]
    async fn position_snapshots_replace_the_latest_view() {
        let (pm, _) = manager();
        assert!(pm.latest_positions().is_none());
        pm.handle_event(ExecutionEvent::PositionSnapshot {
            venue: Venue::Kalshi,
            positions: vec![Position {
                ticker: "ABC".into(),
                position: 3,
                market_exposure_dollars: 0.45,
                last_updated_ts: None,
            }],
            ts: Utc::now(),
        });
        let view = pm.latest_positions().unwrap();
        assert_eq!(view.positions.len(), 1);
        assert_eq!(view.positions[0].position, 3);
    }

    #[tokio::test]
    async fn wait_for_order_submitted_times_out() {
        let (pm, _) = manager();
        let err = pm
            .wait_for_order_submitted("t-nope", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::SubmitTimeout { .. }));
    }

    #[tokio::test]
    async fn wait_for_order_submitted_resolves_on_event() {
        let (pm, events) = manager();
        let run_pm = pm.clone();
        let run = tokio::spawn(async move { run_pm.run().await });

        let publisher = tokio::spawn({
            let events = events.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                events.publish(submitted("t1", "OID7"));
            }
        });

        let vid = pm
            .wait_for_order_submitted("t1", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(vid, "OID7");

        publisher.await.unwrap();
        run.abort();
    }
}
