//! Execution engine.
//!
//! Three concurrent loops share one tracked-order map:
//! - the command consumer places/cancels via the venue adapter,
//! - the order poller turns venue status/fill deltas into events,
//! - the positions poller publishes periodic snapshots.
//!
//! Background failures never terminate the engine; they are normalized into
//! `OrderRejected`/`ExecutionError` events and the loops keep running. The
//! map is guarded by a mutex that is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use super::adapters::{AdapterError, ExecutionAdapter};
use super::bus::{CommandBus, EventBus};
use super::models::{ExecutionCommand, ExecutionEvent, OrderRequest, Venue, VenueOrderId};

pub const EXECUTION_ENGINE_STAGE: &str = "execution_engine";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_POSITIONS_INTERVAL: Duration = Duration::from_secs(2);

/// Venue statuses that end tracking.
const TERMINAL_STATUSES: [&str; 2] = ["executed", "canceled"];

/// Engine-local view of one live order.
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub venue: Venue,
    pub status: String,
    pub fill_count: i64,
}

pub struct ExecutionEngine {
    adapter: Arc<dyn ExecutionAdapter>,
    commands: Arc<CommandBus>,
    events: Arc<EventBus>,
    poll_interval: Duration,
    positions_interval: Duration,
    tracked: Mutex<HashMap<VenueOrderId, TrackedOrder>>,
}

impl ExecutionEngine {
    pub fn new(
        adapter: Arc<dyn ExecutionAdapter>,
        commands: Arc<CommandBus>,
        events: Arc<EventBus>,
    ) -> Self {
        Self::with_intervals(
            adapter,
            commands,
            events,
            DEFAULT_POLL_INTERVAL,
            DEFAULT_POSITIONS_INTERVAL,
        )
    }

    pub fn with_intervals(
        adapter: Arc<dyn ExecutionAdapter>,
        commands: Arc<CommandBus>,
        events: Arc<EventBus>,
        poll_interval: Duration,
        positions_interval: Duration,
    ) -> Self {
        Self {
            adapter,
            commands,
            events,
            poll_interval,
            positions_interval,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of the tracked-order map (for tests and introspection).
    pub fn tracked_orders(&self) -> HashMap<VenueOrderId, TrackedOrder> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run the command consumer and both polling loops until shutdown.
    pub async fn run(&self) {
        info!(
            venue = %self.adapter.venue(),
            poll_ms = self.poll_interval.as_millis() as u64,
            positions_ms = self.positions_interval.as_millis() as u64,
            "execution engine started"
        );
        tokio::join!(
            self.consume_commands(),
            self.poll_orders_loop(),
            self.poll_positions_loop(),
        );
        info!("execution engine stopped");
    }

    async fn consume_commands(&self) {
        while let Some(cmd) = self.commands.get().await {
            match cmd {
                ExecutionCommand::SubmitOrder { request } => self.handle_submit(request).await,
                ExecutionCommand::CancelOrder {
                    venue_order_id,
                    reason,
                } => self.handle_cancel(venue_order_id, reason).await,
            }
            self.commands.task_done();
        }
    }

    async fn handle_submit(&self, request: OrderRequest) {
        let venue_order_id = match self.adapter.place_order(&request).await {
            Ok(id) => id,
            Err(err) => {
                warn!(trade_id = %request.trade_id, "order rejected: {err}");
                let payload = match &err {
                    AdapterError::VenueReject { payload } => Some(payload.clone()),
                    _ => None,
                };
                self.events.publish_from(
                    EXECUTION_ENGINE_STAGE,
                    ExecutionEvent::OrderRejected {
                        trade_id: request.trade_id.clone(),
                        venue: request.venue,
                        request,
                        message: err.to_string(),
                        payload,
                        ts: Utc::now(),
                    },
                );
                return;
            }
        };

        self.tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                venue_order_id.clone(),
                TrackedOrder {
                    venue: request.venue,
                    status: "submitted".to_string(),
                    fill_count: 0,
                },
            );

        info!(trade_id = %request.trade_id, %venue_order_id, "order submitted");
        self.events.publish_from(
            EXECUTION_ENGINE_STAGE,
            ExecutionEvent::OrderSubmitted {
                trade_id: request.trade_id.clone(),
                venue: request.venue,
                venue_order_id,
                request,
                ts: Utc::now(),
            },
        );
    }

    async fn handle_cancel(&self, venue_order_id: VenueOrderId, reason: Option<String>) {
        if let Err(err) = self.adapter.cancel_order(&venue_order_id).await {
            warn!(%venue_order_id, "cancel failed: {err}");
            self.events.publish_from(
                EXECUTION_ENGINE_STAGE,
                ExecutionEvent::ExecutionError {
                    venue: None,
                    venue_order_id: Some(venue_order_id),
                    message: format!("cancel_order failed: {err}"),
                    retryable: true,
                    ts: Utc::now(),
                },
            );
            return;
        }

        // Tracking is untouched here; removal happens when a poll observes
        // the terminal status.
        let venue = self
            .tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&venue_order_id)
            .map(|t| t.venue)
            .unwrap_or_else(|| self.adapter.venue());

        self.events.publish_from(
            EXECUTION_ENGINE_STAGE,
            ExecutionEvent::OrderCanceled {
                venue,
                venue_order_id,
                reason,
                ts: Utc::now(),
            },
        );
    }

    async fn poll_orders_loop(&self) {
        loop {
            tokio::time::sleep(self.poll_interval).await;
            self.poll_tracked_orders_once().await;
        }
    }

    /// One poll tick over every tracked order. Per order and tick, the
    /// `OrderUpdate` precedes any `FillUpdate`.
    async fn poll_tracked_orders_once(&self) {
        let ids: Vec<VenueOrderId> = {
            let tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            tracked.keys().cloned().collect()
        };

        for venue_order_id in ids {
            let (status, fill_count) = match self.adapter.get_order_status(&venue_order_id).await {
                Ok(observed) => observed,
                Err(err) => {
                    self.events.publish_from(
                        EXECUTION_ENGINE_STAGE,
                        ExecutionEvent::ExecutionError {
                            venue: None,
                            venue_order_id: Some(venue_order_id.clone()),
                            message: format!("get_order_status failed: {err}"),
                            retryable: true,
                            ts: Utc::now(),
                        },
                    );
                    continue;
                }
            };

            let mut to_publish = Vec::new();
            {
                let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
                let Some(entry) = tracked.get_mut(&venue_order_id) else {
                    continue;
                };
                let prev_fill = entry.fill_count;
                if status == entry.status && fill_count == prev_fill {
                    continue;
                }

                entry.status = status.clone();
                entry.fill_count = fill_count;
                let venue = entry.venue;

                to_publish.push(ExecutionEvent::OrderUpdate {
                    venue,
                    venue_order_id: venue_order_id.clone(),
                    status: status.clone(),
                    fill_count,
                    ts: Utc::now(),
                });
                if fill_count > prev_fill {
                    to_publish.push(ExecutionEvent::FillUpdate {
                        venue,
                        venue_order_id: venue_order_id.clone(),
                        filled_delta: fill_count - prev_fill,
                        filled_total: fill_count,
                        ts: Utc::now(),
                    });
                }

                if TERMINAL_STATUSES.contains(&status.as_str()) {
                    tracked.remove(&venue_order_id);
                }
            }
            self.events
                .publish_many_from(EXECUTION_ENGINE_STAGE, to_publish);
        }
    }

    async fn poll_positions_loop(&self) {
        loop {
            tokio::time::sleep(self.positions_interval).await;
            self.poll_positions_once().await;
        }
    }

    async fn poll_positions_once(&self) {
        match self.adapter.get_positions_snapshot().await {
            Ok(positions) => self.events.publish_from(
                EXECUTION_ENGINE_STAGE,
                ExecutionEvent::PositionSnapshot {
                    venue: self.adapter.venue(),
                    positions,
                    ts: Utc::now(),
                },
            ),
            Err(err) => self.events.publish_from(
                EXECUTION_ENGINE_STAGE,
                ExecutionEvent::ExecutionError {
                    venue: None,
                    venue_order_id: None,
                    message: format!("get_positions_snapshot failed: {err}"),
                    retryable: true,
                    ts: Utc::now(),
                },
            ),
        }
    }
}
