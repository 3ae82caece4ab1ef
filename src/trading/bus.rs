//! In-process message buses.
//!
//! A single command queue feeds the execution engine and an event bus fans
//! execution events out to any number of subscribers. Both optionally carry
//! an observability recorder; the record is enqueued before the message is
//! handed to any consumer, so every delivered message has a record in
//! flight or persisted.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::warn;

use crate::observability::{ObservabilityRecorder, RecordKind};

use super::models::{ExecutionCommand, ExecutionEvent};

pub const COMMAND_BUS_STAGE: &str = "command_bus";
pub const EVENT_BUS_STAGE: &str = "event_bus";

/// Single-consumer command queue (portfolio manager → execution engine).
pub struct CommandBus {
    tx: mpsc::UnboundedSender<ExecutionCommand>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ExecutionCommand>>,
    pending: AtomicUsize,
    recorder: Option<Arc<ObservabilityRecorder>>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::with_recorder(None)
    }

    pub fn with_recorder(recorder: Option<Arc<ObservabilityRecorder>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            pending: AtomicUsize::new(0),
            recorder,
        }
    }

    /// Enqueue a command for the execution engine.
    pub fn put(&self, cmd: ExecutionCommand) {
        self.put_from(COMMAND_BUS_STAGE, cmd);
    }

    /// Enqueue with an explicit stage label for the observability record.
    pub fn put_from(&self, stage: &str, cmd: ExecutionCommand) {
        if let Some(recorder) = &self.recorder {
            recorder.record_message(&cmd, RecordKind::Command, stage, None);
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(cmd).is_err() {
            warn!("command bus consumer is gone; dropping command");
        }
    }

    /// Dequeue the next command; `None` once every producer handle is gone.
    pub async fn get(&self) -> Option<ExecutionCommand> {
        self.rx.lock().await.recv().await
    }

    /// Mark the most recently processed command as done.
    pub fn task_done(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    /// Commands enqueued but not yet marked done.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's private event queue.
pub struct EventSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ExecutionEvent>,
}

impl EventSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ExecutionEvent> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out event bus (execution engine → subscribers).
pub struct EventBus {
    subscribers: Mutex<Vec<(u64, mpsc::UnboundedSender<ExecutionEvent>)>>,
    next_id: AtomicU64,
    recorder: Option<Arc<ObservabilityRecorder>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_recorder(None)
    }

    pub fn with_recorder(recorder: Option<Arc<ObservabilityRecorder>>) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            recorder,
        }
    }

    /// Create a new subscriber queue receiving all future publications.
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, tx));
        EventSubscription { id, rx }
    }

    /// Remove a subscriber; no further events are delivered to it.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(sub_id, _)| *sub_id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver an event to every current subscriber in subscription order.
    pub fn publish(&self, event: ExecutionEvent) {
        self.publish_from(EVENT_BUS_STAGE, event);
    }

    pub fn publish_from(&self, stage: &str, event: ExecutionEvent) {
        if let Some(recorder) = &self.recorder {
            recorder.record_message(&event, RecordKind::Event, stage, None);
        }
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        // Subscribers whose receiving end is gone are pruned as we go.
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Publish a batch, preserving the order of `events`.
    pub fn publish_many(&self, events: impl IntoIterator<Item = ExecutionEvent>) {
        self.publish_many_from(EVENT_BUS_STAGE, events);
    }

    pub fn publish_many_from(&self, stage: &str, events: impl IntoIterator<Item = ExecutionEvent>) {
        for event in events {
            self.publish_from(stage, event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{InMemorySink, ObservabilityRecorder};
    use crate::trading::models::{
        OrderAction, OrderRequest, OrderSide, OrderType, Venue,
    };
    use chrono::Utc;

    fn request(trade_id: &str) -> OrderRequest {
        OrderRequest {
            trade_id: trade_id.into(),
            venue: Venue::Kalshi,
            ticker: "ABC".into(),
            side: OrderSide::Yes,
            action: OrderAction::Buy,
            count: 1,
            order_type: OrderType::Limit,
            limit_price_dollars: Some(0.10),
            client_order_id: Some(trade_id.into()),
        }
    }

    fn update(venue_order_id: &str, fill_count: i64) -> ExecutionEvent {
        ExecutionEvent::OrderUpdate {
            venue: Venue::Kalshi,
            venue_order_id: venue_order_id.into(),
            status: "resting".into(),
            fill_count,
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn command_bus_is_fifo() {
        let bus = CommandBus::new();
        for i in 0..3 {
            bus.put(ExecutionCommand::CancelOrder {
                venue_order_id: format!("OID{i}"),
                reason: None,
            });
        }
        assert_eq!(bus.pending(), 3);
        for i in 0..3 {
            let cmd = bus.get().await.unwrap();
            assert_eq!(cmd.venue_order_id(), Some(format!("OID{i}").as_str()));
            bus.task_done();
        }
        assert_eq!(bus.pending(), 0);
    }

    #[tokio::test]
    async fn event_bus_preserves_publish_order_per_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish_many((0..5).map(|i| update("OID1", i)));

        for sub in [&mut a, &mut b] {
            for expected in 0..5 {
                match sub.recv().await.unwrap() {
                    ExecutionEvent::OrderUpdate { fill_count, .. } => {
                        assert_eq!(fill_count, expected)
                    }
                    other => panic!("unexpected event {other:?}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn unsubscribed_queues_stop_receiving() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.unsubscribe(b.id());
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(update("OID1", 0));
        assert!(a.try_recv().is_some());

        let mut b = b;
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned_on_publish() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let _keep = bus.subscribe();
        drop(a);

        bus.publish(update("OID1", 0));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn buses_record_every_message() {
        let sink = Arc::new(InMemorySink::new());
        let recorder = Arc::new(ObservabilityRecorder::new(sink.clone(), 100));

        let commands = CommandBus::with_recorder(Some(recorder.clone()));
        let events = EventBus::with_recorder(Some(recorder.clone()));

        commands.put_from(
            "portfolio_manager",
            ExecutionCommand::SubmitOrder {
                request: request("t1"),
            },
        );
        events.publish_from(
            "execution_engine",
            ExecutionEvent::OrderSubmitted {
                trade_id: "t1".into(),
                venue: Venue::Kalshi,
                venue_order_id: "OID1".into(),
                request: request("t1"),
                ts: Utc::now(),
            },
        );

        recorder.close().await;

        let records = sink.snapshot();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| {
            r.kind == RecordKind::Command
                && r.event_type == "submit_order"
                && r.stage == "portfolio_manager"
        }));
        assert!(records.iter().any(|r| {
            r.kind == RecordKind::Event
                && r.event_type == "order_submitted"
                && r.stage == "execution_engine"
        }));
        assert!(records.iter().all(|r| r.correlation_id.as_deref() == Some("t1")));
        assert!(records.iter().all(|r| r.logged_at >= r.occurred_at));
    }
}
