//! Non-blocking recorder that persists records without ever back-pressuring
//! the trading path.
//!
//! `record_message` converts a message into an [`ObservabilityRecord`] and
//! offers it to a bounded queue. When the queue is full the record is
//! dropped and a degradation counter advances; trading never stalls on
//! logging. One background writer owns the sink and drains the queue off
//! the async scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::records::{sanitize_summary, Observable, ObservabilityRecord, RecordKind};
use super::sinks::ObservabilitySink;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// Counters describing dropped or failed writes.
#[derive(Debug, Clone, Default)]
pub struct DegradedStatus {
    pub write_failures: u64,
    pub first_failure_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

enum WriterMsg {
    Record(Box<ObservabilityRecord>),
    Shutdown,
}

pub struct ObservabilityRecorder {
    tx: mpsc::Sender<WriterMsg>,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    degraded: Arc<Mutex<DegradedStatus>>,
    closed: AtomicBool,
}

impl ObservabilityRecorder {
    pub fn new(sink: Arc<dyn ObservabilitySink>, max_queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(max_queue_size.max(1));
        let degraded = Arc::new(Mutex::new(DegradedStatus::default()));
        let writer = spawn_writer(sink, rx, Arc::clone(&degraded));
        Self {
            tx,
            writer: tokio::sync::Mutex::new(Some(writer)),
            degraded,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_default_queue(sink: Arc<dyn ObservabilitySink>) -> Self {
        Self::new(sink, DEFAULT_MAX_QUEUE_SIZE)
    }

    /// Convert `message` into a record and enqueue it. Never blocks; drops
    /// on overflow.
    pub fn record_message<M>(
        &self,
        message: &M,
        kind: RecordKind,
        stage: &str,
        correlation_id: Option<&str>,
    ) where
        M: Observable + ?Sized,
    {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let trade_id = message.trade_id();
        let venue_order_id = message.venue_order_id();
        let correlation_id = correlation_id
            .map(str::to_string)
            .or_else(|| trade_id.clone())
            .or_else(|| venue_order_id.clone());

        let record = ObservabilityRecord {
            kind,
            event_type: message.event_type(),
            stage: stage.to_string(),
            correlation_id,
            trade_id,
            venue_order_id,
            occurred_at: message.occurred_at().unwrap_or_else(Utc::now),
            logged_at: Utc::now(),
            summary: sanitize_summary(message.summary()),
        };

        match self.tx.try_send(WriterMsg::Record(Box::new(record))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => self.note_failure(),
        }
    }

    pub fn degraded_status(&self) -> DegradedStatus {
        self.degraded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drain the queue, stop the writer, close the sink. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Queued records precede the sentinel in FIFO order, so the writer
        // drains everything accepted before close.
        let _ = self.tx.send(WriterMsg::Shutdown).await;
        if let Some(writer) = self.writer.lock().await.take() {
            if let Err(err) = writer.await {
                warn!("observability writer ended abnormally: {err}");
            }
        }
    }

    fn note_failure(&self) {
        note_failure(&self.degraded);
    }
}

fn note_failure(degraded: &Mutex<DegradedStatus>) {
    let now = Utc::now();
    let mut status = degraded.lock().unwrap_or_else(|e| e.into_inner());
    status.write_failures += 1;
    status.first_failure_at.get_or_insert(now);
    status.last_failure_at = Some(now);
}

fn spawn_writer(
    sink: Arc<dyn ObservabilitySink>,
    mut rx: mpsc::Receiver<WriterMsg>,
    degraded: Arc<Mutex<DegradedStatus>>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while let Some(msg) = rx.blocking_recv() {
            match msg {
                WriterMsg::Shutdown => break,
                WriterMsg::Record(record) => {
                    if let Err(err) = sink.write(&record) {
                        debug!("observability sink write failed: {err}");
                        note_failure(&degraded);
                    }
                }
            }
        }
        if let Err(err) = sink.close() {
            warn!("observability sink close failed: {err}");
        }
    })
}
