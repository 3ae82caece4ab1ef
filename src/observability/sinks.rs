//! Observability sinks (storage backends).
//!
//! Sinks are synchronous: the recorder isolates blocking I/O on a dedicated
//! writer, so the contract stays simple and serialization logic lives in one
//! place. Each sink serializes internally and is safe to call from the
//! writer's off-loop context.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};

use super::records::ObservabilityRecord;

pub const DEFAULT_TABLE: &str = "observability_records";

pub trait ObservabilitySink: Send + Sync {
    /// Persist a single record.
    fn write(&self, record: &ObservabilityRecord) -> Result<()>;

    /// Close any underlying resources.
    fn close(&self) -> Result<()>;
}

/// In-memory sink for tests and local debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    records: Mutex<Vec<ObservabilityRecord>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of everything recorded so far.
    pub fn snapshot(&self) -> Vec<ObservabilityRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ObservabilitySink for InMemorySink {
    fn write(&self, record: &ObservabilityRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Embedded store for durable local persistence: one append-only table,
/// schema created on first open, no migrations.
pub struct SqliteSink {
    table: String,
    conn: Mutex<Option<Connection>>,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_table(path, DEFAULT_TABLE)
    }

    pub fn open_with_table(path: impl AsRef<Path>, table: &str) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening observability store at {:?}", path.as_ref()))?;
        conn.execute_batch(&format!(
            "create table if not exists {table} (
               logged_at       text not null,
               occurred_at     text not null,
               kind            text not null,
               event_type      text not null,
               stage           text not null,
               correlation_id  text,
               trade_id        text,
               venue_order_id  text,
               summary_json    text not null
             )"
        ))
        .context("creating observability schema")?;
        Ok(Self {
            table: table.to_string(),
            conn: Mutex::new(Some(conn)),
        })
    }
}

impl ObservabilitySink for SqliteSink {
    fn write(&self, record: &ObservabilityRecord) -> Result<()> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let conn = guard.as_ref().ok_or_else(|| anyhow!("sink already closed"))?;
        conn.execute(
            &format!(
                "insert into {}
                 (logged_at, occurred_at, kind, event_type, stage,
                  correlation_id, trade_id, venue_order_id, summary_json)
                 values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                self.table
            ),
            params![
                record.logged_at.to_rfc3339(),
                record.occurred_at.to_rfc3339(),
                record.kind.as_str(),
                record.event_type,
                record.stage,
                record.correlation_id,
                record.trade_id,
                record.venue_order_id,
                record.summary_json(),
            ],
        )
        .context("inserting observability record")?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| anyhow!(e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::records::RecordKind;
    use chrono::Utc;
    use serde_json::json;

    fn record(event_type: &str) -> ObservabilityRecord {
        ObservabilityRecord {
            kind: RecordKind::Event,
            event_type: event_type.into(),
            stage: "execution_engine".into(),
            correlation_id: Some("t1".into()),
            trade_id: Some("t1".into()),
            venue_order_id: None,
            occurred_at: Utc::now(),
            logged_at: Utc::now(),
            summary: json!({"b": 1, "a": 2}),
        }
    }

    #[test]
    fn in_memory_sink_snapshots_appends() {
        let sink = InMemorySink::new();
        sink.write(&record("order_submitted")).unwrap();
        sink.write(&record("order_update")).unwrap();
        let records = sink.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].event_type, "order_update");
    }

    #[test]
    fn sqlite_sink_persists_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observability.db");

        let sink = SqliteSink::open(&path).unwrap();
        sink.write(&record("order_submitted")).unwrap();
        sink.write(&record("fill_update")).unwrap();
        sink.close().unwrap();

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row("select count(*) from observability_records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let (event_type, summary): (String, String) = conn
            .query_row(
                "select event_type, summary_json from observability_records limit 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(event_type, "order_submitted");
        assert_eq!(summary, r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn sqlite_close_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::open(dir.path().join("o.db")).unwrap();
        sink.close().unwrap();
        assert!(sink.write(&record("x")).is_err());
        // A second close is a no-op.
        assert!(sink.close().is_ok());
    }
}
