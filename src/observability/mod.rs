//! Durable, non-blocking logging of the command/event flow.

pub mod recorder;
pub mod records;
pub mod sinks;

pub use recorder::{DegradedStatus, ObservabilityRecorder, DEFAULT_MAX_QUEUE_SIZE};
pub use records::{Observable, ObservabilityRecord, RecordKind};
pub use sinks::{InMemorySink, ObservabilitySink, SqliteSink};
