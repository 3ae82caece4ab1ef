//! Execution middleware for the Kalshi prediction market.
//!
//! Sits between a strategy/portfolio layer and the exchange: translates
//! venue-agnostic order intents into signed, rate-limited HTTP calls, polls
//! the venue for lifecycle progress, fans normalized events out to
//! subscribers, and durably records the whole command/event flow without
//! ever back-pressuring the trading path.
//!
//! ```text
//! PortfolioManager ──commands──▶ ExecutionEngine ──▶ adapter ──▶ KalshiClient ──▶ venue
//!        ▲                            │
//!        └──────────events────────────┘     every message ──▶ ObservabilityRecorder
//! ```

pub mod config;
pub mod kalshi;
pub mod observability;
pub mod trading;

pub use config::{load_config, AppConfig, ConfigError, KalshiConfig};
pub use kalshi::{ClientError, KalshiClient};
pub use observability::{InMemorySink, ObservabilityRecorder, ObservabilitySink, SqliteSink};
pub use trading::models::{ExecutionCommand, ExecutionEvent, OrderRequest, Venue};
pub use trading::{
    CommandBus, EventBus, ExecutionAdapter, ExecutionEngine, KalshiExecutionAdapter,
    PortfolioManager,
};
