//! Venue-agnostic execution core: models, buses, engine, portfolio.

pub mod adapters;
pub mod bus;
pub mod engine;
pub mod models;
pub mod portfolio;

pub use adapters::{AdapterError, ExecutionAdapter, KalshiExecutionAdapter};
pub use bus::{CommandBus, EventBus, EventSubscription};
pub use engine::{ExecutionEngine, TrackedOrder};
pub use portfolio::{PortfolioError, PortfolioManager};
