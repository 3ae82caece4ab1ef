//! Kalshi venue stack: signed HTTP client, request models, rate limiting.

pub mod auth;
pub mod client;
pub mod models;
pub mod rate_limit;

pub use auth::RequestSigner;
pub use client::{ClientError, KalshiClient, Query};
pub use rate_limit::TokenBucketRateLimiter;
