//! Cardtrack Price Sources Crate
//!
//! This crate provides resilient access to the external card pricing APIs
//! used by the Cardtrack application.
//!
//! # Overview
//!
//! The price sources crate supports:
//! - Multiple pricing providers: PriceCharting, JustTCG, TCGplayer
//! - Priority-ordered fallback with per-source failure records
//! - Sliding-window rate limiting and circuit breaking per service
//! - Classified, taxonomy-aware retry with exponential backoff
//!
//! # Architecture
//!
//! ```text
//! +------------------+     +------------------+
//! |   PriceService   | --> |   SourceChain    |  (priority fallback)
//! +------------------+     +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |   PriceSource    |  (PriceCharting, JustTCG, ...)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          | ResilientClient  |  (limiter -> breaker -> retry)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |    PriceQuote    |  (normalized price data)
//!                          +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`CardQuery`] - Identity of the card being priced
//! - [`PriceQuote`] - Normalized quote with market/low/mid/high prices
//! - [`PriceSource`] - One external provider behind its resilient client
//! - [`SourceChain`] - Priority-ordered fallback over sources
//! - [`PriceService`] - Constructed facade owning all resilience state
//! - [`SourceError`] / [`ErrorKind`] - Classified failure taxonomy

pub mod breaker;
pub mod client;
pub mod errors;
pub mod limiter;
pub mod models;
pub mod retry;
pub mod service;
pub mod sources;

// Re-export all public types from models
pub use models::{parse_price, CardQuery, Game, PriceQuote};

// Re-export error taxonomy
pub use errors::{ErrorKind, SourceError};

// Re-export resilience building blocks
pub use breaker::{
    BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitBreakerRegistry, CircuitState,
};
pub use client::{AuthScheme, ClientConfig, ResilientClient};
pub use limiter::{RateLimitConfig, RateLimiter};
pub use retry::RetryPolicy;

// Re-export source types
pub use sources::attempts::{FailureReason, SourceFailure};
pub use sources::just_tcg::JustTcgSource;
pub use sources::price_charting::PriceChartingSource;
pub use sources::tcg_player::TcgPlayerSource;
pub use sources::{AllSourcesOutcome, PriceSource, SourceChain};

// Re-export the constructed service
pub use service::{ApiKeySettings, OAuthSettings, PriceService, ServiceSettings};
