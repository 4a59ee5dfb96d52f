//! Venue integrations.
//!
//! ## Capabilities
//! `traits` defines the narrow interfaces the strategy consumes: a price feed,
//! an account reader and an order gateway.
//!
//! ## Hyperliquid
//! Read-only REST access to market data and account state.
//!
//! ## Paper venue
//! Simulated order execution marked to live prices, with SQLite persistence.
//!
//! ## Resilience
//! Explicit retry, circuit-breaker and TTL cache values owned by their callers.

pub mod cache;
pub mod hyperliquid;
pub mod mock;
pub mod retry;
pub mod traits;
mod types;

pub use cache::{Cached, CachedPriceFeed, PRICE_CACHE_TTL};
pub use hyperliquid::HyperliquidClient;
pub use mock::{PaperExchange, StaticPriceFeed};
pub use retry::{BreakerState, CircuitBreaker, RetryPolicy};
pub use traits::{AccountReader, AssetMetaSource, Gateway, OrderGateway, PriceFeed};
pub use types::*;
