//! Hyperliquid exchange integration.
//!
//! Read-only access to Hyperliquid perpetuals: market data for the price feed
//! and account state for live status and leverage checks. Order signing is not
//! implemented; orders go through the paper venue.
//!
//! # Funding Rate Notes
//!
//! Hyperliquid funding is paid **hourly** at 1/8th of the computed 8-hour rate.
//! Funding cap on HL is 4%/hour.

mod client;
mod types;

pub use client::{HyperliquidClient, MAINNET_API_URL};
pub use types::*;
