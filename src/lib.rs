//! # Hedge Ratio Keeper
//!
//! Keeps a leveraged long "core" position and a basket of short "hedge"
//! positions at a configured margin ratio on Hyperliquid perpetuals.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `exchange`: Venue capabilities, Hyperliquid read client and paper venue
//! - `strategy`: Snapshot, rebalance decision, order sizing and execution
//! - `risk`: Leverage compliance check and close / set / reopen protocol
//! - `trader`: Cycle orchestrator and run loop
//! - `persistence`: JSON portfolio ledger and SQLite paper venue state
//! - `monitor`: Latency, PnL and activity tracking
//! - `utils`: Shared decimal arithmetic

pub mod config;
pub mod error;
pub mod exchange;
pub mod monitor;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod trader;
pub mod utils;

pub use config::Config;
pub use error::{CycleError, GatewayError};
pub use trader::Trader;
