//! Rebalancing strategy.
//!
//! Contains the core logic for:
//! - Normalizing venue state into a portfolio snapshot
//! - Deciding whether the core/hedge margin ratio needs correcting
//! - Sizing orders to venue step and minimum rules
//! - Submitting the corrective orders

mod decision;
mod executor;
mod sizing;
mod snapshot;

pub use decision::{deviation, target_allocation, RebalanceDecision, RebalanceEngine};
pub use executor::{
    ExecutedOrder, ExecutionReport, RebalanceExecutor, MIN_CORE_TRADE_USD, MIN_HEDGE_TRADE_USD,
};
pub use sizing::{OrderSizer, SizeCheck};
pub use snapshot::{PortfolioState, SnapshotBuilder, RATIO_SENTINEL};
