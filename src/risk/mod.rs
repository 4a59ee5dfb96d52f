//! Leverage compliance.
//!
//! - `leverage`: compares venue leverage with the configured settings and runs
//!   the close / set leverage / reopen protocol when they differ
//! - `restore`: plans the positions reopened at the end of that protocol

mod leverage;
mod restore;

pub use leverage::{
    ComplianceReport, LeverageController, ProtocolOutcome, ProtocolReport, ProtocolStage,
    SymbolCompliance, LEVERAGE_TOLERANCE, VENUE_DEFAULT_LEVERAGE,
};
pub use restore::{
    plan_restore, LeverageSnapshot, RestoreMode, RestorePlan, RestoreTarget, SnapshotPosition,
    MIN_RESTORE_USD,
};
