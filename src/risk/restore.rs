//! Position restore planning after a leverage reset.
//!
//! A flat snapshot opens fresh positions from the fixed 2/3 core, 1/3 hedge
//! margin split at the new leverage. Otherwise the snapshot's core/hedge value
//! proportions are mapped onto the tradable NAV, with the hedge side split
//! evenly over the hedge symbols that were open before the reset.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::TargetParams;

/// Sides below this USD amount are not reopened.
pub const MIN_RESTORE_USD: Decimal = dec!(5);

/// One position captured before the reset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotPosition {
    pub size: Decimal,
    pub value_usd: Decimal,
    pub price: Decimal,
}

/// Account state captured at the start of a compliance run. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeverageSnapshot {
    pub nav: Decimal,
    pub positions: BTreeMap<String, SnapshotPosition>,
    pub core_value: Decimal,
    pub hedge_value: Decimal,
}

impl LeverageSnapshot {
    pub fn total_value(&self) -> Decimal {
        self.core_value + self.hedge_value
    }

    pub fn is_flat(&self) -> bool {
        self.total_value().is_zero()
    }

    /// Configured hedge symbols that held a position, in configured order.
    pub fn open_hedges(&self, params: &TargetParams) -> Vec<String> {
        params
            .hedge_symbols
            .iter()
            .filter(|s| self.positions.get(*s).is_some_and(|p| !p.size.is_zero()))
            .cloned()
            .collect()
    }
}

/// Whether targets come from the fixed split or the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestoreMode {
    Initial,
    Proportional,
}

/// A position to open after leverage is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreTarget {
    pub symbol: String,
    /// Notional to open, in USD
    pub usd: Decimal,
    pub is_buy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestorePlan {
    pub mode: RestoreMode,
    pub core_usd: Decimal,
    pub hedge_usd: Decimal,
    pub targets: Vec<RestoreTarget>,
}

/// Compute the positions to reopen from `tradable` NAV.
pub fn plan_restore(params: &TargetParams, snapshot: &LeverageSnapshot, tradable: Decimal) -> RestorePlan {
    if snapshot.is_flat() {
        plan_initial(params, tradable)
    } else {
        plan_proportional(params, snapshot, tradable)
    }
}

fn plan_initial(params: &TargetParams, tradable: Decimal) -> RestorePlan {
    let core_margin = tradable * dec!(2) / dec!(3);
    let hedge_margin = tradable - core_margin;
    let mut targets = Vec::new();

    let core_usd = if core_margin > MIN_RESTORE_USD {
        let usd = core_margin * Decimal::from(params.leverage_core);
        targets.push(RestoreTarget {
            symbol: params.core_symbol.clone(),
            usd,
            is_buy: true,
        });
        usd
    } else {
        Decimal::ZERO
    };

    let hedge_usd = if hedge_margin > MIN_RESTORE_USD && !params.hedge_symbols.is_empty() {
        let usd = hedge_margin * Decimal::from(params.leverage_hedge);
        push_hedges(&mut targets, &params.hedge_symbols, usd);
        usd
    } else {
        Decimal::ZERO
    };

    RestorePlan {
        mode: RestoreMode::Initial,
        core_usd,
        hedge_usd,
        targets,
    }
}

fn plan_proportional(params: &TargetParams, snapshot: &LeverageSnapshot, tradable: Decimal) -> RestorePlan {
    let total = snapshot.total_value();
    let core_target = tradable * snapshot.core_value / total;
    let hedge_target = tradable * snapshot.hedge_value / total;
    let mut targets = Vec::new();

    let core_usd = if core_target > MIN_RESTORE_USD {
        targets.push(RestoreTarget {
            symbol: params.core_symbol.clone(),
            usd: core_target,
            is_buy: true,
        });
        core_target
    } else {
        Decimal::ZERO
    };

    let open_hedges = snapshot.open_hedges(params);
    let hedge_usd = if hedge_target > MIN_RESTORE_USD && !open_hedges.is_empty() {
        push_hedges(&mut targets, &open_hedges, hedge_target);
        hedge_target
    } else {
        Decimal::ZERO
    };

    RestorePlan {
        mode: RestoreMode::Proportional,
        core_usd,
        hedge_usd,
        targets,
    }
}

fn push_hedges(targets: &mut Vec<RestoreTarget>, symbols: &[String], total_usd: Decimal) {
    let per_symbol = total_usd / Decimal::from(symbols.len());
    targets.extend(symbols.iter().map(|symbol| RestoreTarget {
        symbol: symbol.clone(),
        usd: per_symbol,
        is_buy: false,
    }));
}
