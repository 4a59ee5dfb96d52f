//! Leverage compliance controller.
//!
//! The venue rejects leverage changes while a position is open, so bringing a
//! symbol back to its configured leverage means flattening the account:
//!
//! ```text
//! IDLE -> CHECK -> compliant: done
//!               -> SNAPSHOT -> CLOSE_ALL -> SET_LEVERAGE -> REOPEN -> DONE
//!                                                  (any stage) -> FAILED
//! ```
//!
//! A failed SNAPSHOT aborts before anything changes. A failure in any later
//! stage leaves the account in an unknown mix of closed and reopened
//! positions; it is reported as FAILED and never retried or rolled back here.
//! Settlement delays between stages are not cancellable.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::restore::{plan_restore, LeverageSnapshot, RestorePlan, SnapshotPosition};
use crate::config::{ProtocolDelays, TargetParams};
use crate::error::GatewayError;
use crate::exchange::{AccountReader, Gateway, OrderSide, PriceFeed};
use crate::strategy::{ExecutedOrder, OrderSizer};

/// Largest accepted gap between configured and venue leverage.
pub const LEVERAGE_TOLERANCE: Decimal = dec!(0.01);

/// Reading assumed for a flat symbol the venue reports no setting for.
pub const VENUE_DEFAULT_LEVERAGE: Decimal = dec!(1);

/// Stages of the compliance protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolStage {
    Idle,
    Check,
    Snapshot,
    CloseAll,
    SetLeverage,
    Reopen,
    Done,
    Failed,
}

impl ProtocolStage {
    /// Stage that follows a successful one.
    pub fn next(self) -> Self {
        match self {
            ProtocolStage::Idle => ProtocolStage::Check,
            ProtocolStage::Check => ProtocolStage::Snapshot,
            ProtocolStage::Snapshot => ProtocolStage::CloseAll,
            ProtocolStage::CloseAll => ProtocolStage::SetLeverage,
            ProtocolStage::SetLeverage => ProtocolStage::Reopen,
            ProtocolStage::Reopen => ProtocolStage::Done,
            ProtocolStage::Done => ProtocolStage::Done,
            ProtocolStage::Failed => ProtocolStage::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProtocolStage::Done | ProtocolStage::Failed)
    }

    /// Whether positions may already have changed once this stage is entered.
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            ProtocolStage::CloseAll | ProtocolStage::SetLeverage | ProtocolStage::Reopen
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolStage::Idle => "IDLE",
            ProtocolStage::Check => "CHECK",
            ProtocolStage::Snapshot => "SNAPSHOT",
            ProtocolStage::CloseAll => "CLOSE_ALL",
            ProtocolStage::SetLeverage => "SET_LEVERAGE",
            ProtocolStage::Reopen => "REOPEN",
            ProtocolStage::Done => "DONE",
            ProtocolStage::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ProtocolStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leverage check result for one tracked symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolCompliance {
    pub symbol: String,
    pub expected: u32,
    /// Venue leverage reading for the symbol
    pub current: Decimal,
    /// Whether `current` came from an open position
    pub has_position: bool,
    pub compliant: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComplianceReport {
    pub entries: Vec<SymbolCompliance>,
}

impl ComplianceReport {
    pub fn is_compliant(&self) -> bool {
        self.entries.iter().all(|e| e.compliant)
    }

    pub fn non_compliant(&self) -> impl Iterator<Item = &SymbolCompliance> {
        self.entries.iter().filter(|e| !e.compliant)
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolCompliance> {
        self.entries.iter().find(|e| e.symbol == symbol)
    }

    /// Symbol -> compliant flag.
    pub fn flags(&self) -> BTreeMap<String, bool> {
        self.entries
            .iter()
            .map(|e| (e.symbol.clone(), e.compliant))
            .collect()
    }
}

/// What happened during one protocol run.
#[derive(Debug, Clone, Default)]
pub struct ProtocolReport {
    pub snapshot: Option<LeverageSnapshot>,
    pub plan: Option<RestorePlan>,
    /// Closing and reopening orders, in submission order
    pub orders: Vec<ExecutedOrder>,
    pub completed_stages: Vec<ProtocolStage>,
    pub failures: Vec<String>,
}

impl ProtocolReport {
    pub fn fills(&self) -> impl Iterator<Item = &ExecutedOrder> {
        self.orders.iter().filter(|o| o.filled())
    }
}

/// Terminal result of [`LeverageController::enforce`].
#[derive(Debug)]
pub enum ProtocolOutcome {
    /// Every stage succeeded
    Completed(ProtocolReport),
    /// Nothing changed on the venue
    Aborted { reason: String },
    /// Stopped at `stage`; manual intervention required
    Failed {
        stage: ProtocolStage,
        report: ProtocolReport,
    },
}

impl ProtocolOutcome {
    pub fn report(&self) -> Option<&ProtocolReport> {
        match self {
            ProtocolOutcome::Completed(report) | ProtocolOutcome::Failed { report, .. } => {
                Some(report)
            }
            ProtocolOutcome::Aborted { .. } => None,
        }
    }
}

pub struct LeverageController<'a> {
    params: &'a TargetParams,
    delays: ProtocolDelays,
}

impl<'a> LeverageController<'a> {
    pub fn new(params: &'a TargetParams, delays: ProtocolDelays) -> Self {
        Self { params, delays }
    }

    /// Compare venue leverage against the configured leverage per tracked symbol.
    ///
    /// A symbol's reading is its open position's leverage, else the venue's
    /// setting for it, else [`VENUE_DEFAULT_LEVERAGE`]. A flat account is
    /// therefore non-compliant until leverage has been set for every symbol.
    pub async fn check_compliance<A>(&self, account: &A) -> Result<ComplianceReport, GatewayError>
    where
        A: AccountReader + ?Sized,
    {
        let positions = account.get_open_positions().await?;
        let open: HashMap<&str, Decimal> = positions
            .iter()
            .map(|p| (p.symbol.as_str(), p.leverage))
            .collect();

        let mut entries = Vec::new();
        for symbol in self.params.tracked_symbols() {
            let Some(expected) = self.params.expected_leverage(&symbol) else {
                continue;
            };
            let position_reading = open.get(symbol.as_str()).copied();
            let current = match position_reading {
                Some(leverage) => leverage,
                None => account
                    .get_leverage_setting(&symbol)
                    .await?
                    .map(Decimal::from)
                    .unwrap_or(VENUE_DEFAULT_LEVERAGE),
            };
            let compliant = (current - Decimal::from(expected)).abs() < LEVERAGE_TOLERANCE;
            if !compliant {
                warn!(
                    %symbol,
                    expected,
                    current = %current,
                    has_position = position_reading.is_some(),
                    "[LEVERAGE] Leverage mismatch"
                );
            }
            entries.push(SymbolCompliance {
                symbol,
                expected,
                current,
                has_position: position_reading.is_some(),
                compliant,
            });
        }

        Ok(ComplianceReport { entries })
    }

    /// Run the close / set leverage / reopen protocol.
    pub async fn enforce<G, P>(&self, gateway: &G, feed: &P, sizer: &OrderSizer) -> ProtocolOutcome
    where
        G: Gateway + ?Sized,
        P: PriceFeed + ?Sized,
    {
        let mut report = ProtocolReport::default();
        let mut stage = ProtocolStage::Snapshot;

        info!("[LEVERAGE] Starting compliance protocol");

        while !stage.is_terminal() {
            debug!(stage = %stage, "[LEVERAGE] Entering stage");
            let ok = match stage {
                ProtocolStage::Snapshot => match self.take_snapshot(gateway, feed).await {
                    Ok(snapshot) => {
                        report.snapshot = Some(snapshot);
                        true
                    }
                    Err(e) => {
                        error!(error = %e, "[LEVERAGE] Snapshot failed, aborting before any change");
                        return ProtocolOutcome::Aborted {
                            reason: format!("snapshot failed: {}", e),
                        };
                    }
                },
                ProtocolStage::CloseAll => self.close_all(gateway, &mut report).await,
                ProtocolStage::SetLeverage => self.set_all_leverage(gateway, &mut report).await,
                ProtocolStage::Reopen => self.reopen(gateway, feed, sizer, &mut report).await,
                // Check runs before enforce is called; terminal stages end the loop
                ProtocolStage::Idle
                | ProtocolStage::Check
                | ProtocolStage::Done
                | ProtocolStage::Failed => true,
            };

            if !ok {
                error!(
                    stage = %stage,
                    failures = ?report.failures,
                    "[LEVERAGE] Protocol FAILED, manual intervention required"
                );
                return ProtocolOutcome::Failed { stage, report };
            }

            report.completed_stages.push(stage);
            stage = stage.next();
        }

        info!(orders = report.orders.len(), "[LEVERAGE] Protocol completed");
        ProtocolOutcome::Completed(report)
    }

    async fn take_snapshot<G, P>(&self, gateway: &G, feed: &P) -> Result<LeverageSnapshot, GatewayError>
    where
        G: Gateway + ?Sized,
        P: PriceFeed + ?Sized,
    {
        let positions = gateway.get_open_positions().await?;
        let summary = gateway.get_account_summary().await?;

        let mut symbols = self.params.tracked_symbols();
        for p in &positions {
            if !symbols.contains(&p.symbol) {
                symbols.push(p.symbol.clone());
            }
        }
        let prices = feed.get_prices(&symbols).await?;

        let mut snapshot = LeverageSnapshot {
            nav: summary.account_value,
            positions: BTreeMap::new(),
            core_value: Decimal::ZERO,
            hedge_value: Decimal::ZERO,
        };

        for p in positions.iter().filter(|p| !p.size.is_zero()) {
            let price = prices.get(&p.symbol).copied().unwrap_or(p.entry_price);
            let value_usd = p.size.abs() * price;
            if p.symbol == self.params.core_symbol {
                snapshot.core_value += value_usd;
            } else if self.params.is_hedge(&p.symbol) {
                snapshot.hedge_value += value_usd;
            }
            snapshot.positions.insert(
                p.symbol.clone(),
                SnapshotPosition {
                    size: p.size,
                    value_usd,
                    price,
                },
            );
        }

        info!(
            nav = %snapshot.nav,
            positions = snapshot.positions.len(),
            core_value = %snapshot.core_value.round_dp(2),
            hedge_value = %snapshot.hedge_value.round_dp(2),
            "[LEVERAGE] Snapshot saved"
        );
        Ok(snapshot)
    }

    /// Close every open position, continuing past individual failures.
    async fn close_all<G>(&self, gateway: &G, report: &mut ProtocolReport) -> bool
    where
        G: Gateway + ?Sized,
    {
        let targets: Vec<(String, SnapshotPosition)> = report
            .snapshot
            .as_ref()
            .map(|s| s.positions.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let mut ok = true;
        for (symbol, position) in &targets {
            let result = gateway.close_position(symbol).await;
            if result.success {
                info!(%symbol, size = %position.size, "[LEVERAGE] Position closed");
            } else {
                error!(%symbol, error = %result.error_text(), "[LEVERAGE] Close failed");
                report
                    .failures
                    .push(format!("close {}: {}", symbol, result.error_text()));
                ok = false;
            }
            report.orders.push(ExecutedOrder {
                symbol: symbol.clone(),
                side: OrderSide::from_is_buy(position.size < Decimal::ZERO),
                size: position.size.abs(),
                price: position.price,
                result,
            });
        }

        if !targets.is_empty() {
            settle(self.delays.order_processing).await;
        }
        ok
    }

    async fn set_all_leverage<G>(&self, gateway: &G, report: &mut ProtocolReport) -> bool
    where
        G: Gateway + ?Sized,
    {
        let mut ok = true;
        for symbol in self.params.tracked_symbols() {
            let Some(leverage) = self.params.expected_leverage(&symbol) else {
                continue;
            };
            let result = gateway.set_leverage(&symbol, leverage).await;
            if result.success {
                info!(%symbol, leverage, "[LEVERAGE] Leverage set");
            } else {
                let message = result.error_message.unwrap_or_else(|| "unknown error".into());
                error!(%symbol, leverage, error = %message, "[LEVERAGE] Leverage update failed");
                report.failures.push(format!("set leverage {}: {}", symbol, message));
                ok = false;
            }
        }

        settle(self.delays.leverage_update).await;
        ok
    }

    async fn reopen<G, P>(
        &self,
        gateway: &G,
        feed: &P,
        sizer: &OrderSizer,
        report: &mut ProtocolReport,
    ) -> bool
    where
        G: Gateway + ?Sized,
        P: PriceFeed + ?Sized,
    {
        let Some(snapshot) = report.snapshot.clone() else {
            report.failures.push("no snapshot to restore from".into());
            return false;
        };

        let nav = match gateway.get_account_summary().await {
            Ok(summary) => summary.account_value,
            Err(e) => {
                warn!(error = %e, nav = %snapshot.nav, "[LEVERAGE] NAV re-read failed, using snapshot NAV");
                snapshot.nav
            }
        };
        let tradable = self.params.tradable(nav);
        let plan = plan_restore(self.params, &snapshot, tradable);

        info!(
            mode = ?plan.mode,
            nav = %nav,
            tradable = %tradable.round_dp(2),
            core_usd = %plan.core_usd.round_dp(2),
            hedge_usd = %plan.hedge_usd.round_dp(2),
            "[LEVERAGE] Restoring positions"
        );

        let symbols: Vec<String> = plan.targets.iter().map(|t| t.symbol.clone()).collect();
        feed.invalidate_prices().await;
        let prices = match feed.get_prices(&symbols).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!(error = %e, "[LEVERAGE] Price read failed, using snapshot prices");
                snapshot
                    .positions
                    .iter()
                    .map(|(s, p)| (s.clone(), p.price))
                    .collect()
            }
        };

        let mut ok = true;
        for target in &plan.targets {
            let Some(price) = prices.get(&target.symbol).copied().filter(|p| *p > Decimal::ZERO) else {
                error!(symbol = %target.symbol, "[LEVERAGE] No price to restore position");
                report.failures.push(format!("no price for {}", target.symbol));
                ok = false;
                continue;
            };

            let check = sizer.validate(&target.symbol, target.usd / price);
            if !check.ok {
                error!(symbol = %target.symbol, reason = %check.reason_text(), "[LEVERAGE] Restore size rejected");
                report
                    .failures
                    .push(format!("restore {}: {}", target.symbol, check.reason_text()));
                ok = false;
                continue;
            }

            let result = gateway
                .place_market_order(&target.symbol, target.is_buy, check.size, price)
                .await;
            if result.success {
                info!(symbol = %target.symbol, size = %check.size, "[LEVERAGE] Position restored");
            } else {
                error!(symbol = %target.symbol, error = %result.error_text(), "[LEVERAGE] Restore order failed");
                report
                    .failures
                    .push(format!("restore {}: {}", target.symbol, result.error_text()));
                ok = false;
            }
            report.orders.push(ExecutedOrder {
                symbol: target.symbol.clone(),
                side: OrderSide::from_is_buy(target.is_buy),
                size: check.size,
                price,
                result,
            });
        }
        report.plan = Some(plan);

        settle(self.delays.position_check).await;
        match gateway.get_open_positions().await {
            Ok(positions) => info!(open = positions.len(), "[LEVERAGE] Positions after restore"),
            Err(e) => warn!(error = %e, "[LEVERAGE] Could not verify restored positions"),
        }
        ok
    }
}

async fn settle(delay: Duration) {
    if !delay.is_zero() {
        debug!(secs = delay.as_secs_f64(), "[LEVERAGE] Waiting for venue settlement");
        tokio::time::sleep(delay).await;
    }
}
