//! Cycle orchestrator.
//!
//! Each cycle: snapshot -> leverage check (full reset when non-compliant, which
//! ends the cycle) -> rebalance decision -> execution -> persistence. A failed
//! cycle is logged and the loop carries on; nothing but the persisted ledger
//! and venue state crosses from one cycle to the next.
//!
//! Shutdown is cooperative. The run flag is checked at the top of every cycle
//! and once per second while sleeping; an in-flight cycle, including a running
//! compliance protocol, always finishes first.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{Config, ProtocolDelays, TargetParams};
use crate::error::CycleError;
use crate::exchange::{AssetMetaSource, Gateway, OrderSide, PriceFeed};
use crate::monitor::PerformanceMonitor;
use crate::persistence::{CommissionRecord, StateStore};
use crate::risk::{ComplianceReport, LeverageController, ProtocolOutcome, ProtocolReport};
use crate::strategy::{
    ExecutedOrder, ExecutionReport, OrderSizer, PortfolioState, RebalanceDecision,
    RebalanceEngine, RebalanceExecutor, SnapshotBuilder,
};

/// Granularity of the inter-cycle sleep.
const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Funding lookback when the ledger has no payments yet.
const FUNDING_LOOKBACK_MS: i64 = 24 * 3_600_000;

/// What one completed cycle did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Ratio within threshold
    NoAction(RebalanceDecision),
    /// Leverage was reset; the rest of the cycle was skipped
    LeverageReset(ProtocolReport),
    Rebalanced(ExecutionReport),
}

/// Read-only view of the portfolio.
#[derive(Debug)]
pub struct PortfolioStatus {
    pub state: PortfolioState,
    pub compliance: ComplianceReport,
    pub decision: RebalanceDecision,
}

/// Result of closing every open position.
#[derive(Debug, Default)]
pub struct CloseReport {
    pub orders: Vec<ExecutedOrder>,
    pub failures: Vec<String>,
}

pub struct Trader<G, F> {
    params: TargetParams,
    delays: ProtocolDelays,
    cycle_interval: Duration,
    gateway: G,
    feed: F,
    store: StateStore,
    monitor: PerformanceMonitor,
}

impl<G, F> Trader<G, F>
where
    G: Gateway,
    F: PriceFeed + AssetMetaSource,
{
    pub fn new(config: &Config, gateway: G, feed: F, store: StateStore) -> Self {
        Self {
            params: config.target_params(),
            delays: config.protocol_delays(),
            cycle_interval: config.cycle_interval(),
            gateway,
            feed,
            store,
            monitor: PerformanceMonitor::new(config.strategy.start_nav),
        }
    }

    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    pub fn params(&self) -> &TargetParams {
        &self.params
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    /// Run cycles until `running` is cleared.
    pub async fn run_loop(&mut self, running: Arc<AtomicBool>) {
        info!(
            interval_secs = self.cycle_interval.as_secs(),
            core = %self.params.core_symbol,
            hedges = ?self.params.hedge_symbols,
            "[CYCLE] Starting trading loop"
        );

        while running.load(Ordering::SeqCst) {
            let ok = match self.run_cycle().await {
                Ok(outcome) => {
                    log_outcome(&outcome);
                    true
                }
                Err(e) if e.requires_manual_intervention() => {
                    error!(error = %e, "[CYCLE] Cycle failed: MANUAL INTERVENTION REQUIRED");
                    false
                }
                Err(e) => {
                    warn!(error = %e, "[CYCLE] Cycle failed, retrying next tick");
                    false
                }
            };

            if self.monitor.record_cycle(ok) {
                self.monitor.log_summary();
            }

            self.sleep_until_next_cycle(&running).await;
        }

        info!("[CYCLE] Stop requested, shutting down");
        if let Err(e) = self.store.save() {
            error!(error = %e, "[PERSISTENCE] Failed to save final state");
        }
        self.monitor.log_summary();
    }

    async fn sleep_until_next_cycle(&self, running: &AtomicBool) {
        let deadline = tokio::time::Instant::now() + self.cycle_interval;
        while running.load(Ordering::SeqCst) {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Run one full cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let state = self.snapshot().await?;
        self.monitor.record_nav(state.nav);

        let compliance = self.check_leverage().await?;
        if !compliance.is_compliant() {
            let symbols: Vec<&str> = compliance.non_compliant().map(|e| e.symbol.as_str()).collect();
            warn!(?symbols, "[CYCLE] Leverage non-compliant, running reset protocol");
            let report = self.run_protocol(&state).await?;
            return Ok(CycleOutcome::LeverageReset(report));
        }

        let decision = RebalanceEngine::new(&self.params).decide(&state);
        info!(
            nav = %state.nav.round_dp(2),
            ratio = %state.position_ratio.round_dp(3),
            target = %self.params.ratio_target,
            deviation = %decision.deviation_percent.round_dp(4),
            rebalance = decision.should_rebalance,
            "[CYCLE] Decision"
        );

        if !decision.should_rebalance {
            self.persist(&state, state.nav, &[], None).await?;
            return Ok(CycleOutcome::NoAction(decision));
        }

        let report = self.execute(&decision, &state).await?;
        let event = json!({
            "time": Utc::now(),
            "type": "rebalance",
            "reason": decision.reason,
            "ratio": decision.current_ratio,
            "deviation": decision.deviation_percent,
            "target_core_usd": decision.target_core_usd,
            "target_hedge_usd": decision.target_hedge_usd,
            "success": report.success,
            "orders": report.orders.len(),
            "failures": report.failures,
        });
        let fills: Vec<ExecutedOrder> = report.fills().cloned().collect();
        self.persist(&state, state.nav, &fills, Some(event)).await?;

        Ok(CycleOutcome::Rebalanced(report))
    }

    /// Current state, leverage compliance and the decision that would be taken.
    pub async fn portfolio_status(&self) -> Result<PortfolioStatus, CycleError> {
        let state = SnapshotBuilder::new(&self.params)
            .build(&self.gateway, &self.feed)
            .await
            .map_err(CycleError::Snapshot)?;
        let compliance = LeverageController::new(&self.params, self.delays)
            .check_compliance(&self.gateway)
            .await
            .map_err(CycleError::LeverageCheck)?;
        let decision = RebalanceEngine::new(&self.params).decide(&state);

        Ok(PortfolioStatus {
            state,
            compliance,
            decision,
        })
    }

    /// Close every open position, continuing past failures.
    pub async fn close_all_positions(&mut self) -> Result<CloseReport, CycleError> {
        let state = self.snapshot().await?;
        let positions = self
            .gateway
            .get_open_positions()
            .await
            .map_err(CycleError::Snapshot)?;

        let mut report = CloseReport::default();
        for position in positions {
            let result = self.gateway.close_position(&position.symbol).await;
            if result.success {
                info!(symbol = %position.symbol, size = %position.size, "[ORDER] Position closed");
            } else {
                error!(symbol = %position.symbol, error = %result.error_text(), "[ORDER] Close failed");
                report
                    .failures
                    .push(format!("{}: {}", position.symbol, result.error_text()));
            }
            report.orders.push(ExecutedOrder {
                symbol: position.symbol.clone(),
                side: OrderSide::from_is_buy(position.size < Decimal::ZERO),
                size: position.size.abs(),
                price: state.price(&position.symbol).unwrap_or(position.entry_price),
                result,
            });
        }

        let fills: Vec<ExecutedOrder> = report.orders.iter().filter(|o| o.filled()).cloned().collect();
        let event = json!({
            "time": Utc::now(),
            "type": "close_all",
            "closed": fills.len(),
            "failures": report.failures,
        });
        self.persist(&state, state.nav, &fills, Some(event)).await?;
        Ok(report)
    }

    /// Execute toward the targets regardless of the current deviation.
    pub async fn force_rebalance(&mut self) -> Result<ExecutionReport, CycleError> {
        let state = self.snapshot().await?;
        let decision = RebalanceEngine::new(&self.params).decide(&state).forced();
        let report = self.execute(&decision, &state).await?;

        let event = json!({
            "time": Utc::now(),
            "type": "forced_rebalance",
            "ratio": decision.current_ratio,
            "success": report.success,
            "orders": report.orders.len(),
            "failures": report.failures,
        });
        let fills: Vec<ExecutedOrder> = report.fills().cloned().collect();
        self.persist(&state, state.nav, &fills, Some(event)).await?;
        Ok(report)
    }

    /// Run the full leverage reset even if leverage already matches.
    pub async fn enforce_leverage(&mut self) -> Result<ProtocolReport, CycleError> {
        let state = self.snapshot().await?;
        self.run_protocol(&state).await
    }

    /// Check leverage compliance only.
    pub async fn check_leverage(&self) -> Result<ComplianceReport, CycleError> {
        let timer = self.monitor.start("leverage_check");
        let report = LeverageController::new(&self.params, self.delays)
            .check_compliance(&self.gateway)
            .await
            .map_err(CycleError::LeverageCheck)?;
        timer.succeed();
        Ok(report)
    }

    async fn snapshot(&self) -> Result<PortfolioState, CycleError> {
        let timer = self.monitor.start("snapshot");
        let state = SnapshotBuilder::new(&self.params)
            .build(&self.gateway, &self.feed)
            .await
            .map_err(CycleError::Snapshot)?;
        timer.succeed();
        Ok(state)
    }

    async fn sizer(&self) -> Result<OrderSizer, CycleError> {
        let meta = self
            .feed
            .get_asset_meta()
            .await
            .map_err(CycleError::Metadata)?;
        Ok(OrderSizer::new(meta))
    }

    async fn execute(
        &self,
        decision: &RebalanceDecision,
        state: &PortfolioState,
    ) -> Result<ExecutionReport, CycleError> {
        let sizer = self.sizer().await?;
        let timer = self.monitor.start("execution");
        let report = RebalanceExecutor::new(&self.params, &sizer)
            .execute(&self.gateway, decision, state)
            .await;

        self.monitor
            .record_orders(report.fill_count(), report.orders.len() - report.fill_count());
        self.monitor.record_rebalance();
        if report.success {
            timer.succeed();
        }
        Ok(report)
    }

    async fn run_protocol(&mut self, state: &PortfolioState) -> Result<ProtocolReport, CycleError> {
        let sizer = self.sizer().await?;
        self.monitor.record_compliance_run();

        let outcome = {
            let timer = self.monitor.start("leverage_protocol");
            let outcome = LeverageController::new(&self.params, self.delays)
                .enforce(&self.gateway, &self.feed, &sizer)
                .await;
            if matches!(outcome, ProtocolOutcome::Completed(_)) {
                timer.succeed();
            }
            outcome
        };

        match outcome {
            ProtocolOutcome::Completed(report) => {
                let fills: Vec<ExecutedOrder> = report.fills().cloned().collect();
                self.monitor.record_orders(fills.len(), report.orders.len() - fills.len());
                let nav = self.nav_after_protocol(state.nav).await;
                let event = protocol_event("completed", None, &report);
                self.persist(state, nav, &fills, Some(event)).await?;
                Ok(report)
            }
            ProtocolOutcome::Failed { stage, report } => {
                let fills: Vec<ExecutedOrder> = report.fills().cloned().collect();
                self.monitor.record_orders(fills.len(), report.orders.len() - fills.len());
                let nav = self.nav_after_protocol(state.nav).await;
                let event = protocol_event("failed", Some(stage.as_str()), &report);
                // Record what did execute before surfacing the failure
                if let Err(e) = self.persist(state, nav, &fills, Some(event)).await {
                    error!(error = %e, "[PERSISTENCE] Could not record failed protocol");
                }
                Err(CycleError::ComplianceFailed { stage })
            }
            ProtocolOutcome::Aborted { reason } => Err(CycleError::ComplianceAborted(reason)),
        }
    }

    /// NAV once the protocol has closed and reopened positions.
    async fn nav_after_protocol(&self, snapshot_nav: Decimal) -> Decimal {
        match self.gateway.get_account_summary().await {
            Ok(summary) => {
                self.monitor.record_nav(summary.account_value);
                summary.account_value
            }
            Err(e) => {
                warn!(error = %e, "[PERSISTENCE] NAV re-read failed, storing snapshot NAV");
                snapshot_nav
            }
        }
    }

    /// Append `nav`, positions, funding and fills to the ledger and save it.
    ///
    /// The commission chain starts from the snapshot NAV, taken before any fill.
    async fn persist(
        &mut self,
        state: &PortfolioState,
        nav: Decimal,
        fills: &[ExecutedOrder],
        event: Option<serde_json::Value>,
    ) -> Result<(), CycleError> {
        let now_ms = Utc::now().timestamp_millis();

        let positions: BTreeMap<String, Decimal> = if fills.is_empty() {
            snapshot_positions(&self.params, state)
        } else {
            match self.gateway.get_open_positions().await {
                Ok(positions) => positions.into_iter().map(|p| (p.symbol, p.size)).collect(),
                Err(e) => {
                    warn!(error = %e, "[PERSISTENCE] Position re-read failed, storing snapshot positions");
                    snapshot_positions(&self.params, state)
                }
            }
        };

        let tracked = self.params.tracked_symbols();
        let funding_rates = match self.feed.get_funding_rates(&tracked).await {
            Ok(rates) => Some(rates),
            Err(e) => {
                warn!(error = %e, "[PERSISTENCE] Funding rates unavailable");
                None
            }
        };

        let since = self
            .store
            .last_funding_time()
            .map(|t| t + 1)
            .unwrap_or(now_ms - FUNDING_LOOKBACK_MS);
        let payments = match self.gateway.get_funding_payments(since).await {
            Ok(payments) => payments,
            Err(e) => {
                warn!(error = %e, "[PERSISTENCE] Funding payments unavailable");
                Vec::new()
            }
        };

        let timer = self.monitor.start("persistence");
        self.store.add_nav_record(nav);
        self.store.update_positions(&positions);
        if let Some(rates) = &funding_rates {
            self.store.add_funding_rates(rates);
        }
        let added = self.store.add_funding_records(&payments, now_ms);

        let mut nav_after = state.nav;
        for fill in fills {
            let commission_usd = match (&fill.result.fee, fill.result.fee_token.as_deref()) {
                (Some(fee), Some("USDC")) => Some(*fee),
                _ => None,
            };
            nav_after -= commission_usd.unwrap_or_default();
            self.store.add_commission_record(CommissionRecord {
                date: Utc::now(),
                symbol: fill.symbol.clone(),
                side: fill.side.to_string(),
                size: fill.result.filled_size,
                price: fill.fill_price(),
                commission: fill.result.fee,
                commission_token: fill.result.fee_token.clone(),
                commission_usd,
                order_id: fill.result.order_id.clone(),
                nav_after_commission: nav_after,
            });
        }

        if let Some(event) = event {
            self.store.add_rebalance_event(event);
        }

        self.store.save().map_err(CycleError::Persistence)?;
        timer.succeed();

        info!(
            nav = %nav.round_dp(2),
            positions = positions.len(),
            fills = fills.len(),
            funding_records = added,
            "[PERSISTENCE] Cycle recorded"
        );
        Ok(())
    }
}

fn snapshot_positions(params: &TargetParams, state: &PortfolioState) -> BTreeMap<String, Decimal> {
    std::iter::once((params.core_symbol.clone(), state.core_position))
        .chain(state.hedge_positions.iter().map(|(s, q)| (s.clone(), *q)))
        .filter(|(_, q)| !q.is_zero())
        .collect()
}

fn protocol_event(status: &str, stage: Option<&str>, report: &ProtocolReport) -> serde_json::Value {
    json!({
        "time": Utc::now(),
        "type": "leverage_reset",
        "status": status,
        "failed_stage": stage,
        "snapshot": report.snapshot,
        "plan": report.plan,
        "orders": report.orders.len(),
        "failures": report.failures,
    })
}

fn log_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::NoAction(decision) => info!(
            deviation = %decision.deviation_percent.round_dp(4),
            "[CYCLE] Ratio within threshold, no action"
        ),
        CycleOutcome::LeverageReset(report) => info!(
            orders = report.orders.len(),
            "[CYCLE] Leverage reset completed"
        ),
        CycleOutcome::Rebalanced(report) if report.success => info!(
            orders = report.orders.len(),
            "[CYCLE] Rebalance executed"
        ),
        CycleOutcome::Rebalanced(report) => warn!(
            orders = report.orders.len(),
            failures = ?report.failures,
            "[CYCLE] Rebalance executed with failures"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{AccountReader, PaperExchange, StaticPriceFeed};
    use crate::risk::{ProtocolStage, RestoreMode};
    use rust_decimal_macros::dec;

    type PaperTrader = Trader<Arc<PaperExchange<Arc<StaticPriceFeed>>>, Arc<StaticPriceFeed>>;

    struct Harness {
        trader: PaperTrader,
        exchange: Arc<PaperExchange<Arc<StaticPriceFeed>>>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let mut config = Config::default();
        config.api_delays.order_processing = 0;
        config.api_delays.leverage_update = 0;
        config.api_delays.position_check = 0;
        harness_with(config)
    }

    fn harness_with(config: Config) -> Harness {
        let feed = Arc::new(StaticPriceFeed::new(&[
            ("BTC", dec!(60000)),
            ("ZK", dec!(0.15)),
            ("STRK", dec!(0.4)),
        ]));
        let exchange = Arc::new(PaperExchange::new(feed.clone(), dec!(1000)));
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.json")).unwrap();

        Harness {
            trader: Trader::new(&config, exchange.clone(), feed, store),
            exchange,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_flat_account_opens_through_initial_reset() {
        let mut h = harness();

        // Flat symbols still carry the venue's default leverage
        let outcome = h.trader.run_cycle().await.unwrap();
        let CycleOutcome::LeverageReset(report) = outcome else {
            panic!("expected leverage reset");
        };
        assert_eq!(report.plan.as_ref().unwrap().mode, RestoreMode::Initial);
        assert_eq!(report.fills().count(), 3);
        let state = h.exchange.get_state().await;
        assert_eq!(state.positions.len(), 3);
        assert!(state.positions.keys().all(|s| state.leverage[s] == 3));

        // Opened at the configured leverage and ratio, nothing left to do
        let outcome = h.trader.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::NoAction(_)));

        let ledger = h.trader.store().ledger();
        assert_eq!(ledger.nav_history.len(), 2);
        assert_eq!(ledger.rebalance_events.len(), 1);
        assert_eq!(ledger.commission_history.len(), 3);
        assert_eq!(h.trader.monitor().summary().compliance_runs, 1);
    }

    #[tokio::test]
    async fn test_reset_records_nav_after_its_fills() {
        let mut h = harness();
        h.trader.run_cycle().await.unwrap();

        let ledger = h.trader.store().ledger();
        let recorded = ledger.nav_history[0].nav;
        // Flat start at 1000: only the opening fees moved NAV
        assert!(recorded < dec!(1000));
        let summary = h.exchange.get_account_summary().await.unwrap();
        assert_eq!(recorded, summary.account_value);
        assert_eq!(ledger.commission_history[2].nav_after_commission, recorded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_request_waits_for_running_protocol() {
        // Default settlement delays: 3 s, 2 s, 1 s
        let mut h = harness_with(Config::default());
        h.exchange.seed_position("BTC", dec!(0.01), dec!(60000)).await;
        h.exchange.seed_position("ZK", dec!(-2000), dec!(0.15)).await;

        let running = Arc::new(AtomicBool::new(true));
        let stopper = running.clone();
        tokio::join!(h.trader.run_loop(running.clone()), async move {
            // Lands in the settlement wait after CLOSE_ALL
            tokio::time::sleep(Duration::from_secs(1)).await;
            stopper.store(false, Ordering::SeqCst);
        });

        let summary = h.trader.monitor().summary();
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.failed_cycles, 0);
        assert_eq!(summary.compliance_runs, 1);

        let state = h.exchange.get_state().await;
        assert_eq!(state.positions.len(), 2);
        assert!(["BTC", "ZK", "STRK"].iter().all(|s| state.leverage[*s] == 3));
        assert_eq!(h.trader.store().ledger().rebalance_events[0]["status"], "completed");
    }

    #[tokio::test]
    async fn test_protocol_failure_needs_operator() {
        let mut h = harness();
        h.exchange.seed_position("BTC", dec!(0.01), dec!(60000)).await;
        h.exchange.fail_leverage_for("ZK").await;

        let err = h.trader.run_cycle().await.unwrap_err();
        assert!(matches!(
            err,
            CycleError::ComplianceFailed {
                stage: ProtocolStage::SetLeverage
            }
        ));
        assert!(err.requires_manual_intervention());

        // The close that did happen is on the ledger
        let ledger = h.trader.store().ledger();
        assert_eq!(ledger.commission_history.len(), 1);
        assert_eq!(ledger.rebalance_events[0]["failed_stage"], "SET_LEVERAGE");
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_not_fatal() {
        let mut h = harness();
        h.exchange.fail_account_reads(true).await;

        let err = h.trader.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::Snapshot(_)));
        assert!(!err.requires_manual_intervention());
        assert!(h.trader.store().ledger().nav_history.is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_survives_failures_and_stops() {
        let mut h = harness();
        h.exchange.fail_account_reads(true).await;
        let mut trader = h.trader.with_cycle_interval(Duration::from_millis(10));

        let running = Arc::new(AtomicBool::new(true));
        let stopper = running.clone();
        tokio::join!(trader.run_loop(running.clone()), async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            stopper.store(false, Ordering::SeqCst);
        });

        let summary = trader.monitor().summary();
        assert!(summary.cycles >= 2);
        assert_eq!(summary.failed_cycles, summary.cycles);
    }

    #[tokio::test]
    async fn test_stopped_flag_skips_cycles() {
        let mut h = harness();
        let running = Arc::new(AtomicBool::new(false));
        h.trader.run_loop(running).await;
        assert_eq!(h.trader.monitor().summary().cycles, 0);
        assert!(h.exchange.get_open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_all_and_force_rebalance() {
        let mut h = harness();

        let report = h.trader.force_rebalance().await.unwrap();
        assert_eq!(report.fill_count(), 3);

        let closed = h.trader.close_all_positions().await.unwrap();
        assert_eq!(closed.orders.len(), 3);
        assert!(closed.failures.is_empty());
        assert!(h.exchange.get_open_positions().await.unwrap().is_empty());
        assert!(h.trader.store().open_positions().is_empty());
        assert_eq!(h.trader.store().ledger().commission_history.len(), 6);
    }

    #[tokio::test]
    async fn test_portfolio_status_and_manual_reset() {
        let mut h = harness();
        h.exchange.seed_position("BTC", dec!(0.01), dec!(60000)).await;
        h.exchange.seed_position("ZK", dec!(-2000), dec!(0.15)).await;

        let status = h.trader.portfolio_status().await.unwrap();
        assert!(!status.compliance.is_compliant());
        assert_eq!(status.state.core_value_usd, dec!(600));

        let report = h.trader.enforce_leverage().await.unwrap();
        assert_eq!(report.completed_stages.len(), 4);
        assert!(h.trader.portfolio_status().await.unwrap().compliance.is_compliant());
    }
}
