//! Runtime performance tracking.
//!
//! Latency and success rate per operation, NAV-based PnL with drawdown, and
//! counters for cycles, orders and rebalances. Operations are timed with an
//! [`OperationTimer`] guard that records on every exit path.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::utils::{percentage_change, safe_div};

/// Latency samples kept per operation.
const RECENT_SAMPLES: usize = 100;

/// Print a summary every this many cycles.
pub const SUMMARY_EVERY_CYCLES: u64 = 10;

/// Latency and outcome statistics for one named operation.
#[derive(Debug, Clone, Default)]
pub struct OperationStats {
    pub calls: u64,
    pub failures: u64,
    pub total: Duration,
    pub min: Option<Duration>,
    pub max: Duration,
    recent: VecDeque<Duration>,
}

impl OperationStats {
    fn record(&mut self, elapsed: Duration, success: bool) {
        self.calls += 1;
        if !success {
            self.failures += 1;
        }
        self.total += elapsed;
        self.min = Some(self.min.map_or(elapsed, |m| m.min(elapsed)));
        self.max = self.max.max(elapsed);
        self.recent.push_back(elapsed);
        while self.recent.len() > RECENT_SAMPLES {
            self.recent.pop_front();
        }
    }

    pub fn average(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        self.total / self.calls as u32
    }

    /// Average over the most recent samples.
    pub fn recent_average(&self) -> Duration {
        if self.recent.is_empty() {
            return Duration::ZERO;
        }
        self.recent.iter().sum::<Duration>() / self.recent.len() as u32
    }

    /// Fraction of calls that succeeded (1.0 when never called).
    pub fn success_rate(&self) -> Decimal {
        if self.calls == 0 {
            return Decimal::ONE;
        }
        Decimal::from(self.calls - self.failures) / Decimal::from(self.calls)
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    operations: BTreeMap<String, OperationStats>,
    start_nav: Option<Decimal>,
    current_nav: Option<Decimal>,
    peak_nav: Decimal,
    max_drawdown: Decimal,
    cycles: u64,
    failed_cycles: u64,
    orders_filled: u64,
    orders_failed: u64,
    rebalances: u64,
    compliance_runs: u64,
}

/// Point-in-time view of the monitor.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub cycles: u64,
    pub failed_cycles: u64,
    pub orders_filled: u64,
    pub orders_failed: u64,
    pub rebalances: u64,
    pub compliance_runs: u64,
    pub start_nav: Option<Decimal>,
    pub current_nav: Option<Decimal>,
    pub pnl: Decimal,
    pub pnl_percent: Decimal,
    /// Worst peak-to-trough NAV decline (0.0-1.0)
    pub max_drawdown: Decimal,
}

/// Thread-safe performance monitor.
#[derive(Debug)]
pub struct PerformanceMonitor {
    started_at: DateTime<Utc>,
    started: Instant,
    state: Mutex<MonitorState>,
}

impl PerformanceMonitor {
    pub fn new(start_nav: Option<Decimal>) -> Self {
        let state = MonitorState {
            start_nav,
            peak_nav: start_nav.unwrap_or_default(),
            ..MonitorState::default()
        };
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start timing `operation`; the returned guard records on drop.
    pub fn start(&self, operation: &str) -> OperationTimer<'_> {
        OperationTimer {
            monitor: self,
            operation: operation.to_string(),
            started: Instant::now(),
            success: false,
        }
    }

    pub fn record_operation(&self, operation: &str, elapsed: Duration, success: bool) {
        self.lock()
            .operations
            .entry(operation.to_string())
            .or_default()
            .record(elapsed, success);
    }

    pub fn operation(&self, operation: &str) -> Option<OperationStats> {
        self.lock().operations.get(operation).cloned()
    }

    /// Record the latest NAV; the first reading becomes the baseline when none was configured.
    pub fn record_nav(&self, nav: Decimal) {
        let mut state = self.lock();
        if state.start_nav.is_none() {
            state.start_nav = Some(nav);
        }
        state.current_nav = Some(nav);
        if nav > state.peak_nav {
            state.peak_nav = nav;
        } else if state.peak_nav > Decimal::ZERO {
            let drawdown = (state.peak_nav - nav) / state.peak_nav;
            if drawdown > state.max_drawdown {
                state.max_drawdown = drawdown;
                warn!(
                    drawdown = %drawdown.round_dp(4),
                    peak = %state.peak_nav,
                    current = %nav,
                    "New maximum drawdown recorded"
                );
            }
        }
    }

    /// Count a finished cycle. Returns true when a periodic summary is due.
    pub fn record_cycle(&self, success: bool) -> bool {
        let mut state = self.lock();
        state.cycles += 1;
        if !success {
            state.failed_cycles += 1;
        }
        state.cycles % SUMMARY_EVERY_CYCLES == 0
    }

    pub fn record_orders(&self, filled: usize, failed: usize) {
        let mut state = self.lock();
        state.orders_filled += filled as u64;
        state.orders_failed += failed as u64;
    }

    pub fn record_rebalance(&self) {
        self.lock().rebalances += 1;
    }

    pub fn record_compliance_run(&self) {
        self.lock().compliance_runs += 1;
    }

    pub fn summary(&self) -> PerformanceSummary {
        let state = self.lock();
        let (pnl, pnl_percent) = match (state.start_nav, state.current_nav) {
            (Some(start), Some(current)) => (current - start, percentage_change(current, start)),
            _ => (Decimal::ZERO, Decimal::ZERO),
        };
        PerformanceSummary {
            started_at: self.started_at,
            uptime_secs: self.started.elapsed().as_secs(),
            cycles: state.cycles,
            failed_cycles: state.failed_cycles,
            orders_filled: state.orders_filled,
            orders_failed: state.orders_failed,
            rebalances: state.rebalances,
            compliance_runs: state.compliance_runs,
            start_nav: state.start_nav,
            current_nav: state.current_nav,
            pnl,
            pnl_percent,
            max_drawdown: state.max_drawdown,
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        let cycle_success = safe_div(
            Decimal::from(summary.cycles - summary.failed_cycles),
            Decimal::from(summary.cycles),
        );

        info!(
            uptime_secs = summary.uptime_secs,
            cycles = summary.cycles,
            cycle_success = %cycle_success.round_dp(3),
            orders_filled = summary.orders_filled,
            orders_failed = summary.orders_failed,
            rebalances = summary.rebalances,
            compliance_runs = summary.compliance_runs,
            pnl = %summary.pnl.round_dp(2),
            pnl_percent = %summary.pnl_percent.round_dp(2),
            max_drawdown = %summary.max_drawdown.round_dp(4),
            "Performance summary"
        );

        for (name, stats) in self.lock().operations.iter() {
            info!(
                operation = %name,
                calls = stats.calls,
                success_rate = %stats.success_rate().round_dp(3),
                avg_ms = stats.average().as_millis() as u64,
                recent_avg_ms = stats.recent_average().as_millis() as u64,
                min_ms = stats.min.unwrap_or_default().as_millis() as u64,
                max_ms = stats.max.as_millis() as u64,
                "Operation latency"
            );
        }
    }
}

/// Scoped timing of one operation.
///
/// Dropping the guard records the elapsed time; the call counts as failed
/// unless [`OperationTimer::succeed`] was called first.
pub struct OperationTimer<'a> {
    monitor: &'a PerformanceMonitor,
    operation: String,
    started: Instant,
    success: bool,
}

impl OperationTimer<'_> {
    pub fn succeed(mut self) {
        self.success = true;
    }
}

impl Drop for OperationTimer<'_> {
    fn drop(&mut self) {
        self.monitor
            .record_operation(&self.operation, self.started.elapsed(), self.success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_timer_records_failure_unless_succeeded() {
        let monitor = PerformanceMonitor::new(None);

        monitor.start("snapshot").succeed();
        {
            let _timer = monitor.start("snapshot");
            // Dropped without succeed(), e.g. on an early `?` return
        }

        let stats = monitor.operation("snapshot").unwrap();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.success_rate(), dec!(0.5));
        assert!(stats.min.is_some());
    }

    #[test]
    fn test_recent_window_is_bounded() {
        let mut stats = OperationStats::default();
        for i in 0..150u64 {
            stats.record(Duration::from_millis(i), true);
        }
        assert_eq!(stats.calls, 150);
        assert_eq!(stats.recent.len(), RECENT_SAMPLES);
        assert_eq!(stats.max, Duration::from_millis(149));
        assert_eq!(stats.min, Some(Duration::ZERO));
        // Recent window covers 50..150
        assert_eq!(stats.recent_average(), Duration::from_micros(99_500));
    }

    #[test]
    fn test_pnl_and_drawdown() {
        let monitor = PerformanceMonitor::new(Some(dec!(1000)));
        monitor.record_nav(dec!(1100));
        monitor.record_nav(dec!(990));
        monitor.record_nav(dec!(1050));

        let summary = monitor.summary();
        assert_eq!(summary.pnl, dec!(50));
        assert_eq!(summary.pnl_percent, dec!(5));
        assert_eq!(summary.max_drawdown, dec!(0.1));
    }

    #[test]
    fn test_first_nav_is_baseline_without_start() {
        let monitor = PerformanceMonitor::new(None);
        monitor.record_nav(dec!(500));
        monitor.record_nav(dec!(510));
        assert_eq!(monitor.summary().start_nav, Some(dec!(500)));
        assert_eq!(monitor.summary().pnl, dec!(10));
    }

    #[test]
    fn test_summary_due_every_ten_cycles() {
        let monitor = PerformanceMonitor::new(None);
        let due: Vec<bool> = (0..20).map(|i| monitor.record_cycle(i % 3 != 0)).collect();
        assert_eq!(due.iter().filter(|d| **d).count(), 2);
        assert!(due[9] && due[19]);
        assert_eq!(monitor.summary().failed_cycles, 7);
    }
}
