//! Rebalance decision engine.
//!
//! Pure function of a [`PortfolioState`] and [`TargetParams`]; no I/O.

use rust_decimal::Decimal;
use serde::Serialize;

use super::snapshot::PortfolioState;
use crate::config::TargetParams;

/// Outcome of comparing the current ratio to the target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceDecision {
    pub should_rebalance: bool,
    pub target_core_usd: Decimal,
    pub target_hedge_usd: Decimal,
    pub current_core_usd: Decimal,
    pub current_hedge_usd: Decimal,
    pub current_ratio: Decimal,
    /// |ratio - target| / target, as a fraction
    pub deviation_percent: Decimal,
    pub reason: String,
}

impl RebalanceDecision {
    /// Same targets, with execution forced regardless of deviation.
    pub fn forced(mut self) -> Self {
        self.should_rebalance = true;
        self.reason = format!("forced ({})", self.reason);
        self
    }
}

/// Split of tradable NAV between the two sides.
pub fn target_allocation(tradable: Decimal, ratio_target: Decimal) -> (Decimal, Decimal) {
    if ratio_target <= Decimal::ZERO {
        return (Decimal::ZERO, tradable);
    }
    let core = tradable * ratio_target / (ratio_target + Decimal::ONE);
    // Derived by subtraction so the two sides always sum to tradable
    (core, tradable - core)
}

/// Relative distance of `ratio` from `target`; zero for a non-positive target.
pub fn deviation(ratio: Decimal, target: Decimal) -> Decimal {
    if target <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (ratio - target).abs() / target
}

pub struct RebalanceEngine<'a> {
    params: &'a TargetParams,
}

impl<'a> RebalanceEngine<'a> {
    pub fn new(params: &'a TargetParams) -> Self {
        Self { params }
    }

    pub fn decide(&self, state: &PortfolioState) -> RebalanceDecision {
        let tradable = self.params.tradable(state.nav);
        let (target_core_usd, target_hedge_usd) =
            target_allocation(tradable, self.params.ratio_target);

        let deviation_percent = deviation(state.position_ratio, self.params.ratio_target);
        let should_rebalance = deviation_percent > self.params.rebalance_threshold;

        let reason = if !should_rebalance {
            "within threshold".to_string()
        } else if state.position_ratio > self.params.ratio_target {
            "ratio too high".to_string()
        } else {
            "ratio too low".to_string()
        };

        RebalanceDecision {
            should_rebalance,
            target_core_usd,
            target_hedge_usd,
            current_core_usd: state.core_value_usd,
            current_hedge_usd: state.hedge_value_usd,
            current_ratio: state.position_ratio,
            deviation_percent,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exchange::AccountSummary;
    use crate::strategy::snapshot::RATIO_SENTINEL;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn flat_state(nav: Decimal) -> PortfolioState {
        let params = Config::default().target_params();
        let summary = AccountSummary {
            account_value: nav,
            total_margin_used: Decimal::ZERO,
            withdrawable: nav,
        };
        PortfolioState::from_parts(&params, &summary, &[], HashMap::new())
    }

    #[test]
    fn test_flat_account_scenario() {
        let params = Config::default().target_params();
        let state = flat_state(dec!(1000));
        assert_eq!(state.position_ratio, RATIO_SENTINEL);

        let decision = RebalanceEngine::new(&params).decide(&state);
        assert!(decision.should_rebalance);
        assert_eq!(decision.target_core_usd.round_dp(2), dec!(633.33));
        assert_eq!(decision.target_hedge_usd.round_dp(2), dec!(316.67));
        assert_eq!(decision.target_core_usd + decision.target_hedge_usd, dec!(950));
        assert_eq!(decision.reason, "ratio too high");
    }

    #[test]
    fn test_targets_sum_to_tradable() {
        for (tradable, ratio) in [
            (dec!(950), dec!(2)),
            (dec!(123.45), dec!(3)),
            (dec!(1000), dec!(0.7)),
            (Decimal::ZERO, dec!(1.5)),
        ] {
            let (core, hedge) = target_allocation(tradable, ratio);
            assert_eq!(core + hedge, tradable);
        }
    }

    #[test]
    fn test_boundary_deviation_does_not_rebalance() {
        let params = Config::default().target_params();
        let mut state = flat_state(dec!(1000));

        // |2.2 - 2.0| / 2.0 == 0.1 == threshold
        state.position_ratio = dec!(2.2);
        let decision = RebalanceEngine::new(&params).decide(&state);
        assert_eq!(decision.deviation_percent, dec!(0.1));
        assert!(!decision.should_rebalance);

        state.position_ratio = dec!(2.21);
        assert!(RebalanceEngine::new(&params).decide(&state).should_rebalance);

        state.position_ratio = dec!(1.7);
        let decision = RebalanceEngine::new(&params).decide(&state);
        assert!(decision.should_rebalance);
        assert_eq!(decision.reason, "ratio too low");
    }

    #[test]
    fn test_decision_matches_threshold_comparison() {
        let params = Config::default().target_params();
        let mut state = flat_state(dec!(500));
        for ratio in [dec!(0), dec!(1.5), dec!(1.8), dec!(1.81), dec!(2), dec!(2.19), dec!(3), RATIO_SENTINEL] {
            state.position_ratio = ratio;
            let decision = RebalanceEngine::new(&params).decide(&state);
            assert_eq!(
                decision.should_rebalance,
                decision.deviation_percent > params.rebalance_threshold
            );
        }
    }

    #[test]
    fn test_non_positive_target_never_rebalances() {
        assert_eq!(deviation(dec!(999), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(deviation(dec!(3), dec!(-1)), Decimal::ZERO);
    }

    #[test]
    fn test_forced_decision() {
        let params = Config::default().target_params();
        let mut state = flat_state(dec!(1000));
        state.position_ratio = dec!(2);
        let decision = RebalanceEngine::new(&params).decide(&state).forced();
        assert!(decision.should_rebalance);
        assert!(decision.reason.starts_with("forced"));
    }
}
