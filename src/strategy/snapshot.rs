//! Portfolio snapshot built from raw venue state.
//!
//! Margin is split per side by summing `margin_used` of every open position:
//! the core symbol feeds the core side, configured hedge symbols feed the hedge
//! side, anything else is ignored.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::config::TargetParams;
use crate::error::GatewayError;
use crate::exchange::{AccountReader, AccountSummary, OpenPosition, PriceFeed};
use crate::utils::safe_div;

/// Ratio reported when no hedge margin is posted.
pub const RATIO_SENTINEL: Decimal = dec!(999);

/// Normalized portfolio state, rebuilt every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioState {
    pub nav: Decimal,
    /// Signed core quantity
    pub core_position: Decimal,
    /// Signed quantity per configured hedge symbol (zero when flat)
    pub hedge_positions: BTreeMap<String, Decimal>,
    pub core_value_usd: Decimal,
    /// Sum of absolute hedge values
    pub hedge_value_usd: Decimal,
    /// Absolute USD value per hedge symbol
    pub hedge_values: BTreeMap<String, Decimal>,
    pub core_margin: Decimal,
    pub hedge_margin: Decimal,
    pub margin_used: Decimal,
    pub position_ratio: Decimal,
    pub margin_usage_percent: Decimal,
    pub available_balance: Decimal,
    /// Prices used for valuation
    pub prices: HashMap<String, Decimal>,
}

impl PortfolioState {
    /// Assemble a snapshot from already-fetched venue data.
    pub fn from_parts(
        params: &TargetParams,
        summary: &AccountSummary,
        positions: &[OpenPosition],
        prices: HashMap<String, Decimal>,
    ) -> Self {
        let mut core_position = Decimal::ZERO;
        let mut core_margin = Decimal::ZERO;
        let mut hedge_margin = Decimal::ZERO;
        let mut hedge_positions: BTreeMap<String, Decimal> = params
            .hedge_symbols
            .iter()
            .map(|s| (s.clone(), Decimal::ZERO))
            .collect();

        for position in positions {
            if position.symbol == params.core_symbol {
                core_position += position.size;
                core_margin += position.margin_used;
            } else if let Some(size) = hedge_positions.get_mut(&position.symbol) {
                *size += position.size;
                hedge_margin += position.margin_used;
            } else {
                debug!(symbol = %position.symbol, "[SNAPSHOT] Ignoring untracked position");
            }
        }

        let value_of = |symbol: &str, size: Decimal| -> Decimal {
            match prices.get(symbol) {
                Some(price) => size.abs() * price,
                None => {
                    if !size.is_zero() {
                        warn!(%symbol, "[SNAPSHOT] No price for open position, valuing at 0");
                    }
                    Decimal::ZERO
                }
            }
        };

        let core_value_usd = value_of(&params.core_symbol, core_position);
        let hedge_values: BTreeMap<String, Decimal> = hedge_positions
            .iter()
            .map(|(symbol, size)| (symbol.clone(), value_of(symbol, *size)))
            .collect();
        let hedge_value_usd = hedge_values.values().copied().sum();

        let position_ratio = if hedge_margin.is_zero() {
            RATIO_SENTINEL
        } else {
            core_margin / hedge_margin
        };

        let nav = summary.account_value;
        let margin_used = summary.total_margin_used;

        Self {
            nav,
            core_position,
            hedge_positions,
            core_value_usd,
            hedge_value_usd,
            hedge_values,
            core_margin,
            hedge_margin,
            margin_used,
            position_ratio,
            margin_usage_percent: safe_div(margin_used, nav) * dec!(100),
            available_balance: nav - margin_used,
            prices,
        }
    }

    /// Current USD value held in one hedge symbol.
    pub fn hedge_value(&self, symbol: &str) -> Decimal {
        self.hedge_values.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }

    pub fn has_hedge_exposure(&self) -> bool {
        self.hedge_positions.values().any(|s| !s.is_zero())
    }
}

/// Reads venue state and prices into a [`PortfolioState`].
pub struct SnapshotBuilder<'a> {
    params: &'a TargetParams,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(params: &'a TargetParams) -> Self {
        Self { params }
    }

    /// Build a snapshot; any failed read is returned to the caller unchanged.
    pub async fn build<A, P>(&self, account: &A, feed: &P) -> Result<PortfolioState, GatewayError>
    where
        A: AccountReader + ?Sized,
        P: PriceFeed + ?Sized,
    {
        let summary = account.get_account_summary().await?;
        let positions = account.get_open_positions().await?;
        let prices = feed.get_prices(&self.params.tracked_symbols()).await?;

        let state = PortfolioState::from_parts(self.params, &summary, &positions, prices);

        debug!(
            nav = %state.nav,
            core_margin = %state.core_margin,
            hedge_margin = %state.hedge_margin,
            ratio = %state.position_ratio,
            "[SNAPSHOT] Portfolio state built"
        );

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exchange::{PaperExchange, StaticPriceFeed};
    use std::sync::Arc;

    fn position(symbol: &str, size: Decimal, margin: Decimal) -> OpenPosition {
        OpenPosition {
            symbol: symbol.to_string(),
            size,
            entry_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            margin_used: margin,
            leverage: dec!(3),
        }
    }

    fn summary(nav: Decimal, used: Decimal) -> AccountSummary {
        AccountSummary {
            account_value: nav,
            total_margin_used: used,
            withdrawable: nav - used,
        }
    }

    #[test]
    fn test_margin_split_per_side() {
        let params = Config::default().target_params();
        let positions = vec![
            position("BTC", dec!(0.01), dec!(200)),
            position("ZK", dec!(-1000), dec!(60)),
            position("STRK", dec!(-500), dec!(40)),
            position("ETH", dec!(1), dec!(500)),
        ];
        let prices = HashMap::from([
            ("BTC".to_string(), dec!(60000)),
            ("ZK".to_string(), dec!(0.15)),
            ("STRK".to_string(), dec!(0.4)),
        ]);

        let state = PortfolioState::from_parts(&params, &summary(dec!(1000), dec!(800)), &positions, prices);

        assert_eq!(state.core_margin, dec!(200));
        assert_eq!(state.hedge_margin, dec!(100));
        assert_eq!(state.position_ratio, dec!(2));
        assert_eq!(state.core_value_usd, dec!(600));
        assert_eq!(state.hedge_value("ZK"), dec!(150));
        assert_eq!(state.hedge_value_usd, dec!(350));
        assert_eq!(state.hedge_positions["STRK"], dec!(-500));
        assert_eq!(state.margin_usage_percent, dec!(80));
        assert_eq!(state.available_balance, dec!(200));
    }

    #[test]
    fn test_sentinel_ratio_without_hedge_margin() {
        let params = Config::default().target_params();
        let positions = vec![position("BTC", dec!(0.01), dec!(200))];
        let state = PortfolioState::from_parts(&params, &summary(dec!(1000), dec!(200)), &positions, HashMap::new());

        assert_eq!(state.position_ratio, RATIO_SENTINEL);
        assert!(!state.has_hedge_exposure());
        assert_eq!(state.hedge_positions.len(), 2);
    }

    #[test]
    fn test_zero_nav_usage_is_zero() {
        let params = Config::default().target_params();
        let state = PortfolioState::from_parts(&params, &AccountSummary::default(), &[], HashMap::new());
        assert_eq!(state.margin_usage_percent, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_build_fails_closed() {
        let params = Config::default().target_params();
        let feed = Arc::new(StaticPriceFeed::new(&[("BTC", dec!(60000))]));
        let exchange = PaperExchange::new(feed.clone(), dec!(1000));
        exchange.fail_account_reads(true).await;

        let result = SnapshotBuilder::new(&params).build(&exchange, &*feed).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_build_from_paper_venue() {
        let params = Config::default().target_params();
        let feed = Arc::new(StaticPriceFeed::new(&[
            ("BTC", dec!(60000)),
            ("ZK", dec!(0.15)),
            ("STRK", dec!(0.4)),
        ]));
        let exchange = PaperExchange::new(feed.clone(), dec!(1000));
        exchange.seed_position("BTC", dec!(0.01), dec!(60000)).await;

        let state = SnapshotBuilder::new(&params).build(&exchange, &*feed).await.unwrap();
        assert_eq!(state.nav, dec!(1000));
        assert_eq!(state.core_position, dec!(0.01));
        // 600 notional at the default 20x leverage
        assert_eq!(state.core_margin, dec!(30));
        assert_eq!(state.position_ratio, RATIO_SENTINEL);
    }
}
