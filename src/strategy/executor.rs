//! Applies a rebalance decision as market orders.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, warn};

use super::decision::RebalanceDecision;
use super::sizing::OrderSizer;
use super::snapshot::PortfolioState;
use crate::config::TargetParams;
use crate::exchange::{OrderGateway, OrderResult, OrderSide};

/// Core adjustments smaller than this are not traded.
pub const MIN_CORE_TRADE_USD: Decimal = dec!(5);

/// Per-symbol hedge adjustments smaller than this are not traded.
pub const MIN_HEDGE_TRADE_USD: Decimal = dec!(2);

/// One submitted order and its venue result.
#[derive(Debug, Clone)]
pub struct ExecutedOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub size: Decimal,
    /// Reference price the size was derived from
    pub price: Decimal,
    pub result: OrderResult,
}

impl ExecutedOrder {
    pub fn filled(&self) -> bool {
        self.result.success
    }

    /// Price the order actually filled at, falling back to the reference price.
    pub fn fill_price(&self) -> Decimal {
        if self.result.avg_price > Decimal::ZERO {
            self.result.avg_price
        } else {
            self.price
        }
    }
}

/// Outcome of one execution pass.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// False if any order failed or a required price was missing
    pub success: bool,
    pub orders: Vec<ExecutedOrder>,
    /// Symbols not traded, with the reason
    pub skipped: Vec<(String, String)>,
    pub failures: Vec<String>,
}

impl ExecutionReport {
    fn new() -> Self {
        Self {
            success: true,
            orders: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, message: String) {
        self.success = false;
        self.failures.push(message);
    }

    pub fn fills(&self) -> impl Iterator<Item = &ExecutedOrder> {
        self.orders.iter().filter(|o| o.filled())
    }

    pub fn fill_count(&self) -> usize {
        self.fills().count()
    }
}

pub struct RebalanceExecutor<'a> {
    params: &'a TargetParams,
    sizer: &'a OrderSizer,
}

impl<'a> RebalanceExecutor<'a> {
    pub fn new(params: &'a TargetParams, sizer: &'a OrderSizer) -> Self {
        Self { params, sizer }
    }

    /// Submit the orders moving each side toward its target.
    ///
    /// Orders are independent: a failure is recorded and the remaining orders
    /// are still submitted. Nothing is rolled back.
    pub async fn execute<G>(
        &self,
        gateway: &G,
        decision: &RebalanceDecision,
        state: &PortfolioState,
    ) -> ExecutionReport
    where
        G: OrderGateway + ?Sized,
    {
        let mut report = ExecutionReport::new();
        if !decision.should_rebalance {
            return report;
        }

        info!(
            reason = %decision.reason,
            ratio = %decision.current_ratio.round_dp(3),
            deviation = %decision.deviation_percent.round_dp(4),
            target_core = %decision.target_core_usd.round_dp(2),
            target_hedge = %decision.target_hedge_usd.round_dp(2),
            "[REBALANCE] Executing rebalance"
        );

        self.execute_core(gateway, decision, state, &mut report).await;
        self.execute_hedges(gateway, decision, state, &mut report).await;

        if report.success {
            info!(orders = report.orders.len(), "[REBALANCE] Execution complete");
        } else {
            error!(
                orders = report.orders.len(),
                failures = report.failures.len(),
                "[REBALANCE] Execution finished with failures"
            );
        }
        report
    }

    async fn execute_core<G>(
        &self,
        gateway: &G,
        decision: &RebalanceDecision,
        state: &PortfolioState,
        report: &mut ExecutionReport,
    ) where
        G: OrderGateway + ?Sized,
    {
        let symbol = &self.params.core_symbol;
        let diff = decision.target_core_usd - state.core_value_usd;
        if diff.abs() < MIN_CORE_TRADE_USD {
            report
                .skipped
                .push((symbol.clone(), format!("adjustment ${} below minimum", diff.round_dp(2))));
            return;
        }

        let Some(price) = state.price(symbol).filter(|p| *p > Decimal::ZERO) else {
            error!(%symbol, "[REBALANCE] No core price, cannot size order");
            report.fail(format!("no price for core symbol {}", symbol));
            return;
        };

        let side = OrderSide::from_is_buy(diff > Decimal::ZERO);
        self.submit(gateway, symbol, side, diff.abs() / price, price, report)
            .await;
    }

    async fn execute_hedges<G>(
        &self,
        gateway: &G,
        decision: &RebalanceDecision,
        state: &PortfolioState,
        report: &mut ExecutionReport,
    ) where
        G: OrderGateway + ?Sized,
    {
        let hedges = &self.params.hedge_symbols;
        if hedges.is_empty() {
            return;
        }
        let per_symbol = decision.target_hedge_usd / Decimal::from(hedges.len());

        for symbol in hedges {
            let diff = per_symbol - state.hedge_value(symbol);
            if diff.abs() < MIN_HEDGE_TRADE_USD {
                report
                    .skipped
                    .push((symbol.clone(), format!("adjustment ${} below minimum", diff.round_dp(2))));
                continue;
            }

            let Some(price) = state.price(symbol).filter(|p| *p > Decimal::ZERO) else {
                warn!(%symbol, "[REBALANCE] No hedge price, skipping symbol");
                report.skipped.push((symbol.clone(), "no price".to_string()));
                continue;
            };

            // Hedges are short: selling grows the hedge, buying shrinks it
            let side = OrderSide::from_is_buy(diff < Decimal::ZERO);
            self.submit(gateway, symbol, side, diff.abs() / price, price, report)
                .await;
        }
    }

    async fn submit<G>(
        &self,
        gateway: &G,
        symbol: &str,
        side: OrderSide,
        requested: Decimal,
        price: Decimal,
        report: &mut ExecutionReport,
    ) where
        G: OrderGateway + ?Sized,
    {
        let check = self.sizer.validate(symbol, requested);
        if !check.ok {
            warn!(%symbol, reason = %check.reason_text(), "[ORDER] Size rejected, skipping order");
            report
                .skipped
                .push((symbol.to_string(), check.reason_text().to_string()));
            return;
        }

        let result = gateway
            .place_market_order(symbol, side.is_buy(), check.size, price)
            .await;

        if result.success {
            info!(
                %symbol,
                side = %side,
                size = %check.size,
                avg_price = %result.avg_price,
                order_id = ?result.order_id,
                "[ORDER] Filled"
            );
        } else {
            error!(%symbol, side = %side, size = %check.size, error = %result.error_text(), "[ORDER] Failed");
            report.fail(format!("{} {} {}: {}", side, check.size, symbol, result.error_text()));
        }

        report.orders.push(ExecutedOrder {
            symbol: symbol.to_string(),
            side,
            size: check.size,
            price,
            result,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exchange::{AccountReader, AssetMetaSource, PaperExchange, StaticPriceFeed};
    use crate::strategy::decision::RebalanceEngine;
    use crate::strategy::snapshot::SnapshotBuilder;
    use std::sync::Arc;

    async fn setup() -> (Arc<StaticPriceFeed>, PaperExchange<Arc<StaticPriceFeed>>, OrderSizer) {
        let feed = Arc::new(StaticPriceFeed::new(&[
            ("BTC", dec!(60000)),
            ("ZK", dec!(0.15)),
            ("STRK", dec!(0.4)),
        ]));
        let exchange = PaperExchange::new(feed.clone(), dec!(1000));
        let sizer = OrderSizer::new(feed.get_asset_meta().await.unwrap());
        (feed, exchange, sizer)
    }

    #[tokio::test]
    async fn test_flat_account_opens_both_sides() {
        let params = Config::default().target_params();
        let (feed, exchange, sizer) = setup().await;

        let state = SnapshotBuilder::new(&params).build(&exchange, &*feed).await.unwrap();
        let decision = RebalanceEngine::new(&params).decide(&state);
        let report = RebalanceExecutor::new(&params, &sizer)
            .execute(&exchange, &decision, &state)
            .await;

        assert!(report.success);
        assert_eq!(report.orders.len(), 3);
        assert_eq!(report.orders[0].symbol, "BTC");
        assert_eq!(report.orders[0].side, OrderSide::Buy);
        assert!(report.orders[1..].iter().all(|o| o.side == OrderSide::Sell));

        // Hedge target split evenly: ~158.33 per symbol
        let zk_usd = report.orders[1].size * dec!(0.15);
        let strk_usd = report.orders[2].size * dec!(0.4);
        assert!((zk_usd - strk_usd).abs() < dec!(0.01));

        let positions = exchange.get_open_positions().await.unwrap();
        assert_eq!(positions.len(), 3);
    }

    #[tokio::test]
    async fn test_hedge_failure_keeps_core_fill() {
        let params = Config::default().target_params();
        let (feed, exchange, sizer) = setup().await;
        exchange.fail_orders_for("ZK").await;

        let state = SnapshotBuilder::new(&params).build(&exchange, &*feed).await.unwrap();
        let decision = RebalanceEngine::new(&params).decide(&state);
        let report = RebalanceExecutor::new(&params, &sizer)
            .execute(&exchange, &decision, &state)
            .await;

        assert!(!report.success);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.fill_count(), 2);

        let symbols: Vec<String> = exchange
            .get_open_positions()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.symbol)
            .collect();
        assert_eq!(symbols, vec!["BTC", "STRK"]);
    }

    #[tokio::test]
    async fn test_oversized_hedge_is_reduced_with_buy() {
        let params = Config::default().target_params();
        let (feed, exchange, sizer) = setup().await;
        exchange.seed_position("ZK", dec!(-2000), dec!(0.15)).await;

        let state = SnapshotBuilder::new(&params).build(&exchange, &*feed).await.unwrap();
        let decision = RebalanceEngine::new(&params).decide(&state);
        let report = RebalanceExecutor::new(&params, &sizer)
            .execute(&exchange, &decision, &state)
            .await;

        let zk = report.orders.iter().find(|o| o.symbol == "ZK").unwrap();
        assert_eq!(zk.side, OrderSide::Buy);
        assert!(report.success);
    }

    #[tokio::test]
    async fn test_missing_prices() {
        let params = Config::default().target_params();
        let (feed, exchange, sizer) = setup().await;
        feed.remove_price("STRK");

        let state = SnapshotBuilder::new(&params).build(&exchange, &*feed).await.unwrap();
        let decision = RebalanceEngine::new(&params).decide(&state);
        let report = RebalanceExecutor::new(&params, &sizer)
            .execute(&exchange, &decision, &state)
            .await;
        // Missing hedge price is only a skip
        assert!(report.success);
        assert!(report.skipped.iter().any(|(s, r)| s == "STRK" && r == "no price"));

        let mut no_core = state.clone();
        no_core.prices.remove("BTC");
        let report = RebalanceExecutor::new(&params, &sizer)
            .execute(&exchange, &decision, &no_core)
            .await;
        assert!(!report.success);
    }

    #[tokio::test]
    async fn test_no_orders_when_not_rebalancing() {
        let params = Config::default().target_params();
        let (feed, exchange, sizer) = setup().await;

        let state = SnapshotBuilder::new(&params).build(&exchange, &*feed).await.unwrap();
        let mut decision = RebalanceEngine::new(&params).decide(&state);
        decision.should_rebalance = false;

        let report = RebalanceExecutor::new(&params, &sizer)
            .execute(&exchange, &decision, &state)
            .await;
        assert!(report.success);
        assert!(report.orders.is_empty());
    }
}
