//! Paper venue for mock trading.
//!
//! `PaperExchange` simulates a cross-margin perpetuals account marked to live
//! prices from an injected [`PriceFeed`]. It follows the venue rules the
//! strategy depends on:
//! - `margin_used = |size| * price / leverage` per position
//! - taker fee on every fill
//! - leverage for a symbol cannot change while a position in it is open
//! - funding settles hourly from the feed's funding rates
//!
//! State can be persisted to SQLite through [`PaperStore`] so paper sessions
//! survive restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::traits::{AccountReader, AssetMetaSource, OrderGateway, PriceFeed};
use super::types::*;
use crate::error::GatewayError;
use crate::persistence::paper::{PaperStore, PersistedPaperPosition, PersistedPaperState};

/// Hyperliquid taker fee (0.045%).
pub const DEFAULT_FEE_RATE: Decimal = dec!(0.00045);

/// Leverage a symbol trades at before it is ever set.
pub const DEFAULT_LEVERAGE: u32 = 20;

const HOUR_MS: i64 = 3_600_000;

/// Cap on hourly settlements applied in one catch-up.
const MAX_FUNDING_CATCHUP_HOURS: i64 = 24;

/// Simulated position.
#[derive(Debug, Clone)]
pub struct PaperPosition {
    pub symbol: String,
    /// Signed size (negative = short)
    pub size: Decimal,
    pub entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// Simulated account.
#[derive(Debug, Clone)]
pub struct PaperState {
    pub initial_balance: Decimal,
    /// Cash: deposits + realized PnL + funding - fees
    pub balance: Decimal,
    pub positions: HashMap<String, PaperPosition>,
    pub leverage: HashMap<String, u32>,
    pub total_fees: Decimal,
    pub total_funding: Decimal,
    pub realized_pnl: Decimal,
    pub order_count: u64,
    /// Hour (ms) of the last funding settlement
    pub last_funding_ms: Option<i64>,
    /// Settled funding payments, oldest first
    pub funding_payments: Vec<FundingPayment>,
}

impl PaperState {
    fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            balance: initial_balance,
            positions: HashMap::new(),
            leverage: HashMap::new(),
            total_fees: Decimal::ZERO,
            total_funding: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            order_count: 0,
            last_funding_ms: None,
            funding_payments: Vec::new(),
        }
    }

    fn leverage_for(&self, symbol: &str) -> u32 {
        self.leverage.get(symbol).copied().unwrap_or(DEFAULT_LEVERAGE)
    }

    fn margin_for(&self, position: &PaperPosition, price: Decimal) -> Decimal {
        position.size.abs() * price / Decimal::from(self.leverage_for(&position.symbol))
    }

    fn unrealized_pnl(position: &PaperPosition, price: Decimal) -> Decimal {
        position.size * (price - position.entry_price)
    }

    fn mark(position: &PaperPosition, prices: &HashMap<String, Decimal>) -> Decimal {
        prices
            .get(&position.symbol)
            .copied()
            .unwrap_or(position.entry_price)
    }

    fn account_value(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        self.balance
            + self
                .positions
                .values()
                .map(|p| Self::unrealized_pnl(p, Self::mark(p, prices)))
                .sum::<Decimal>()
    }

    fn total_margin(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        self.positions
            .values()
            .map(|p| self.margin_for(p, Self::mark(p, prices)))
            .sum()
    }

    /// Apply a fill of signed `delta` at `price`, realizing PnL on the reduced part.
    fn apply_fill(&mut self, symbol: &str, delta: Decimal, price: Decimal) -> Decimal {
        let mut realized = Decimal::ZERO;
        let position = self
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| PaperPosition {
                symbol: symbol.to_string(),
                size: Decimal::ZERO,
                entry_price: price,
                opened_at: Utc::now(),
            });

        let old = position.size;
        let new = old + delta;

        if old.is_zero() || old.is_sign_positive() == delta.is_sign_positive() {
            // Opening or adding: weighted average entry
            position.entry_price = if old.is_zero() {
                price
            } else {
                (old.abs() * position.entry_price + delta.abs() * price) / new.abs()
            };
        } else {
            let closed = delta.abs().min(old.abs());
            let direction = if old.is_sign_negative() { -Decimal::ONE } else { Decimal::ONE };
            realized = closed * (price - position.entry_price) * direction;
            if !new.is_zero() && new.is_sign_positive() != old.is_sign_positive() {
                // Flipped through zero: remainder opens at the fill price
                position.entry_price = price;
                position.opened_at = Utc::now();
            }
        }
        position.size = new;

        if new.is_zero() {
            self.positions.remove(symbol);
        }

        self.realized_pnl += realized;
        self.balance += realized;
        realized
    }
}

/// Per-symbol failure hooks for exercising error paths.
#[derive(Debug, Default, Clone)]
pub struct FailureInjection {
    pub orders: HashSet<String>,
    pub closes: HashSet<String>,
    pub leverage: HashSet<String>,
    pub account_reads: bool,
}

/// Paper trading venue implementing the full gateway.
pub struct PaperExchange<F> {
    feed: F,
    state: Arc<RwLock<PaperState>>,
    order_id_counter: AtomicU64,
    fee_rate: Decimal,
    failures: RwLock<FailureInjection>,
    store: Option<Mutex<PaperStore>>,
}

impl<F: PriceFeed> PaperExchange<F> {
    /// Create a paper venue with a fresh account.
    pub fn new(feed: F, initial_balance: Decimal) -> Self {
        Self {
            feed,
            state: Arc::new(RwLock::new(PaperState::new(initial_balance))),
            order_id_counter: AtomicU64::new(1),
            fee_rate: DEFAULT_FEE_RATE,
            failures: RwLock::new(FailureInjection::default()),
            store: None,
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Attach a SQLite store, restoring any previously saved account.
    pub async fn with_store(mut self, store: PaperStore) -> anyhow::Result<Self> {
        if let Some(persisted) = store.load_state()? {
            self.restore_state(persisted).await;
        } else {
            info!("No saved paper state, starting fresh");
        }
        self.store = Some(Mutex::new(store));
        Ok(self)
    }

    fn next_order_id(&self) -> u64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Current simulated account.
    pub async fn get_state(&self) -> PaperState {
        self.state.read().await.clone()
    }

    pub async fn set_failures(&self, failures: FailureInjection) {
        *self.failures.write().await = failures;
    }

    pub async fn fail_orders_for(&self, symbol: &str) {
        self.failures.write().await.orders.insert(symbol.to_string());
    }

    pub async fn fail_closes_for(&self, symbol: &str) {
        self.failures.write().await.closes.insert(symbol.to_string());
    }

    pub async fn fail_leverage_for(&self, symbol: &str) {
        self.failures.write().await.leverage.insert(symbol.to_string());
    }

    pub async fn fail_account_reads(&self, fail: bool) {
        self.failures.write().await.account_reads = fail;
    }

    pub async fn clear_failures(&self) {
        *self.failures.write().await = FailureInjection::default();
    }

    /// Open a position directly at `entry_price` without fees.
    pub async fn seed_position(&self, symbol: &str, size: Decimal, entry_price: Decimal) {
        let mut state = self.state.write().await;
        state.positions.insert(
            symbol.to_string(),
            PaperPosition {
                symbol: symbol.to_string(),
                size,
                entry_price,
                opened_at: Utc::now(),
            },
        );
    }

    /// Set a symbol's leverage directly, bypassing the open-position rule.
    pub async fn seed_leverage(&self, symbol: &str, leverage: u32) {
        self.state
            .write()
            .await
            .leverage
            .insert(symbol.to_string(), leverage);
    }

    async fn check_reads(&self) -> Result<(), GatewayError> {
        if self.failures.read().await.account_reads {
            return Err(GatewayError::Network("injected account read failure".into()));
        }
        Ok(())
    }

    async fn marks(&self, symbols: Vec<String>) -> Result<HashMap<String, Decimal>, GatewayError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        self.feed.get_prices(&symbols).await
    }

    async fn held_symbols(&self) -> Vec<String> {
        self.state.read().await.positions.keys().cloned().collect()
    }

    /// Settle hourly funding up to `now_ms`.
    ///
    /// The first call only anchors the settlement clock. Longs pay positive
    /// rates, shorts receive them.
    pub async fn settle_funding_at(&self, now_ms: i64) -> Result<Vec<FundingPayment>, GatewayError> {
        let current_hour = now_ms - now_ms.rem_euclid(HOUR_MS);

        let last = self.state.read().await.last_funding_ms;
        let Some(last) = last else {
            self.state.write().await.last_funding_ms = Some(current_hour);
            return Ok(Vec::new());
        };
        if current_hour <= last {
            return Ok(Vec::new());
        }

        let symbols = self.held_symbols().await;
        let (prices, rates) = if symbols.is_empty() {
            (HashMap::new(), HashMap::new())
        } else {
            (
                self.feed.get_prices(&symbols).await?,
                self.feed.get_funding_rates(&symbols).await?,
            )
        };

        let hours = ((current_hour - last) / HOUR_MS).min(MAX_FUNDING_CATCHUP_HOURS);
        let first_hour = current_hour - (hours - 1) * HOUR_MS;

        let mut settled = Vec::new();
        {
            let mut state = self.state.write().await;
            for h in 0..hours {
                let time = first_hour + h * HOUR_MS;
                for position in state.positions.values() {
                    let Some(&rate) = rates.get(&position.symbol) else {
                        continue;
                    };
                    let price = PaperState::mark(position, &prices);
                    let usdc = -position.size * price * rate;
                    settled.push(FundingPayment {
                        time,
                        coin: position.symbol.clone(),
                        funding_rate: rate,
                        usdc,
                    });
                }
            }

            for payment in &settled {
                state.balance += payment.usdc;
                state.total_funding += payment.usdc;
            }
            state.funding_payments.extend(settled.iter().cloned());
            state.last_funding_ms = Some(current_hour);
        }

        if !settled.is_empty() {
            let total: Decimal = settled.iter().map(|p| p.usdc).sum();
            info!(
                payments = settled.len(),
                total = %total,
                "Paper funding settled"
            );
            if let Some(store) = &self.store {
                if let Ok(store) = store.lock() {
                    for p in &settled {
                        if let Err(e) =
                            store.record_funding_event(p.time, &p.coin, p.funding_rate, p.usdc)
                        {
                            warn!(error = %e, "[PERSISTENCE] Failed to record paper funding event");
                        }
                    }
                }
            }
            self.persist().await;
        }

        Ok(settled)
    }

    async fn settle_funding(&self) -> Result<(), GatewayError> {
        self.settle_funding_at(Utc::now().timestamp_millis()).await?;
        Ok(())
    }

    /// Export current state for persistence.
    pub async fn export_state(&self) -> PersistedPaperState {
        let state = self.state.read().await;

        PersistedPaperState {
            initial_balance: state.initial_balance,
            balance: state.balance,
            total_fees: state.total_fees,
            total_funding: state.total_funding,
            realized_pnl: state.realized_pnl,
            order_count: state.order_count,
            last_funding_ms: state.last_funding_ms,
            positions: state
                .positions
                .iter()
                .map(|(symbol, p)| {
                    (
                        symbol.clone(),
                        PersistedPaperPosition {
                            symbol: p.symbol.clone(),
                            size: p.size,
                            entry_price: p.entry_price,
                            opened_at: p.opened_at,
                        },
                    )
                })
                .collect(),
            leverage: state.leverage.clone(),
            last_saved: Utc::now(),
        }
    }

    /// Restore state from persistence.
    pub async fn restore_state(&self, persisted: PersistedPaperState) {
        let mut state = self.state.write().await;

        state.initial_balance = persisted.initial_balance;
        state.balance = persisted.balance;
        state.total_fees = persisted.total_fees;
        state.total_funding = persisted.total_funding;
        state.realized_pnl = persisted.realized_pnl;
        state.order_count = persisted.order_count;
        state.last_funding_ms = persisted.last_funding_ms;
        state.leverage = persisted.leverage;
        state.positions = persisted
            .positions
            .into_iter()
            .map(|(symbol, p)| {
                (
                    symbol,
                    PaperPosition {
                        symbol: p.symbol,
                        size: p.size,
                        entry_price: p.entry_price,
                        opened_at: p.opened_at,
                    },
                )
            })
            .collect();

        // Keep order ids above anything already issued
        self.order_id_counter
            .store(persisted.order_count + 1, Ordering::SeqCst);

        info!(
            balance = %state.balance,
            positions = state.positions.len(),
            order_count = state.order_count,
            "Paper state restored from persistence"
        );
    }

    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = self.export_state().await;
        match store.lock() {
            Ok(store) => {
                if let Err(e) = store.save_state(&snapshot) {
                    warn!(error = %e, "[PERSISTENCE] Failed to save paper state");
                }
            }
            Err(_) => warn!("[PERSISTENCE] Paper store lock poisoned"),
        }
    }

    fn record_fill(
        &self,
        order_id: &str,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
        fee: Decimal,
    ) {
        let Some(store) = &self.store else {
            return;
        };
        if let Ok(store) = store.lock() {
            if let Err(e) = store.record_fill(order_id, symbol, side.as_str(), size, price, fee) {
                warn!(error = %e, "[PERSISTENCE] Failed to record paper fill");
            }
        }
    }

    /// Fill `size` units on `side`. With `reduce_only` no margin check applies.
    async fn execute(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        reference_price: Decimal,
        reduce_only: bool,
    ) -> OrderResult {
        if size <= Decimal::ZERO {
            return OrderResult::failed(format!("invalid order size {}", size));
        }

        let mut symbols = self.held_symbols().await;
        if !symbols.iter().any(|s| s == symbol) {
            symbols.push(symbol.to_string());
        }
        let prices = match self.marks(symbols).await {
            Ok(p) => p,
            Err(e) => return OrderResult::failed(format!("price unavailable: {}", e)),
        };

        let price = match prices.get(symbol) {
            Some(&p) if p > Decimal::ZERO => p,
            _ if reference_price > Decimal::ZERO => reference_price,
            _ => return OrderResult::failed(format!("no price for {}", symbol)),
        };

        let delta = if side.is_buy() { size } else { -size };
        let notional = size * price;
        let fee = notional * self.fee_rate;

        let mut state = self.state.write().await;

        if !reduce_only {
            let current = state
                .positions
                .get(symbol)
                .map(|p| p.size)
                .unwrap_or_default();
            let increases = current.is_zero() || current.is_sign_positive() == delta.is_sign_positive();
            if increases {
                let leverage = Decimal::from(state.leverage_for(symbol));
                let required = notional / leverage + fee;
                let available = state.account_value(&prices) - state.total_margin(&prices);
                if required > available {
                    warn!(
                        %symbol,
                        required = %required,
                        available = %available,
                        "Paper order rejected: insufficient margin"
                    );
                    return OrderResult::failed(format!(
                        "insufficient margin: required {} available {}",
                        required.round_dp(2),
                        available.round_dp(2)
                    ));
                }
            }
        }

        let realized = state.apply_fill(symbol, delta, price);
        state.balance -= fee;
        state.total_fees += fee;
        state.order_count += 1;
        drop(state);

        let order_id = self.next_order_id().to_string();

        info!(
            %order_id,
            %symbol,
            side = %side,
            size = %size,
            price = %price,
            fee = %fee,
            realized_pnl = %realized,
            "Paper order filled"
        );

        self.record_fill(&order_id, symbol, side, size, price, fee);
        self.persist().await;

        OrderResult::filled(order_id, size, price).with_fee(fee, "USDC")
    }
}

#[async_trait]
impl<F: PriceFeed> AccountReader for PaperExchange<F> {
    async fn get_open_positions(&self) -> Result<Vec<OpenPosition>, GatewayError> {
        self.check_reads().await?;

        let prices = self.marks(self.held_symbols().await).await?;
        let state = self.state.read().await;

        let mut positions: Vec<OpenPosition> = state
            .positions
            .values()
            .filter(|p| !p.size.is_zero())
            .map(|p| {
                let mark = PaperState::mark(p, &prices);
                OpenPosition {
                    symbol: p.symbol.clone(),
                    size: p.size,
                    entry_price: p.entry_price,
                    unrealized_pnl: PaperState::unrealized_pnl(p, mark),
                    margin_used: state.margin_for(p, mark),
                    leverage: Decimal::from(state.leverage_for(&p.symbol)),
                }
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn get_account_summary(&self) -> Result<AccountSummary, GatewayError> {
        self.check_reads().await?;
        self.settle_funding().await?;

        let prices = self.marks(self.held_symbols().await).await?;
        let state = self.state.read().await;

        let account_value = state.account_value(&prices);
        let total_margin_used = state.total_margin(&prices);
        Ok(AccountSummary {
            account_value,
            total_margin_used,
            withdrawable: (account_value - total_margin_used).max(Decimal::ZERO),
        })
    }

    async fn get_funding_payments(
        &self,
        start_time_ms: i64,
    ) -> Result<Vec<FundingPayment>, GatewayError> {
        self.check_reads().await?;
        self.settle_funding().await?;

        Ok(self
            .state
            .read()
            .await
            .funding_payments
            .iter()
            .filter(|p| p.time >= start_time_ms)
            .cloned()
            .collect())
    }

    async fn get_leverage_setting(&self, symbol: &str) -> Result<Option<u32>, GatewayError> {
        self.check_reads().await?;
        Ok(Some(self.state.read().await.leverage_for(symbol)))
    }
}

#[async_trait]
impl<F: PriceFeed> OrderGateway for PaperExchange<F> {
    async fn place_market_order(
        &self,
        symbol: &str,
        is_buy: bool,
        size: Decimal,
        price: Decimal,
    ) -> OrderResult {
        if self.failures.read().await.orders.contains(symbol) {
            warn!(%symbol, "Injected order failure");
            return OrderResult::failed(format!("injected order failure for {}", symbol));
        }
        self.execute(symbol, OrderSide::from_is_buy(is_buy), size, price, false)
            .await
    }

    async fn close_position(&self, symbol: &str) -> OrderResult {
        if self.failures.read().await.closes.contains(symbol) {
            warn!(%symbol, "Injected close failure");
            return OrderResult::failed(format!("injected close failure for {}", symbol));
        }

        let (size, entry) = match self.state.read().await.positions.get(symbol) {
            Some(p) if !p.size.is_zero() => (p.size, p.entry_price),
            _ => return OrderResult::failed(format!("no open position in {}", symbol)),
        };

        let side = OrderSide::from_is_buy(size < Decimal::ZERO);
        debug!(%symbol, size = %size, "Closing paper position");
        self.execute(symbol, side, size.abs(), entry, true).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> LeverageResult {
        if self.failures.read().await.leverage.contains(symbol) {
            warn!(%symbol, "Injected leverage failure");
            return LeverageResult::failed(format!("injected leverage failure for {}", symbol));
        }
        if leverage == 0 {
            return LeverageResult::failed("leverage must be at least 1");
        }

        let mut state = self.state.write().await;
        if state.positions.get(symbol).is_some_and(|p| !p.size.is_zero()) {
            warn!(%symbol, leverage, "Paper leverage change rejected: position open");
            return LeverageResult::failed(format!(
                "cannot change leverage for {} with an open position",
                symbol
            ));
        }
        state.leverage.insert(symbol.to_string(), leverage);
        drop(state);

        info!(%symbol, leverage, "Paper leverage updated");
        self.persist().await;
        LeverageResult::ok()
    }
}

/// Size precision assumed for priced symbols without explicit metadata.
const STATIC_SZ_DECIMALS: u32 = 4;

/// Fixed in-memory price feed.
///
/// Every priced symbol also has asset metadata: either set explicitly or
/// derived from [`STATIC_SZ_DECIMALS`].
#[derive(Debug, Default)]
pub struct StaticPriceFeed {
    prices: std::sync::RwLock<HashMap<String, Decimal>>,
    funding_rates: std::sync::RwLock<HashMap<String, Decimal>>,
    meta: std::sync::RwLock<HashMap<String, AssetMeta>>,
    fail: std::sync::atomic::AtomicBool,
}

impl StaticPriceFeed {
    pub fn new(prices: &[(&str, Decimal)]) -> Self {
        let feed = Self::default();
        for (symbol, price) in prices {
            feed.set_price(symbol, *price);
        }
        feed
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        if let Ok(mut prices) = self.prices.write() {
            prices.insert(symbol.to_string(), price);
        }
    }

    pub fn remove_price(&self, symbol: &str) {
        if let Ok(mut prices) = self.prices.write() {
            prices.remove(symbol);
        }
    }

    pub fn set_funding_rate(&self, symbol: &str, rate: Decimal) {
        if let Ok(mut rates) = self.funding_rates.write() {
            rates.insert(symbol.to_string(), rate);
        }
    }

    pub fn set_meta(&self, meta: AssetMeta) {
        if let Ok(mut table) = self.meta.write() {
            table.insert(meta.symbol.clone(), meta);
        }
    }

    /// Make every subsequent call fail with a network error.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn lookup(
        &self,
        table: &std::sync::RwLock<HashMap<String, Decimal>>,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("price feed unavailable".into()));
        }
        let table = table
            .read()
            .map_err(|_| GatewayError::Network("price table poisoned".into()))?;
        Ok(symbols
            .iter()
            .filter_map(|s| table.get(s).map(|p| (s.clone(), *p)))
            .collect())
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn get_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>, GatewayError> {
        self.lookup(&self.prices, symbols)
    }

    async fn get_funding_rates(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, GatewayError> {
        self.lookup(&self.funding_rates, symbols)
    }
}

#[async_trait]
impl AssetMetaSource for StaticPriceFeed {
    async fn get_asset_meta(&self) -> Result<HashMap<String, AssetMeta>, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("metadata unavailable".into()));
        }
        let prices = self
            .prices
            .read()
            .map_err(|_| GatewayError::Network("price table poisoned".into()))?;
        let explicit = self
            .meta
            .read()
            .map_err(|_| GatewayError::Network("metadata table poisoned".into()))?;

        let mut meta: HashMap<String, AssetMeta> = prices
            .keys()
            .map(|s| (s.clone(), AssetMeta::from_decimals(s.clone(), STATIC_SZ_DECIMALS, 50)))
            .collect();
        meta.extend(explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> Arc<StaticPriceFeed> {
        Arc::new(StaticPriceFeed::new(&[
            ("BTC", dec!(50000)),
            ("ZK", dec!(0.2)),
            ("STRK", dec!(0.5)),
        ]))
    }

    fn venue(balance: Decimal) -> (Arc<StaticPriceFeed>, PaperExchange<Arc<StaticPriceFeed>>) {
        let feed = feed();
        let venue = PaperExchange::new(feed.clone(), balance);
        (feed, venue)
    }

    #[tokio::test]
    async fn test_market_order_opens_position_with_fee() {
        let (_, venue) = venue(dec!(1000));
        venue.set_leverage("BTC", 3).await;

        let result = venue
            .place_market_order("BTC", true, dec!(0.01), dec!(50000))
            .await;
        assert!(result.success);
        assert_eq!(result.avg_price, dec!(50000));
        // 500 notional * 0.045%
        assert_eq!(result.fee, Some(dec!(0.225)));

        let positions = venue.get_open_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].size, dec!(0.01));
        assert_eq!(positions[0].leverage, dec!(3));
        // 500 / 3
        assert_eq!(positions[0].margin_used.round_dp(4), dec!(166.6667));
    }

    #[tokio::test]
    async fn test_short_then_close_realizes_pnl() {
        let (feed, venue) = venue(dec!(1000));
        let venue = venue.with_fee_rate(Decimal::ZERO);

        let opened = venue.place_market_order("ZK", false, dec!(1000), dec!(0.2)).await;
        assert!(opened.success);

        feed.set_price("ZK", dec!(0.15));
        let summary = venue.get_account_summary().await.unwrap();
        assert_eq!(summary.account_value, dec!(1050));

        let closed = venue.close_position("ZK").await;
        assert!(closed.success);
        assert_eq!(closed.filled_size, dec!(1000));

        let state = venue.get_state().await;
        assert!(state.positions.is_empty());
        assert_eq!(state.realized_pnl, dec!(50));
        assert_eq!(state.balance, dec!(1050));
    }

    #[tokio::test]
    async fn test_long_reduce_then_flip_realizes_pnl() {
        let (feed, venue) = venue(dec!(10000));
        let venue = venue.with_fee_rate(Decimal::ZERO);

        venue.place_market_order("BTC", true, dec!(0.02), dec!(0)).await;
        feed.set_price("BTC", dec!(60000));

        let reduced = venue.place_market_order("BTC", false, dec!(0.01), dec!(0)).await;
        assert!(reduced.success);
        assert_eq!(venue.get_state().await.realized_pnl, dec!(100));

        // Sell through zero: 0.01 closes at a gain, 0.01 opens short at 60000
        venue.place_market_order("BTC", false, dec!(0.02), dec!(0)).await;
        let state = venue.get_state().await;
        assert_eq!(state.realized_pnl, dec!(200));
        assert_eq!(state.positions["BTC"].size, dec!(-0.01));
        assert_eq!(state.positions["BTC"].entry_price, dec!(60000));
    }

    #[tokio::test]
    async fn test_adding_averages_entry_price() {
        let (feed, venue) = venue(dec!(10000));
        venue.place_market_order("BTC", true, dec!(0.01), dec!(0)).await;
        feed.set_price("BTC", dec!(60000));
        venue.place_market_order("BTC", true, dec!(0.01), dec!(0)).await;

        let state = venue.get_state().await;
        assert_eq!(state.positions["BTC"].entry_price, dec!(55000));
    }

    #[tokio::test]
    async fn test_leverage_change_rejected_while_open() {
        let (_, venue) = venue(dec!(1000));
        venue.place_market_order("ZK", false, dec!(100), dec!(0.2)).await;

        let rejected = venue.set_leverage("ZK", 5).await;
        assert!(!rejected.success);
        assert!(rejected.error_message.unwrap().contains("open position"));

        assert!(venue.set_leverage("BTC", 5).await.success);

        venue.close_position("ZK").await;
        assert!(venue.set_leverage("ZK", 5).await.success);
    }

    #[tokio::test]
    async fn test_insufficient_margin_rejected() {
        let (_, venue) = venue(dec!(100));
        venue.set_leverage("BTC", 2).await;

        // 500 notional at 2x needs 250 margin
        let result = venue
            .place_market_order("BTC", true, dec!(0.01), dec!(50000))
            .await;
        assert!(!result.success);
        assert!(result.error_text().contains("insufficient margin"));
        assert!(venue.get_open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_without_position_fails() {
        let (_, venue) = venue(dec!(1000));
        let result = venue.close_position("BTC").await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let (_, venue) = venue(dec!(1000));
        venue.fail_orders_for("STRK").await;
        venue.fail_leverage_for("ZK").await;
        venue.fail_account_reads(true).await;

        assert!(!venue.place_market_order("STRK", false, dec!(10), dec!(0.5)).await.success);
        assert!(venue.place_market_order("ZK", false, dec!(10), dec!(0.2)).await.success);
        assert!(!venue.set_leverage("ZK", 3).await.success);
        assert!(venue.get_open_positions().await.is_err());

        venue.clear_failures().await;
        assert!(venue.get_open_positions().await.is_ok());
    }

    #[tokio::test]
    async fn test_hourly_funding_settlement() {
        let (feed, venue) = venue(dec!(1000));
        let venue = venue.with_fee_rate(Decimal::ZERO);
        feed.set_funding_rate("ZK", dec!(0.0001));
        feed.set_funding_rate("BTC", dec!(0.0001));

        venue.seed_position("ZK", dec!(-10000), dec!(0.2)).await;
        venue.seed_position("BTC", dec!(0.02), dec!(50000)).await;

        // First call anchors the clock
        assert!(venue.settle_funding_at(10 * HOUR_MS + 5).await.unwrap().is_empty());
        assert!(venue.settle_funding_at(10 * HOUR_MS + 900).await.unwrap().is_empty());

        let settled = venue.settle_funding_at(12 * HOUR_MS + 1).await.unwrap();
        // Two hours, two positions
        assert_eq!(settled.len(), 4);

        let zk: Decimal = settled.iter().filter(|p| p.coin == "ZK").map(|p| p.usdc).sum();
        let btc: Decimal = settled.iter().filter(|p| p.coin == "BTC").map(|p| p.usdc).sum();
        // Short 2000 notional receives, long 1000 notional pays
        assert_eq!(zk, dec!(0.4));
        assert_eq!(btc, dec!(-0.2));

        let state = venue.get_state().await;
        assert_eq!(state.total_funding, dec!(0.2));
        assert_eq!(state.balance, dec!(1000.2));

        assert_eq!(state.funding_payments.len(), 4);
        assert_eq!(state.last_funding_ms, Some(12 * HOUR_MS));
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("paper.db");

        {
            let venue = PaperExchange::new(feed(), dec!(1000))
                .with_store(PaperStore::open(&db).unwrap())
                .await
                .unwrap();
            venue.set_leverage("BTC", 3).await;
            assert!(venue.place_market_order("BTC", true, dec!(0.01), dec!(0)).await.success);
        }

        let venue = PaperExchange::new(feed(), dec!(1000))
            .with_store(PaperStore::open(&db).unwrap())
            .await
            .unwrap();
        let state = venue.get_state().await;
        assert_eq!(state.positions["BTC"].size, dec!(0.01));
        assert_eq!(state.leverage["BTC"], 3);
        assert_eq!(state.order_count, 1);

        let next = venue.place_market_order("BTC", true, dec!(0.01), dec!(0)).await;
        assert_eq!(next.order_id.as_deref(), Some("2"));
    }
}
