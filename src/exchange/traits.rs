//! Capability traits for the venue and the price feed.
//!
//! Components depend on the narrowest capability they need:
//! - `PriceFeed`: mid prices and funding rates
//! - `AccountReader`: positions, margin summary and funding payments
//! - `OrderGateway`: market orders, position closes and leverage updates
//! - `AssetMetaSource`: size precision and leverage limits per symbol
//!
//! `Gateway` is the full venue (read + write) and is implemented for anything
//! that provides both halves.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use super::types::{
    AccountSummary, AssetMeta, FundingPayment, LeverageResult, OpenPosition, OrderResult,
};
use crate::error::GatewayError;

/// Source of current market prices.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Current mid prices for the requested symbols.
    ///
    /// Symbols the venue does not quote are absent from the returned map.
    async fn get_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>, GatewayError>;

    /// Latest hourly funding rate per symbol.
    async fn get_funding_rates(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, GatewayError>;

    /// Drop any locally cached prices so the next read goes to the source.
    async fn invalidate_prices(&self) {}
}

/// Source of per-symbol trading constraints.
#[async_trait]
pub trait AssetMetaSource: Send + Sync {
    /// Metadata keyed by symbol.
    async fn get_asset_meta(&self) -> Result<HashMap<String, AssetMeta>, GatewayError>;
}

/// Read side of the venue.
#[async_trait]
pub trait AccountReader: Send + Sync {
    /// All positions with non-zero size.
    async fn get_open_positions(&self) -> Result<Vec<OpenPosition>, GatewayError>;

    async fn get_account_summary(&self) -> Result<AccountSummary, GatewayError>;

    /// Funding payments settled at or after `start_time_ms`.
    async fn get_funding_payments(
        &self,
        start_time_ms: i64,
    ) -> Result<Vec<FundingPayment>, GatewayError>;

    /// Leverage configured for `symbol`, independent of any open position.
    ///
    /// `None` when the venue does not report settings for flat symbols.
    async fn get_leverage_setting(&self, _symbol: &str) -> Result<Option<u32>, GatewayError> {
        Ok(None)
    }
}

/// Write side of the venue.
///
/// These calls report failure through their result values and never error.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit a market order of `size` base units; `price` is the reference price
    /// used for slippage bounds.
    async fn place_market_order(
        &self,
        symbol: &str,
        is_buy: bool,
        size: Decimal,
        price: Decimal,
    ) -> OrderResult;

    /// Flatten the whole position in `symbol`.
    async fn close_position(&self, symbol: &str) -> OrderResult;

    /// Set cross leverage for `symbol`.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> LeverageResult;
}

/// A full venue: account reads plus order entry.
pub trait Gateway: AccountReader + OrderGateway {}

impl<T: AccountReader + OrderGateway + ?Sized> Gateway for T {}

#[async_trait]
impl<T: PriceFeed + ?Sized> PriceFeed for Arc<T> {
    async fn get_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>, GatewayError> {
        (**self).get_prices(symbols).await
    }

    async fn get_funding_rates(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, GatewayError> {
        (**self).get_funding_rates(symbols).await
    }

    async fn invalidate_prices(&self) {
        (**self).invalidate_prices().await
    }
}

#[async_trait]
impl<T: AssetMetaSource + ?Sized> AssetMetaSource for Arc<T> {
    async fn get_asset_meta(&self) -> Result<HashMap<String, AssetMeta>, GatewayError> {
        (**self).get_asset_meta().await
    }
}

#[async_trait]
impl<T: AccountReader + ?Sized> AccountReader for Arc<T> {
    async fn get_open_positions(&self) -> Result<Vec<OpenPosition>, GatewayError> {
        (**self).get_open_positions().await
    }

    async fn get_account_summary(&self) -> Result<AccountSummary, GatewayError> {
        (**self).get_account_summary().await
    }

    async fn get_funding_payments(
        &self,
        start_time_ms: i64,
    ) -> Result<Vec<FundingPayment>, GatewayError> {
        (**self).get_funding_payments(start_time_ms).await
    }

    async fn get_leverage_setting(&self, symbol: &str) -> Result<Option<u32>, GatewayError> {
        (**self).get_leverage_setting(symbol).await
    }
}

#[async_trait]
impl<T: OrderGateway + ?Sized> OrderGateway for Arc<T> {
    async fn place_market_order(
        &self,
        symbol: &str,
        is_buy: bool,
        size: Decimal,
        price: Decimal,
    ) -> OrderResult {
        (**self).place_market_order(symbol, is_buy, size, price).await
    }

    async fn close_position(&self, symbol: &str) -> OrderResult {
        (**self).close_position(symbol).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> LeverageResult {
        (**self).set_leverage(symbol, leverage).await
    }
}
