//! Hyperliquid REST API client.
//!
//! Read-only access to Hyperliquid perpetuals through the `/info` endpoint:
//! - Mid prices and hourly funding rates
//! - Asset size precision and leverage limits (cached)
//! - Account positions, margin summary and settled funding payments
//!
//! Every request goes through the client's retry policy and circuit breaker.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::types::*;
use crate::error::GatewayError;
use crate::exchange::cache::Cached;
use crate::exchange::retry::{CircuitBreaker, RetryPolicy};
use crate::exchange::traits::{AccountReader, AssetMetaSource, PriceFeed};
use crate::exchange::types::{AccountSummary, AssetMeta, FundingPayment, OpenPosition};

/// Base URL for Hyperliquid mainnet API.
pub const MAINNET_API_URL: &str = "https://api.hyperliquid.xyz";

/// How long asset metadata stays valid.
const ASSET_META_TTL: Duration = Duration::from_secs(300);

/// Hyperliquid API client for market data and account reads.
#[derive(Debug)]
pub struct HyperliquidClient {
    client: Client,
    base_url: String,
    account_address: Option<String>,
    retry: RetryPolicy,
    breaker: Mutex<CircuitBreaker>,
    asset_meta: tokio::sync::Mutex<Cached<HashMap<String, AssetMeta>>>,
}

impl HyperliquidClient {
    /// Create a new client for the given base URL.
    ///
    /// Account reads require `account_address`; market data does not.
    pub fn new(base_url: &str, account_address: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_address,
            retry: RetryPolicy::default(),
            breaker: Mutex::new(CircuitBreaker::default()),
            asset_meta: tokio::sync::Mutex::new(Cached::new(ASSET_META_TTL)),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Mutex::new(breaker);
        self
    }

    fn user(&self) -> Result<String, GatewayError> {
        self.account_address
            .clone()
            .ok_or_else(|| GatewayError::Rejected("no account address configured".to_string()))
    }

    fn breaker_allows(&self) -> bool {
        self.breaker.lock().map(|mut b| b.allow()).unwrap_or(true)
    }

    fn record_outcome<T>(&self, result: &Result<T, GatewayError>) {
        if let Ok(mut breaker) = self.breaker.lock() {
            match result {
                Ok(_) => breaker.record_success(),
                Err(e) if e.is_retriable() => breaker.record_failure(),
                Err(_) => {}
            }
        }
    }

    /// POST one info request with retries behind the circuit breaker.
    async fn post_info<T: DeserializeOwned>(
        &self,
        request: &InfoRequest,
        operation: &'static str,
    ) -> Result<T, GatewayError> {
        if !self.breaker_allows() {
            warn!(operation, "Hyperliquid circuit breaker open, skipping request");
            return Err(GatewayError::CircuitOpen(operation.to_string()));
        }

        let result = self
            .retry
            .run(operation, || self.send_info::<T>(request))
            .await;
        self.record_outcome(&result);
        result
    }

    async fn send_info<T: DeserializeOwned>(&self, request: &InfoRequest) -> Result<T, GatewayError> {
        let url = format!("{}/info", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    /// Mid prices for every listed coin.
    #[instrument(skip(self), name = "hl_all_mids")]
    pub async fn get_all_mids(&self) -> Result<HashMap<String, Decimal>, GatewayError> {
        let raw: AllMidsResponse = self.post_info(&InfoRequest::AllMids, "allMids").await?;

        let mids: HashMap<String, Decimal> = raw
            .into_iter()
            .filter_map(|(coin, px)| match px.parse::<Decimal>() {
                Ok(p) => Some((coin, p)),
                Err(_) => {
                    debug!(%coin, %px, "Skipping unparsable mid price");
                    None
                }
            })
            .collect();

        debug!("Fetched {} mid prices from Hyperliquid", mids.len());
        Ok(mids)
    }

    /// Get metadata and asset contexts for all perpetuals.
    #[instrument(skip(self), name = "hl_meta_and_asset_ctxs")]
    pub async fn get_meta_and_asset_ctxs(&self) -> Result<MetaAndAssetCtxsResponse, GatewayError> {
        let data: MetaAndAssetCtxsResponse = self
            .post_info(&InfoRequest::MetaAndAssetCtxs, "metaAndAssetCtxs")
            .await?;

        if data.0.universe.len() != data.1.len() {
            return Err(GatewayError::Malformed(format!(
                "universe ({}) and contexts ({}) differ in length",
                data.0.universe.len(),
                data.1.len()
            )));
        }

        debug!("Fetched {} assets from Hyperliquid", data.0.universe.len());
        Ok(data)
    }

    /// Positions and margin for the configured account.
    #[instrument(skip(self), name = "hl_clearinghouse_state")]
    pub async fn get_clearinghouse_state(&self) -> Result<ClearinghouseState, GatewayError> {
        let request = InfoRequest::ClearinghouseState { user: self.user()? };
        self.post_info(&request, "clearinghouseState").await
    }
}

#[async_trait]
impl PriceFeed for HyperliquidClient {
    async fn get_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>, GatewayError> {
        let mut mids = self.get_all_mids().await?;
        Ok(symbols
            .iter()
            .filter_map(|s| mids.remove(s).map(|p| (s.clone(), p)))
            .collect())
    }

    async fn get_funding_rates(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, GatewayError> {
        let (meta, ctxs) = self.get_meta_and_asset_ctxs().await?;
        Ok(meta
            .universe
            .into_iter()
            .zip(ctxs)
            .filter(|(m, _)| symbols.contains(&m.name))
            .map(|(m, c)| (m.name, c.funding))
            .collect())
    }
}

#[async_trait]
impl AssetMetaSource for HyperliquidClient {
    /// Size precision and leverage limits per coin, cached for five minutes.
    async fn get_asset_meta(&self) -> Result<HashMap<String, AssetMeta>, GatewayError> {
        let mut cache = self.asset_meta.lock().await;
        if let Some(meta) = cache.get() {
            return Ok(meta.clone());
        }

        let (meta, _) = self.get_meta_and_asset_ctxs().await?;
        let by_symbol: HashMap<String, AssetMeta> = meta
            .universe
            .into_iter()
            .map(|a| {
                let m = AssetMeta::from_decimals(a.name.clone(), a.sz_decimals, a.max_leverage);
                (a.name, m)
            })
            .collect();

        debug!("Cached metadata for {} assets", by_symbol.len());
        cache.store(by_symbol.clone());
        Ok(by_symbol)
    }
}

#[async_trait]
impl AccountReader for HyperliquidClient {
    async fn get_open_positions(&self) -> Result<Vec<OpenPosition>, GatewayError> {
        let state = self.get_clearinghouse_state().await?;
        Ok(state
            .asset_positions
            .into_iter()
            .map(|entry| entry.position)
            .filter(|p| !p.szi.is_zero())
            .map(|p| OpenPosition {
                symbol: p.coin,
                size: p.szi,
                entry_price: p.entry_px.unwrap_or_default(),
                unrealized_pnl: p.unrealized_pnl.unwrap_or_default(),
                margin_used: p.margin_used.unwrap_or_default(),
                leverage: Decimal::from(p.leverage.value),
            })
            .collect())
    }

    async fn get_account_summary(&self) -> Result<AccountSummary, GatewayError> {
        let state = self.get_clearinghouse_state().await?;
        Ok(AccountSummary {
            account_value: state.margin_summary.account_value,
            total_margin_used: state.margin_summary.total_margin_used,
            withdrawable: state.withdrawable.unwrap_or_default(),
        })
    }

    async fn get_funding_payments(
        &self,
        start_time_ms: i64,
    ) -> Result<Vec<FundingPayment>, GatewayError> {
        let request = InfoRequest::UserFunding {
            user: self.user()?,
            start_time: start_time_ms,
        };
        let records: Vec<UserFundingRecord> = self.post_info(&request, "userFunding").await?;

        Ok(records
            .into_iter()
            .map(|r| FundingPayment {
                time: r.time,
                coin: r.delta.coin,
                funding_rate: r.delta.funding_rate,
                usdc: r.delta.usdc,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::retry::BreakerState;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    fn client_for(server: &MockServer) -> HyperliquidClient {
        HyperliquidClient::new(&server.uri(), Some("0xabc".to_string()))
            .unwrap()
            .with_retry(fast_retry())
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_prices_filtered_to_requested_symbols() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "allMids"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "BTC": "60000.5",
                "ZK": "0.15",
                "ETH": "3000"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let prices = client.get_prices(&symbols(&["BTC", "ZK", "STRK"])).await.unwrap();

        assert_eq!(prices.len(), 2);
        assert_eq!(prices["BTC"], dec!(60000.5));
        assert_eq!(prices["ZK"], dec!(0.15));
        assert!(!prices.contains_key("STRK"));
    }

    #[tokio::test]
    async fn test_open_positions_and_summary() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "clearinghouseState", "user": "0xabc"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "assetPositions": [
                    {"position": {"coin": "BTC", "szi": "0.01", "entryPx": "60000",
                        "unrealizedPnl": "5", "marginUsed": "200",
                        "leverage": {"type": "cross", "value": 3}}},
                    {"position": {"coin": "ZK", "szi": "0", "entryPx": "0.1",
                        "unrealizedPnl": "0", "marginUsed": "0",
                        "leverage": {"type": "cross", "value": 3}}},
                    {"position": {"coin": "STRK", "szi": "-400", "entryPx": "0.5",
                        "unrealizedPnl": "-1", "marginUsed": "100",
                        "leverage": {"type": "cross", "value": 2}}}
                ],
                "marginSummary": {"accountValue": "1000", "totalMarginUsed": "300"},
                "withdrawable": "700"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let positions = client.get_open_positions().await.unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].symbol, "BTC");
        assert_eq!(positions[0].leverage, dec!(3));
        assert!(positions[0].is_long());
        assert_eq!(positions[1].size, dec!(-400));
        assert_eq!(positions[1].leverage, dec!(2));

        let summary = client.get_account_summary().await.unwrap();
        assert_eq!(summary.account_value, dec!(1000));
        assert_eq!(summary.withdrawable, dec!(700));
    }

    #[tokio::test]
    async fn test_account_reads_need_address() {
        let server = MockServer::start().await;
        let client = HyperliquidClient::new(&server.uri(), None).unwrap();

        let err = client.get_open_positions().await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_asset_meta_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "metaAndAssetCtxs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"universe": [
                    {"name": "BTC", "szDecimals": 5, "maxLeverage": 50},
                    {"name": "ZK", "szDecimals": 0, "maxLeverage": 5}
                ]},
                [
                    {"funding": "0.0000125", "markPx": "60000", "midPx": "60000.5"},
                    {"funding": "-0.00002", "markPx": "0.15", "midPx": null}
                ]
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let meta = client.get_asset_meta().await.unwrap();
        assert_eq!(meta["BTC"].size_step, dec!(0.00001));
        assert_eq!(meta["BTC"].max_leverage, 50);
        assert!(!meta.contains_key("DOGE"));

        // Second read is served from the cache
        let again = client.get_asset_meta().await.unwrap();
        assert_eq!(again["ZK"].min_size, dec!(1));
    }

    #[tokio::test]
    async fn test_funding_rates_and_payments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "metaAndAssetCtxs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"universe": [
                    {"name": "BTC", "szDecimals": 5, "maxLeverage": 50},
                    {"name": "ZK", "szDecimals": 0, "maxLeverage": 5}
                ]},
                [
                    {"funding": "0.0000125", "markPx": "60000", "midPx": "60000.5"},
                    {"funding": "-0.00002", "markPx": "0.15"}
                ]
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "userFunding", "startTime": 1000})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"time": 3600000, "delta": {"type": "funding", "coin": "ZK",
                    "usdc": "0.05", "fundingRate": "-0.00002", "szi": "-1000"}}
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let rates = client.get_funding_rates(&symbols(&["ZK"])).await.unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates["ZK"], dec!(-0.00002));

        let payments = client.get_funding_payments(1000).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].coin, "ZK");
        assert_eq!(payments[0].usdc, dec!(0.05));
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"BTC": "1"})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mids = client.get_all_mids().await.unwrap();
        assert_eq!(mids["BTC"], dec!(1));
    }

    #[tokio::test]
    async fn test_malformed_body_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.get_all_mids().await.unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let client = HyperliquidClient::new(&server.uri(), None)
            .unwrap()
            .with_retry(RetryPolicy::none())
            .with_circuit_breaker(CircuitBreaker::new(2, Duration::from_secs(60)));

        assert!(client.get_all_mids().await.is_err());
        assert!(client.get_all_mids().await.is_err());
        let err = client.get_all_mids().await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen(_)));
        assert_eq!(client.breaker.lock().unwrap().state(), BreakerState::Open);
    }
}
