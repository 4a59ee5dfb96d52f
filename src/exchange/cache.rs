//! Explicit time-to-live caches.
//!
//! A cache is a plain value owned by the component that uses it; nothing here
//! is global. Callers invalidate explicitly when they need a fresh read (the
//! leverage protocol does so before pricing restore orders).

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::traits::{AssetMetaSource, PriceFeed};
use super::types::AssetMeta;
use crate::error::GatewayError;

/// Default TTL for cached mid prices.
pub const PRICE_CACHE_TTL: Duration = Duration::from_secs(10);

/// A value with the instant it was fetched and how long it stays valid.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    data: Option<T>,
    fetched_at: Option<Instant>,
    ttl: Duration,
}

impl<T> Cached<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            data: None,
            fetched_at: None,
            ttl,
        }
    }

    /// Store a freshly fetched value.
    pub fn store(&mut self, data: T) {
        self.store_at(data, Instant::now());
    }

    fn store_at(&mut self, data: T, at: Instant) {
        self.data = Some(data);
        self.fetched_at = Some(at);
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }

    fn is_fresh_at(&self, now: Instant) -> bool {
        match (self.data.as_ref(), self.fetched_at) {
            (Some(_), Some(at)) => now.saturating_duration_since(at) < self.ttl,
            _ => false,
        }
    }

    /// The cached value if it has not expired.
    pub fn get(&self) -> Option<&T> {
        if self.is_fresh() {
            self.data.as_ref()
        } else {
            None
        }
    }

    pub fn invalidate(&mut self) {
        self.data = None;
        self.fetched_at = None;
    }
}

/// Price feed decorator that serves repeated lookups from a short-lived cache.
///
/// A request is served from cache only when every requested symbol is present
/// in the fresh entry.
pub struct CachedPriceFeed<F> {
    inner: F,
    prices: Mutex<Cached<HashMap<String, Decimal>>>,
}

impl<F: PriceFeed> CachedPriceFeed<F> {
    pub fn new(inner: F, ttl: Duration) -> Self {
        Self {
            inner,
            prices: Mutex::new(Cached::new(ttl)),
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: PriceFeed> PriceFeed for CachedPriceFeed<F> {
    async fn get_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>, GatewayError> {
        let mut cache = self.prices.lock().await;

        if let Some(cached) = cache.get() {
            if symbols.iter().all(|s| cached.contains_key(s)) {
                debug!(count = symbols.len(), "[CACHE] Price cache hit");
                return Ok(symbols
                    .iter()
                    .filter_map(|s| cached.get(s).map(|p| (s.clone(), *p)))
                    .collect());
            }
        }

        let fresh = self.inner.get_prices(symbols).await?;

        // Merge so that lookups for different symbol sets share one entry.
        let mut merged = cache.get().cloned().unwrap_or_default();
        merged.extend(fresh.iter().map(|(k, v)| (k.clone(), *v)));
        cache.store(merged);

        Ok(fresh)
    }

    async fn get_funding_rates(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, GatewayError> {
        self.inner.get_funding_rates(symbols).await
    }

    async fn invalidate_prices(&self) {
        self.prices.lock().await.invalidate();
        debug!("[CACHE] Price cache invalidated");
    }
}

#[async_trait]
impl<F: AssetMetaSource> AssetMetaSource for CachedPriceFeed<F> {
    async fn get_asset_meta(&self) -> Result<HashMap<String, AssetMeta>, GatewayError> {
        self.inner.get_asset_meta().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFeed {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PriceFeed for CountingFeed {
        async fn get_prices(
            &self,
            symbols: &[String],
        ) -> Result<HashMap<String, Decimal>, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(symbols.iter().map(|s| (s.clone(), dec!(100))).collect())
        }

        async fn get_funding_rates(
            &self,
            _symbols: &[String],
        ) -> Result<HashMap<String, Decimal>, GatewayError> {
            Ok(HashMap::new())
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cached_value_expires() {
        let mut cache: Cached<u32> = Cached::new(Duration::from_secs(5));
        assert!(cache.get().is_none());

        let start = Instant::now();
        cache.store_at(7, start);
        assert!(cache.is_fresh_at(start + Duration::from_secs(4)));
        assert!(!cache.is_fresh_at(start + Duration::from_secs(5)));
        assert!(cache.get().is_some());

        cache.invalidate();
        assert!(!cache.is_fresh_at(start));
    }

    #[tokio::test]
    async fn test_price_cache_hit_and_invalidate() {
        let feed = CachedPriceFeed::new(
            CountingFeed {
                calls: AtomicUsize::new(0),
            },
            Duration::from_secs(60),
        );

        feed.get_prices(&symbols(&["BTC", "ZK"])).await.unwrap();
        feed.get_prices(&symbols(&["BTC"])).await.unwrap();
        assert_eq!(feed.inner().calls.load(Ordering::SeqCst), 1);

        // Unknown symbol forces a refetch
        feed.get_prices(&symbols(&["STRK"])).await.unwrap();
        assert_eq!(feed.inner().calls.load(Ordering::SeqCst), 2);

        feed.invalidate_prices().await;
        feed.get_prices(&symbols(&["BTC"])).await.unwrap();
        assert_eq!(feed.inner().calls.load(Ordering::SeqCst), 3);
    }
}
