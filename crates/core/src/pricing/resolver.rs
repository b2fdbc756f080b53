use crate::domain::recommendation::{normalize_ticker, Benchmark};
use crate::performance::PerformanceError;
use crate::pricing::{MarketDataProvider, PriceCache, ProviderError};
use chrono::{Datelike, Days, NaiveDate, Weekday};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_FORWARD_DAYS: u32 = 5;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const DEFAULT_SP500_SYMBOL: &str = "SPY";
const DEFAULT_DAX_SYMBOL: &str = "DAX";

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// How many days past the requested date to search for a session.
    pub max_forward_days: u32,
    /// Attempts per provider call before a transient failure is surfaced.
    pub retries: u32,
    /// Base delay, doubled on each retry.
    pub backoff: Duration,
    pub sp500_symbol: String,
    pub dax_symbol: String,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_forward_days: DEFAULT_MAX_FORWARD_DAYS,
            retries: DEFAULT_RETRIES,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            sp500_symbol: DEFAULT_SP500_SYMBOL.to_string(),
            dax_symbol: DEFAULT_DAX_SYMBOL.to_string(),
        }
    }
}

impl ResolverOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("PRICE_MAX_FORWARD_DAYS") {
            if let Ok(n) = s.parse::<u32>() {
                out.max_forward_days = n;
            }
        }

        if let Ok(s) = std::env::var("MARKET_DATA_RETRIES") {
            if let Ok(n) = s.parse::<u32>() {
                out.retries = n.max(1);
            }
        }

        if let Ok(s) = std::env::var("MARKET_DATA_BACKOFF_MS") {
            if let Ok(n) = s.parse::<u64>() {
                out.backoff = Duration::from_millis(n).min(MAX_BACKOFF);
            }
        }

        if let Ok(s) = std::env::var("BENCHMARK_SP500_SYMBOL") {
            if !s.trim().is_empty() {
                out.sp500_symbol = s.trim().to_string();
            }
        }

        if let Ok(s) = std::env::var("BENCHMARK_DAX_SYMBOL") {
            if !s.trim().is_empty() {
                out.dax_symbol = s.trim().to_string();
            }
        }

        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPrice {
    pub symbol: String,
    pub price: f64,
    pub requested_date: NaiveDate,
    pub resolved_date: NaiveDate,
}

/// Resolves closes for tickers and benchmark indices, snapping non-trading days forward.
pub struct PriceResolver {
    provider: Arc<dyn MarketDataProvider>,
    cache: PriceCache,
    options: ResolverOptions,
}

impl PriceResolver {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        cache: PriceCache,
        options: ResolverOptions,
    ) -> Self {
        Self {
            provider,
            cache,
            options,
        }
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    pub fn benchmark_symbol(&self, benchmark: Benchmark) -> &str {
        match benchmark {
            Benchmark::Dax => &self.options.dax_symbol,
            Benchmark::Sp500 => &self.options.sp500_symbol,
        }
    }

    /// Benchmark level on `date`, walking forward like [`Self::resolve`].
    ///
    /// A rejected benchmark symbol is reported as `InvalidBenchmark` so the pick itself is never
    /// retired for it.
    pub async fn resolve_benchmark(
        &self,
        benchmark: Benchmark,
        date: NaiveDate,
    ) -> Result<ResolvedPrice, PerformanceError> {
        let symbol = self.benchmark_symbol(benchmark).to_string();
        self.walk_forward(&symbol, date, false)
            .await
            .map_err(|err| match err {
                PerformanceError::InvalidTicker { symbol } => {
                    PerformanceError::InvalidBenchmark { symbol }
                }
                other => other,
            })
    }

    /// Close on `date`, or on the first session within `max_forward_days` after it.
    ///
    /// When no session turns up at all, the provider is asked once per run whether the symbol is
    /// listed; an unlisted symbol fails with `InvalidTicker` instead of `PriceUnavailable`.
    pub async fn resolve(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<ResolvedPrice, PerformanceError> {
        self.walk_forward(symbol, date, true).await
    }

    async fn walk_forward(
        &self,
        symbol: &str,
        date: NaiveDate,
        check_listing: bool,
    ) -> Result<ResolvedPrice, PerformanceError> {
        let symbol = normalize_ticker(symbol).ok_or_else(|| PerformanceError::InvalidTicker {
            symbol: symbol.trim().to_string(),
        })?;

        if self.cache.is_rejected(&symbol).await {
            return Err(PerformanceError::InvalidTicker { symbol });
        }

        for offset in 0..=self.options.max_forward_days {
            let Some(day) = date.checked_add_days(Days::new(u64::from(offset))) else {
                break;
            };
            if let Some(price) = self.close_on(&symbol, day).await? {
                return Ok(ResolvedPrice {
                    symbol,
                    price,
                    requested_date: date,
                    resolved_date: day,
                });
            }
        }

        if check_listing {
            self.ensure_listed(&symbol).await?;
        }

        Err(PerformanceError::PriceUnavailable {
            symbol,
            date,
            max_forward_days: self.options.max_forward_days,
        })
    }

    async fn ensure_listed(&self, symbol: &str) -> Result<(), PerformanceError> {
        if self.cache.is_listed(symbol).await {
            return Ok(());
        }

        let provider = &self.provider;
        match self.with_retry(symbol, || provider.is_listed(symbol)).await {
            Ok(true) => {
                self.cache.mark_listed(symbol).await;
                Ok(())
            }
            Ok(false) => {
                tracing::warn!(%symbol, "provider does not list symbol");
                self.cache.mark_rejected(symbol).await;
                Err(PerformanceError::InvalidTicker {
                    symbol: symbol.to_string(),
                })
            }
            Err(err) => Err(self.classify(symbol, err).await),
        }
    }

    async fn close_on(
        &self,
        symbol: &str,
        day: NaiveDate,
    ) -> Result<Option<f64>, PerformanceError> {
        if let Some(cached) = self.cache.get(symbol, day).await {
            return Ok(cached);
        }

        if is_weekend(day) {
            self.cache.insert(symbol, day, None).await;
            return Ok(None);
        }

        let provider = &self.provider;
        match self.with_retry(symbol, || provider.daily_close(symbol, day)).await {
            Ok(close) => {
                self.cache.insert(symbol, day, close).await;
                Ok(close)
            }
            Err(err) => Err(self.classify(symbol, err).await),
        }
    }

    async fn classify(&self, symbol: &str, err: ProviderError) -> PerformanceError {
        match err {
            ProviderError::InvalidSymbol(detail) => {
                tracing::warn!(%symbol, %detail, "provider rejected symbol");
                self.cache.mark_rejected(symbol).await;
                PerformanceError::InvalidTicker {
                    symbol: symbol.to_string(),
                }
            }
            ProviderError::Transient(detail) => PerformanceError::ProviderTransient {
                symbol: symbol.to_string(),
                attempts: self.options.retries.max(1),
                detail,
            },
        }
    }

    async fn with_retry<T, F, Fut>(&self, symbol: &str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let retries = self.options.retries.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match call().await {
                Err(ProviderError::Transient(detail)) if attempt < retries => {
                    let backoff = backoff_delay(self.options.backoff, attempt);
                    tracing::warn!(
                        attempt,
                        ?backoff,
                        %symbol,
                        provider = self.provider.provider_name(),
                        error = %detail,
                        "market data request failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }
}

/// `base * 2^(attempt - 1)`, saturating at [`MAX_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.checked_mul(factor)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{d, resolver_with, FixedProvider};

    #[tokio::test]
    async fn trading_day_resolves_to_itself() {
        let provider = FixedProvider::new().with_close("AAPL", d(2024, 1, 2), 185.64);
        let resolver = resolver_with(provider);
        let p = resolver.resolve("aapl", d(2024, 1, 2)).await.unwrap();
        assert_eq!(p.price, 185.64);
        assert_eq!(p.resolved_date, d(2024, 1, 2));
        assert_eq!(p.symbol, "AAPL");
    }

    #[tokio::test]
    async fn weekend_walks_forward_to_monday() {
        // 2024-01-06 is a Saturday.
        let provider = FixedProvider::new().with_close("AAPL", d(2024, 1, 8), 185.56);
        let resolver = resolver_with(provider);
        let p = resolver.resolve("AAPL", d(2024, 1, 6)).await.unwrap();
        assert_eq!(p.resolved_date, d(2024, 1, 8));
        assert_eq!(p.requested_date, d(2024, 1, 6));
    }

    #[tokio::test]
    async fn gives_up_after_forward_cap() {
        let provider = FixedProvider::new().with_close("AAPL", d(2024, 1, 12), 1.0);
        let resolver = resolver_with(provider);
        let err = resolver.resolve("AAPL", d(2024, 1, 2)).await.unwrap_err();
        assert!(matches!(err, PerformanceError::PriceUnavailable { max_forward_days: 5, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn cache_avoids_repeat_provider_calls() {
        let provider = Arc::new(FixedProvider::new().with_close("MSFT", d(2024, 1, 2), 370.87));
        let resolver = PriceResolver::new(
            provider.clone(),
            PriceCache::new(),
            crate::test_support::fast_options(),
        );
        for _ in 0..3 {
            resolver.resolve("MSFT", d(2024, 1, 2)).await.unwrap();
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn seeded_cache_skips_provider_entirely() {
        let provider = Arc::new(FixedProvider::new());
        let cache = PriceCache::from_table([("SPY", d(2024, 1, 2), 472.65)]);
        let resolver =
            PriceResolver::new(provider.clone(), cache, crate::test_support::fast_options());
        let p = resolver.resolve_benchmark(Benchmark::Sp500, d(2024, 1, 2)).await.unwrap();
        assert_eq!(p.price, 472.65);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let provider = FixedProvider::new()
            .with_close("SAP.DE", d(2024, 1, 2), 140.0)
            .failing_transiently(2);
        let resolver = resolver_with(provider);
        let p = resolver.resolve("SAP.DE", d(2024, 1, 2)).await.unwrap();
        assert_eq!(p.price, 140.0);
    }

    #[tokio::test]
    async fn persistent_transient_errors_surface_after_retries() {
        let provider = FixedProvider::new()
            .with_close("SAP.DE", d(2024, 1, 2), 140.0)
            .failing_transiently(10);
        let resolver = resolver_with(provider);
        let err = resolver.resolve("SAP.DE", d(2024, 1, 2)).await.unwrap_err();
        assert!(matches!(err, PerformanceError::ProviderTransient { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn rejected_symbols_are_remembered() {
        let provider = Arc::new(FixedProvider::new().rejecting("NOPE"));
        let resolver = PriceResolver::new(
            provider.clone(),
            PriceCache::new(),
            crate::test_support::fast_options(),
        );
        for _ in 0..2 {
            let err = resolver.resolve("NOPE", d(2024, 1, 2)).await.unwrap_err();
            assert_eq!(err, PerformanceError::InvalidTicker { symbol: "NOPE".into() });
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_ticker_never_reaches_provider() {
        let provider = Arc::new(FixedProvider::new());
        let resolver = PriceResolver::new(
            provider.clone(),
            PriceCache::new(),
            crate::test_support::fast_options(),
        );
        let err = resolver.resolve("not a ticker", d(2024, 1, 2)).await.unwrap_err();
        assert!(matches!(err, PerformanceError::InvalidTicker { .. }));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn unlisted_symbol_is_an_invalid_ticker() {
        let provider = Arc::new(FixedProvider::new().unlisted("ZZZQ"));
        let resolver = PriceResolver::new(
            provider.clone(),
            PriceCache::new(),
            crate::test_support::fast_options(),
        );

        let err = resolver.resolve("ZZZQ", d(2024, 1, 2)).await.unwrap_err();
        assert_eq!(err, PerformanceError::InvalidTicker { symbol: "ZZZQ".into() });
        assert!(!err.is_retryable());
        assert!(resolver.cache().is_rejected("ZZZQ").await);

        let calls = provider.calls();
        resolver.resolve("ZZZQ", d(2024, 2, 1)).await.unwrap_err();
        assert_eq!(provider.calls(), calls);
        assert_eq!(provider.listing_checks(), 1);
    }

    #[tokio::test]
    async fn listed_symbol_without_data_stays_retryable_and_is_checked_once() {
        let provider = Arc::new(FixedProvider::new());
        let resolver = PriceResolver::new(
            provider.clone(),
            PriceCache::new(),
            crate::test_support::fast_options(),
        );

        for start in [d(2024, 1, 2), d(2024, 3, 4)] {
            let err = resolver.resolve("AAPL", start).await.unwrap_err();
            assert!(matches!(err, PerformanceError::PriceUnavailable { .. }));
        }
        assert_eq!(provider.listing_checks(), 1);
    }

    #[tokio::test]
    async fn rejected_benchmark_is_not_an_invalid_ticker() {
        let provider = Arc::new(FixedProvider::new().rejecting("DAX").unlisted("SPY"));
        let resolver = PriceResolver::new(
            provider.clone(),
            PriceCache::new(),
            crate::test_support::fast_options(),
        );

        let err = resolver
            .resolve_benchmark(Benchmark::Dax, d(2024, 1, 2))
            .await
            .unwrap_err();
        assert_eq!(err, PerformanceError::InvalidBenchmark { symbol: "DAX".into() });
        assert!(err.is_retryable());

        // Benchmarks skip the listing check; a gap in index data is just a gap.
        let err = resolver
            .resolve_benchmark(Benchmark::Sp500, d(2024, 1, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, PerformanceError::PriceUnavailable { .. }));
        assert_eq!(provider.listing_checks(), 0);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(Duration::from_secs(u64::MAX), 2), MAX_BACKOFF);
        assert_eq!(backoff_delay(Duration::from_secs(45), 2), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn benchmark_symbols_follow_options() {
        let resolver = resolver_with(FixedProvider::new());
        assert_eq!(resolver.benchmark_symbol(Benchmark::Sp500), "SPY");
        assert_eq!(resolver.benchmark_symbol(Benchmark::Dax), "DAX");
    }
}
