pub mod cache;
pub mod polygon;
pub mod resolver;

use chrono::NaiveDate;
use thiserror::Error;

pub use cache::PriceCache;
pub use resolver::{PriceResolver, ResolvedPrice, ResolverOptions};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("symbol rejected by provider: {0}")]
    InvalidSymbol(String),

    /// Worth retrying: network failure, rate limit, 5xx.
    #[error("transient provider error: {0}")]
    Transient(String),
}

/// Daily close lookup against a market-data vendor.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Close of `symbol` on exactly `date`; `Ok(None)` if there was no session that day.
    async fn daily_close(&self, symbol: &str, date: NaiveDate)
        -> Result<Option<f64>, ProviderError>;

    /// Whether the vendor knows `symbol` at all. Asked only after a forward walk found no
    /// session, to tell an unknown ticker apart from a gap in the data.
    async fn is_listed(&self, _symbol: &str) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
