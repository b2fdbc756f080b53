use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PerformanceError {
    /// No trading session found within the forward-walk cap. Retried next run.
    #[error("no price for {symbol} within {max_forward_days} days after {date}")]
    PriceUnavailable {
        symbol: String,
        date: NaiveDate,
        max_forward_days: u32,
    },

    /// The provider does not know the symbol. Permanent.
    #[error("invalid ticker: {symbol}")]
    InvalidTicker { symbol: String },

    /// The configured benchmark symbol was rejected. A deployment problem, not a bad pick, so the
    /// horizon stays pending until the symbol is fixed.
    #[error("benchmark symbol rejected by provider: {symbol}")]
    InvalidBenchmark { symbol: String },

    /// Network, rate-limit or 5xx failure that outlived the in-run retries.
    #[error("market data provider failed for {symbol} after {attempts} attempts: {detail}")]
    ProviderTransient {
        symbol: String,
        attempts: u32,
        detail: String,
    },

    /// A reference price of zero. Treated as corrupt data.
    #[error("division by zero: reference price is 0")]
    DivisionByZero,
}

impl PerformanceError {
    /// Errors that leave the horizon pending for the next scheduled run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PerformanceError::PriceUnavailable { .. }
                | PerformanceError::ProviderTransient { .. }
                | PerformanceError::InvalidBenchmark { .. }
        )
    }
}
