use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Run-scoped lookups shared by all workers of one recompute run.
///
/// Entries hold the close for a (symbol, date) pair, or `None` when the provider reported no
/// session on that date. Dropped with the run; nothing persists across runs.
#[derive(Debug, Default)]
pub struct PriceCache {
    closes: RwLock<HashMap<(String, NaiveDate), Option<f64>>>,
    rejected: RwLock<HashSet<String>>,
    listed: RwLock<HashSet<String>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the cache with a fixed table. Dates missing from the table are still asked of the
    /// provider.
    pub fn from_table<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (S, NaiveDate, f64)>,
        S: Into<String>,
    {
        let closes = rows
            .into_iter()
            .map(|(symbol, date, close)| ((symbol.into(), date), Some(close)))
            .collect();
        Self {
            closes: RwLock::new(closes),
            rejected: RwLock::new(HashSet::new()),
            listed: RwLock::new(HashSet::new()),
        }
    }

    /// `None`: never looked up. `Some(None)`: known non-trading day.
    pub async fn get(&self, symbol: &str, date: NaiveDate) -> Option<Option<f64>> {
        self.closes
            .read()
            .await
            .get(&(symbol.to_string(), date))
            .copied()
    }

    pub async fn insert(&self, symbol: &str, date: NaiveDate, close: Option<f64>) {
        self.closes
            .write()
            .await
            .insert((symbol.to_string(), date), close);
    }

    pub async fn is_rejected(&self, symbol: &str) -> bool {
        self.rejected.read().await.contains(symbol)
    }

    pub async fn mark_rejected(&self, symbol: &str) {
        self.rejected.write().await.insert(symbol.to_string());
    }

    /// Symbols the provider has confirmed as listed during this run.
    pub async fn is_listed(&self, symbol: &str) -> bool {
        self.listed.read().await.contains(symbol)
    }

    pub async fn mark_listed(&self, symbol: &str) {
        self.listed.write().await.insert(symbol.to_string());
    }

    pub async fn len(&self) -> usize {
        self.closes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
