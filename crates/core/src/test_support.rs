//! Fixed price tables and in-memory stores for unit tests.

use crate::domain::performance::PerformanceRecord;
use crate::domain::recommendation::{Direction, Market, Recommendation};
use crate::performance::job::{PerformanceRepository, WorkItem};
use crate::pricing::{MarketDataProvider, PriceCache, PriceResolver, ProviderError, ResolverOptions};
use crate::ranking::{CreatorScore, ScoreRepository};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn fast_options() -> ResolverOptions {
    ResolverOptions {
        backoff: Duration::ZERO,
        ..ResolverOptions::default()
    }
}

pub fn resolver_with(provider: FixedProvider) -> PriceResolver {
    PriceResolver::new(Arc::new(provider), PriceCache::new(), fast_options())
}

pub fn recommendation(ticker: &str, date: NaiveDate, market: Market) -> Recommendation {
    Recommendation {
        id: Uuid::new_v4(),
        episode_id: Uuid::new_v4(),
        creator_id: Uuid::new_v4(),
        ticker: ticker.to_string(),
        company_name: None,
        direction: Direction::Buy,
        confidence: Some(0.9),
        sentence: None,
        recommendation_date: date,
        market,
    }
}

/// Provider backed by a fixed close table. Unknown dates are non-trading days.
#[derive(Debug, Default)]
pub struct FixedProvider {
    closes: HashMap<(String, NaiveDate), f64>,
    rejected: HashSet<String>,
    unlisted: HashSet<String>,
    broken: HashSet<(String, NaiveDate)>,
    transient_failures: AtomicU32,
    calls: AtomicUsize,
    listing_checks: AtomicUsize,
}

impl FixedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_close(mut self, symbol: &str, date: NaiveDate, close: f64) -> Self {
        self.closes.insert((symbol.to_string(), date), close);
        self
    }

    pub fn rejecting(mut self, symbol: &str) -> Self {
        self.rejected.insert(symbol.to_string());
        self
    }

    /// Aggregates come back empty and the listing check says the symbol does not exist.
    pub fn unlisted(mut self, symbol: &str) -> Self {
        self.unlisted.insert(symbol.to_string());
        self
    }

    /// Every lookup of `symbol` on `date` fails with a transient error.
    pub fn failing_on(mut self, symbol: &str, date: NaiveDate) -> Self {
        self.broken.insert((symbol.to_string(), date));
        self
    }

    /// The next `n` calls fail with a transient error.
    pub fn failing_transiently(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn listing_checks(&self) -> usize {
        self.listing_checks.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for FixedProvider {
    fn provider_name(&self) -> &'static str {
        "fixed"
    }

    async fn daily_close(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProviderError::Transient("HTTP 503".to_string()));
        }

        if self.broken.contains(&(symbol.to_string(), date)) {
            return Err(ProviderError::Transient("HTTP 502".to_string()));
        }
        if self.rejected.contains(symbol) {
            return Err(ProviderError::InvalidSymbol(symbol.to_string()));
        }
        Ok(self.closes.get(&(symbol.to_string(), date)).copied())
    }

    async fn is_listed(&self, symbol: &str) -> Result<bool, ProviderError> {
        self.listing_checks.fetch_add(1, Ordering::SeqCst);
        Ok(!self.unlisted.contains(symbol))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    recommendations: Vec<Recommendation>,
    records: Mutex<HashMap<Uuid, PerformanceRecord>>,
    creator_records: BTreeMap<Uuid, Vec<PerformanceRecord>>,
    scores: Mutex<BTreeMap<Uuid, CreatorScore>>,
    saves: AtomicUsize,
}

impl InMemoryRepository {
    pub fn with_recommendations(recs: impl IntoIterator<Item = Recommendation>) -> Self {
        Self {
            recommendations: recs.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_creator_records(mut self, creator_id: Uuid, records: Vec<PerformanceRecord>) -> Self {
        self.creator_records.insert(creator_id, records);
        self
    }

    pub fn record(&self, recommendation_id: Uuid) -> Option<PerformanceRecord> {
        self.records.lock().unwrap().get(&recommendation_id).cloned()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn creator_scores(&self) -> BTreeMap<Uuid, CreatorScore> {
        self.scores.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PerformanceRepository for InMemoryRepository {
    async fn load_work(&self, as_of: NaiveDate) -> anyhow::Result<Vec<WorkItem>> {
        let records = self.records.lock().unwrap();
        Ok(self
            .recommendations
            .iter()
            .filter(|r| r.recommendation_date <= as_of)
            .map(|r| WorkItem {
                recommendation: r.clone(),
                record: records.get(&r.id).cloned(),
            })
            .filter(|w| w.record.as_ref().map_or(true, PerformanceRecord::needs_work))
            .collect())
    }

    async fn save_performance(&self, record: &PerformanceRecord) -> anyhow::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .insert(record.recommendation_id, record.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ScoreRepository for InMemoryRepository {
    async fn load_creator_records(&self) -> anyhow::Result<BTreeMap<Uuid, Vec<PerformanceRecord>>> {
        let mut out = self.creator_records.clone();
        let records = self.records.lock().unwrap();
        for rec in &self.recommendations {
            let entry = out.entry(rec.creator_id).or_default();
            if let Some(record) = records.get(&rec.id) {
                entry.push(record.clone());
            }
        }
        Ok(out)
    }

    async fn save_creator_scores(&self, scores: &[CreatorScore]) -> anyhow::Result<()> {
        let mut stored = self.scores.lock().unwrap();
        for s in scores {
            stored.insert(s.creator_id, s.clone());
        }
        Ok(())
    }
}
