use crate::domain::horizon::Horizon;
use crate::domain::recommendation::Benchmark;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Forward performance of a single recommendation. One row per recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub recommendation_id: Uuid,
    pub benchmark: Benchmark,
    pub reference: Option<ReferencePoint>,
    pub horizons: BTreeMap<Horizon, HorizonOutcome>,
    pub state: ScoringState,
    pub updated_at: DateTime<Utc>,
}

/// Entry price and benchmark level at the recommendation date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub price: f64,
    pub price_date: NaiveDate,
    pub benchmark_level: f64,
    pub benchmark_date: NaiveDate,
}

/// A scored horizon. Returns and score are only ever set together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonOutcome {
    pub stock_return: f64,
    pub benchmark_return: f64,
    pub score: f64,
}

impl HorizonOutcome {
    pub fn relative_return(&self) -> f64 {
        self.stock_return - self.benchmark_return
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ScoringState {
    Active,
    /// Provider rejected the symbol. Never retried.
    Unscoreable(String),
    /// Data corruption (e.g. zero reference price). Waits for manual review.
    NeedsReview(String),
}

impl ScoringState {
    pub fn status_str(&self) -> &'static str {
        match self {
            ScoringState::Active => "active",
            ScoringState::Unscoreable(_) => "unscoreable",
            ScoringState::NeedsReview(_) => "needs_review",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ScoringState::Active => None,
            ScoringState::Unscoreable(r) | ScoringState::NeedsReview(r) => Some(r),
        }
    }

    pub fn from_parts(status: &str, reason: Option<String>) -> anyhow::Result<Self> {
        let reason = reason.unwrap_or_default();
        match status {
            "active" => Ok(ScoringState::Active),
            "unscoreable" => Ok(ScoringState::Unscoreable(reason)),
            "needs_review" => Ok(ScoringState::NeedsReview(reason)),
            other => anyhow::bail!("unknown performance status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringProgress {
    Pending,
    PartiallyScored,
    FullyScored,
}

impl PerformanceRecord {
    pub fn new(recommendation_id: Uuid, benchmark: Benchmark, now: DateTime<Utc>) -> Self {
        Self {
            recommendation_id,
            benchmark,
            reference: None,
            horizons: BTreeMap::new(),
            state: ScoringState::Active,
            updated_at: now,
        }
    }

    pub fn is_scored(&self, horizon: Horizon) -> bool {
        self.horizons.contains_key(&horizon)
    }

    pub fn progress(&self) -> ScoringProgress {
        match self.horizons.len() {
            0 => ScoringProgress::Pending,
            n if n == Horizon::ALL.len() => ScoringProgress::FullyScored,
            _ => ScoringProgress::PartiallyScored,
        }
    }

    /// Whether a recompute run could still change this record.
    pub fn needs_work(&self) -> bool {
        self.state == ScoringState::Active && self.progress() != ScoringProgress::FullyScored
    }

    /// The most mature scored horizon, used as the pick's score for ranking.
    pub fn pick(&self) -> Option<(Horizon, &HorizonOutcome)> {
        self.horizons.iter().next_back().map(|(h, o)| (*h, o))
    }

    pub fn pick_score(&self) -> Option<f64> {
        self.pick().map(|(_, o)| o.score)
    }
}
