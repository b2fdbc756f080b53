use crate::domain::performance::PerformanceRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Scored picks a creator needs before appearing in the public ranking.
pub const MINIMUM_PICKS_REQUIRED: usize = 20;

const PICK_SCORE_WEIGHT: f64 = 0.6;
const HIT_RATE_WEIGHT: f64 = 0.4;

/// Aggregate accuracy of one creator. Derived from performance records; never a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatorScore {
    pub creator_id: Uuid,
    pub total_picks: usize,
    pub hit_rate: Option<f64>,
    pub avg_outperformance: Option<f64>,
    pub overall_score: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl CreatorScore {
    pub fn is_eligible(&self) -> bool {
        self.total_picks >= MINIMUM_PICKS_REQUIRED && self.overall_score.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub creator_id: Uuid,
    pub overall_score: f64,
    pub hit_rate: f64,
    pub avg_outperformance: Option<f64>,
    pub total_picks: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    pub items: Vec<RankingEntry>,
    pub minimum_picks_required: usize,
}

/// Folds a creator's performance records into a single score.
///
/// Each recommendation contributes its most mature scored horizon. Recommendations without any
/// scored horizon are left out rather than counted as zero.
pub fn aggregate(creator_id: Uuid, records: &[PerformanceRecord], now: DateTime<Utc>) -> CreatorScore {
    let picks: Vec<(f64, f64)> = records
        .iter()
        .filter_map(|r| r.pick())
        .map(|(_, outcome)| (outcome.score, outcome.relative_return()))
        .collect();

    if picks.is_empty() {
        return CreatorScore {
            creator_id,
            total_picks: 0,
            hit_rate: None,
            avg_outperformance: None,
            overall_score: None,
            updated_at: now,
        };
    }

    let n = picks.len() as f64;
    let hits = picks.iter().filter(|(_, rel)| *rel > 0.0).count() as f64;
    let hit_rate = hits / n;
    let avg_pick_score = picks.iter().map(|(s, _)| s).sum::<f64>() / n;
    let avg_outperformance = picks.iter().map(|(_, rel)| rel).sum::<f64>() / n;

    CreatorScore {
        creator_id,
        total_picks: picks.len(),
        hit_rate: Some(hit_rate),
        avg_outperformance: Some(avg_outperformance),
        overall_score: Some(overall_score(avg_pick_score, hit_rate)),
        updated_at: now,
    }
}

pub fn overall_score(avg_pick_score: f64, hit_rate: f64) -> f64 {
    avg_pick_score * PICK_SCORE_WEIGHT + hit_rate * HIT_RATE_WEIGHT
}

/// Builds the public ranking: eligible creators only, by overall score, then pick count, then
/// creator id so repeated runs over the same inputs produce the same order.
pub fn rank(scores: &[CreatorScore]) -> Ranking {
    let mut eligible: Vec<&CreatorScore> = scores.iter().filter(|s| s.is_eligible()).collect();
    eligible.sort_by(|a, b| compare_for_ranking(a, b));

    let items = eligible
        .into_iter()
        .enumerate()
        .map(|(idx, s)| RankingEntry {
            rank: idx + 1,
            creator_id: s.creator_id,
            overall_score: s.overall_score.unwrap_or_default(),
            hit_rate: s.hit_rate.unwrap_or_default(),
            avg_outperformance: s.avg_outperformance,
            total_picks: s.total_picks,
            updated_at: s.updated_at,
        })
        .collect();

    Ranking {
        items,
        minimum_picks_required: MINIMUM_PICKS_REQUIRED,
    }
}

fn compare_for_ranking(a: &CreatorScore, b: &CreatorScore) -> Ordering {
    let a_score = a.overall_score.unwrap_or(f64::NEG_INFINITY);
    let b_score = b.overall_score.unwrap_or(f64::NEG_INFINITY);
    b_score
        .total_cmp(&a_score)
        .then_with(|| b.total_picks.cmp(&a.total_picks))
        .then_with(|| a.creator_id.cmp(&b.creator_id))
}

#[async_trait::async_trait]
pub trait ScoreRepository: Send + Sync {
    /// Every creator with the performance records of their recommendations (possibly none).
    async fn load_creator_records(&self) -> anyhow::Result<BTreeMap<Uuid, Vec<PerformanceRecord>>>;

    async fn save_creator_scores(&self, scores: &[CreatorScore]) -> anyhow::Result<()>;
}

/// Recomputes every creator's score from scratch, persists all of them and returns the ranking.
pub async fn run_ranking(
    repository: &dyn ScoreRepository,
    now: DateTime<Utc>,
) -> anyhow::Result<Ranking> {
    let by_creator = repository.load_creator_records().await?;
    let scores: Vec<CreatorScore> = by_creator
        .iter()
        .map(|(creator_id, records)| aggregate(*creator_id, records, now))
        .collect();

    repository.save_creator_scores(&scores).await?;

    let ranking = rank(&scores);
    tracing::info!(
        creators = scores.len(),
        eligible = ranking.items.len(),
        minimum_picks_required = MINIMUM_PICKS_REQUIRED,
        "ranking recomputed"
    );
    Ok(ranking)
}
