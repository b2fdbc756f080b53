use crate::domain::horizon::Horizon;
use crate::domain::performance::{HorizonOutcome, PerformanceRecord, ReferencePoint, ScoringState};
use crate::domain::recommendation::{Direction, Market, Recommendation};
use crate::performance::job::{PerformanceRepository, WorkItem};
use crate::ranking::{CreatorScore, ScoreRepository};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use uuid::Uuid;

const PERFORMANCE_COLUMNS: &str = "recommendation_id, benchmark, status, status_reason, \
     price_at_recommendation, price_date, benchmark_level, benchmark_date, \
     return_1w, benchmark_return_1w, score_1w, \
     return_1m, benchmark_return_1m, score_1m, \
     return_3m, benchmark_return_3m, score_3m, \
     return_6m, benchmark_return_6m, score_6m, \
     return_12m, benchmark_return_12m, score_12m, \
     score, updated_at";

pub(crate) const RECOMMENDATION_COLUMNS: &str = "r.id, r.episode_id, e.creator_id, r.ticker, \
     r.company_name, r.type::text AS direction, r.confidence, r.sentence, r.recommendation_date, r.market";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RecommendationRow {
    id: Uuid,
    episode_id: Uuid,
    creator_id: Uuid,
    ticker: String,
    company_name: Option<String>,
    direction: String,
    confidence: Option<f64>,
    sentence: Option<String>,
    recommendation_date: Option<NaiveDate>,
    market: String,
}

impl RecommendationRow {
    /// `None` for undated picks, which cannot be evaluated.
    pub(crate) fn into_recommendation(self) -> anyhow::Result<Option<Recommendation>> {
        let Some(recommendation_date) = self.recommendation_date else {
            return Ok(None);
        };
        Ok(Some(Recommendation {
            id: self.id,
            episode_id: self.episode_id,
            creator_id: self.creator_id,
            ticker: self.ticker.trim().to_ascii_uppercase(),
            company_name: self.company_name,
            direction: self.direction.parse::<Direction>()?,
            confidence: self.confidence,
            sentence: self.sentence,
            recommendation_date,
            market: self.market.parse::<Market>()?,
        }))
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PerformanceRow {
    recommendation_id: Uuid,
    benchmark: String,
    status: String,
    status_reason: Option<String>,
    price_at_recommendation: Option<f64>,
    price_date: Option<NaiveDate>,
    benchmark_level: Option<f64>,
    benchmark_date: Option<NaiveDate>,
    return_1w: Option<f64>,
    benchmark_return_1w: Option<f64>,
    score_1w: Option<f64>,
    return_1m: Option<f64>,
    benchmark_return_1m: Option<f64>,
    score_1m: Option<f64>,
    return_3m: Option<f64>,
    benchmark_return_3m: Option<f64>,
    score_3m: Option<f64>,
    return_6m: Option<f64>,
    benchmark_return_6m: Option<f64>,
    score_6m: Option<f64>,
    return_12m: Option<f64>,
    benchmark_return_12m: Option<f64>,
    score_12m: Option<f64>,
    updated_at: DateTime<Utc>,
}

impl PerformanceRow {
    fn horizon_columns(&self, horizon: Horizon) -> (Option<f64>, Option<f64>, Option<f64>) {
        match horizon {
            Horizon::OneWeek => (self.return_1w, self.benchmark_return_1w, self.score_1w),
            Horizon::OneMonth => (self.return_1m, self.benchmark_return_1m, self.score_1m),
            Horizon::ThreeMonths => (self.return_3m, self.benchmark_return_3m, self.score_3m),
            Horizon::SixMonths => (self.return_6m, self.benchmark_return_6m, self.score_6m),
            Horizon::TwelveMonths => (self.return_12m, self.benchmark_return_12m, self.score_12m),
        }
    }

    pub(crate) fn into_record(self) -> anyhow::Result<PerformanceRecord> {
        let mut horizons = BTreeMap::new();
        for horizon in Horizon::ALL {
            if let (Some(stock_return), Some(benchmark_return), Some(score)) =
                self.horizon_columns(horizon)
            {
                horizons.insert(
                    horizon,
                    HorizonOutcome {
                        stock_return,
                        benchmark_return,
                        score,
                    },
                );
            }
        }

        let reference = match (
            self.price_at_recommendation,
            self.price_date,
            self.benchmark_level,
            self.benchmark_date,
        ) {
            (Some(price), Some(price_date), Some(benchmark_level), Some(benchmark_date)) => {
                Some(ReferencePoint {
                    price,
                    price_date,
                    benchmark_level,
                    benchmark_date,
                })
            }
            _ => None,
        };

        Ok(PerformanceRecord {
            recommendation_id: self.recommendation_id,
            benchmark: self.benchmark.parse()?,
            reference,
            horizons,
            state: ScoringState::from_parts(&self.status, self.status_reason)?,
            updated_at: self.updated_at,
        })
    }
}

/// Upsert that refuses to overwrite a horizon once its score is set.
fn upsert_performance_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        let placeholders = (1..=25).map(|i| format!("${i}")).collect::<Vec<_>>().join(", ");
        let mut sets = vec![
            "benchmark = EXCLUDED.benchmark".to_string(),
            "status = EXCLUDED.status".to_string(),
            "status_reason = EXCLUDED.status_reason".to_string(),
            "price_at_recommendation = COALESCE(performance.price_at_recommendation, EXCLUDED.price_at_recommendation)".to_string(),
            "price_date = COALESCE(performance.price_date, EXCLUDED.price_date)".to_string(),
            "benchmark_level = COALESCE(performance.benchmark_level, EXCLUDED.benchmark_level)".to_string(),
            "benchmark_date = COALESCE(performance.benchmark_date, EXCLUDED.benchmark_date)".to_string(),
        ];
        for h in Horizon::ALL {
            let l = h.label();
            for col in [format!("return_{l}"), format!("benchmark_return_{l}"), format!("score_{l}")] {
                sets.push(format!(
                    "{col} = CASE WHEN performance.score_{l} IS NULL THEN EXCLUDED.{col} ELSE performance.{col} END"
                ));
            }
        }
        sets.push("score = EXCLUDED.score".to_string());
        sets.push("updated_at = EXCLUDED.updated_at".to_string());

        format!(
            "INSERT INTO performance ({PERFORMANCE_COLUMNS}) VALUES ({placeholders}) \
             ON CONFLICT (recommendation_id) DO UPDATE SET {}",
            sets.join(", ")
        )
    })
}

#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: sqlx::PgPool,
}

impl PgRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

pub async fn fetch_records(
    pool: &sqlx::PgPool,
    recommendation_ids: &[Uuid],
) -> anyhow::Result<HashMap<Uuid, PerformanceRecord>> {
    if recommendation_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query_as::<_, PerformanceRow>(&format!(
        "SELECT {PERFORMANCE_COLUMNS} FROM performance WHERE recommendation_id = ANY($1)"
    ))
    .persistent(false)
    .bind(recommendation_ids)
    .fetch_all(pool)
    .await
    .context("select performance failed")?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in rows {
        let record = row.into_record()?;
        out.insert(record.recommendation_id, record);
    }
    Ok(out)
}

pub async fn fetch_record(
    pool: &sqlx::PgPool,
    recommendation_id: Uuid,
) -> anyhow::Result<Option<PerformanceRecord>> {
    Ok(fetch_records(pool, &[recommendation_id])
        .await?
        .remove(&recommendation_id))
}

#[async_trait::async_trait]
impl PerformanceRepository for PgRepository {
    async fn load_work(&self, as_of: NaiveDate) -> anyhow::Result<Vec<WorkItem>> {
        let rows = sqlx::query_as::<_, RecommendationRow>(&format!(
            "SELECT {RECOMMENDATION_COLUMNS} \
             FROM recommendations r \
             JOIN episodes e ON e.id = r.episode_id \
             LEFT JOIN performance p ON p.recommendation_id = r.id \
             WHERE r.recommendation_date IS NOT NULL \
               AND r.recommendation_date <= $1 \
               AND (p.id IS NULL OR (p.status = 'active' AND ( \
                    p.score_1w IS NULL OR p.score_1m IS NULL OR p.score_3m IS NULL \
                    OR p.score_6m IS NULL OR p.score_12m IS NULL))) \
             ORDER BY r.recommendation_date ASC, r.id ASC"
        ))
        .persistent(false)
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .context("select recommendations needing performance failed")?;

        let mut recommendations = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(rec) = row.into_recommendation()? {
                recommendations.push(rec);
            }
        }

        let ids: Vec<Uuid> = recommendations.iter().map(|r| r.id).collect();
        let mut records = fetch_records(&self.pool, &ids).await?;

        Ok(recommendations
            .into_iter()
            .map(|recommendation| {
                let record = records.remove(&recommendation.id);
                WorkItem {
                    recommendation,
                    record,
                }
            })
            .filter(|w| w.record.as_ref().map_or(true, PerformanceRecord::needs_work))
            .collect())
    }

    async fn save_performance(&self, record: &PerformanceRecord) -> anyhow::Result<()> {
        let mut query = sqlx::query(upsert_performance_sql())
            .persistent(false)
            .bind(record.recommendation_id)
            .bind(record.benchmark.as_str())
            .bind(record.state.status_str())
            .bind(record.state.reason())
            .bind(record.reference.map(|r| r.price))
            .bind(record.reference.map(|r| r.price_date))
            .bind(record.reference.map(|r| r.benchmark_level))
            .bind(record.reference.map(|r| r.benchmark_date));

        for horizon in Horizon::ALL {
            let outcome = record.horizons.get(&horizon);
            query = query
                .bind(outcome.map(|o| o.stock_return))
                .bind(outcome.map(|o| o.benchmark_return))
                .bind(outcome.map(|o| o.score));
        }

        query
            .bind(record.pick_score())
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
            .with_context(|| {
                format!(
                    "upsert performance failed (recommendation_id={})",
                    record.recommendation_id
                )
            })?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ScoreRepository for PgRepository {
    async fn load_creator_records(&self) -> anyhow::Result<BTreeMap<Uuid, Vec<PerformanceRecord>>> {
        let creator_ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM creators")
            .persistent(false)
            .fetch_all(&self.pool)
            .await
            .context("select creators failed")?;

        let mut out: BTreeMap<Uuid, Vec<PerformanceRecord>> =
            creator_ids.into_iter().map(|id| (id, Vec::new())).collect();

        let owners: Vec<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT p.recommendation_id, e.creator_id \
             FROM performance p \
             JOIN recommendations r ON r.id = p.recommendation_id \
             JOIN episodes e ON e.id = r.episode_id \
             WHERE p.score IS NOT NULL",
        )
        .persistent(false)
        .fetch_all(&self.pool)
        .await
        .context("select scored performance owners failed")?;

        let ids: Vec<Uuid> = owners.iter().map(|(rec_id, _)| *rec_id).collect();
        let mut records = fetch_records(&self.pool, &ids).await?;

        for (recommendation_id, creator_id) in owners {
            if let Some(record) = records.remove(&recommendation_id) {
                out.entry(creator_id).or_default().push(record);
            }
        }
        Ok(out)
    }

    async fn save_creator_scores(&self, scores: &[CreatorScore]) -> anyhow::Result<()> {
        if scores.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        let chunk_size: usize = std::env::var("CREATOR_SCORES_UPSERT_BATCH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(500)
            .max(1);

        let mut affected: u64 = 0;
        for chunk in scores.chunks(chunk_size) {
            let mut totals = Vec::with_capacity(chunk.len());
            for s in chunk {
                totals.push(
                    i32::try_from(s.total_picks)
                        .with_context(|| format!("total_picks out of range for {}", s.creator_id))?,
                );
            }

            let mut qb = sqlx::QueryBuilder::new(
                "INSERT INTO creator_scores (creator_id, total_picks, hit_rate, avg_outperformance, overall_score, updated_at) ",
            );
            qb.push_values(chunk.iter().zip(totals), |mut b, (s, total)| {
                b.push_bind(s.creator_id)
                    .push_bind(total)
                    .push_bind(s.hit_rate)
                    .push_bind(s.avg_outperformance)
                    .push_bind(s.overall_score)
                    .push_bind(s.updated_at);
            });
            qb.push(
                " ON CONFLICT (creator_id) DO UPDATE \
                   SET total_picks = EXCLUDED.total_picks, hit_rate = EXCLUDED.hit_rate, \
                       avg_outperformance = EXCLUDED.avg_outperformance, \
                       overall_score = EXCLUDED.overall_score, updated_at = EXCLUDED.updated_at",
            );

            let res = qb
                .build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .context("batch upsert creator_scores failed")?;
            affected += res.rows_affected();
        }

        tx.commit().await.context("commit transaction failed")?;
        tracing::debug!(affected, "creator_scores upserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_binds_match_columns() {
        let sql = upsert_performance_sql();
        let columns = PERFORMANCE_COLUMNS.split(',').count();
        assert_eq!(columns, 25);
        assert!(sql.contains("$25"));
        assert!(!sql.contains("$26"));
        assert!(sql.contains(
            "score_3m = CASE WHEN performance.score_3m IS NULL THEN EXCLUDED.score_3m ELSE performance.score_3m END"
        ));
    }
}
