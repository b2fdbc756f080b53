use crate::domain::performance::PerformanceRecord;
use crate::domain::recommendation::{Direction, Recommendation};
use crate::ranking::CreatorScore;
use crate::storage::performance::{fetch_records, RecommendationRow, RECOMMENDATION_COLUMNS};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Creator {
    pub id: Uuid,
    pub name: String,
    pub platform: String,
    pub rss_url: Option<String>,
    pub youtube_channel_id: Option<String>,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatorWithScore {
    #[serde(flatten)]
    pub creator: Creator,
    pub score: Option<CreatorScore>,
}

#[derive(Debug, sqlx::FromRow)]
struct CreatorScoreRow {
    id: Uuid,
    name: String,
    platform: String,
    rss_url: Option<String>,
    youtube_channel_id: Option<String>,
    language: String,
    created_at: DateTime<Utc>,
    total_picks: Option<i32>,
    hit_rate: Option<f64>,
    avg_outperformance: Option<f64>,
    overall_score: Option<f64>,
    score_updated_at: Option<DateTime<Utc>>,
}

impl From<CreatorScoreRow> for CreatorWithScore {
    fn from(row: CreatorScoreRow) -> Self {
        let score = match (row.total_picks, row.score_updated_at) {
            (Some(total_picks), Some(updated_at)) => Some(CreatorScore {
                creator_id: row.id,
                total_picks: usize::try_from(total_picks).unwrap_or(0),
                hit_rate: row.hit_rate,
                avg_outperformance: row.avg_outperformance,
                overall_score: row.overall_score,
                updated_at,
            }),
            _ => None,
        };
        CreatorWithScore {
            creator: Creator {
                id: row.id,
                name: row.name,
                platform: row.platform,
                rss_url: row.rss_url,
                youtube_channel_id: row.youtube_channel_id,
                language: row.language,
                created_at: row.created_at,
            },
            score,
        }
    }
}

const CREATOR_WITH_SCORE_SELECT: &str =
    "SELECT c.id, c.name, c.platform, c.rss_url, c.youtube_channel_id, c.language, c.created_at, \
            s.total_picks, s.hit_rate, s.avg_outperformance, s.overall_score, s.updated_at AS score_updated_at \
     FROM creators c \
     LEFT JOIN creator_scores s ON s.creator_id = c.id";

pub async fn list_creators(
    pool: &sqlx::PgPool,
    language: Option<&str>,
) -> anyhow::Result<Vec<CreatorWithScore>> {
    let mut qb = QueryBuilder::<Postgres>::new(CREATOR_WITH_SCORE_SELECT);
    if let Some(language) = language {
        qb.push(" WHERE c.language = ").push_bind(language.to_string());
    }
    qb.push(" ORDER BY c.name ASC, c.id ASC");

    let rows = qb
        .build_query_as::<CreatorScoreRow>()
        .persistent(false)
        .fetch_all(pool)
        .await
        .context("select creators failed")?;
    Ok(rows.into_iter().map(CreatorWithScore::from).collect())
}

pub async fn get_creator(
    pool: &sqlx::PgPool,
    creator_id: Uuid,
) -> anyhow::Result<Option<CreatorWithScore>> {
    let row = sqlx::query_as::<_, CreatorScoreRow>(&format!(
        "{CREATOR_WITH_SCORE_SELECT} WHERE c.id = $1"
    ))
    .persistent(false)
    .bind(creator_id)
    .fetch_optional(pool)
    .await
    .context("select creator failed")?;
    Ok(row.map(CreatorWithScore::from))
}

/// A recommendation together with its performance record, if one exists yet.
#[derive(Debug, Clone, Serialize)]
pub struct Pick {
    pub recommendation: Recommendation,
    pub performance: Option<PerformanceRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct PickFilter {
    pub creator_id: Option<Uuid>,
    pub ticker: Option<String>,
    pub direction: Option<Direction>,
    pub page: u32,
    pub page_size: u32,
}

fn push_pick_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &PickFilter) {
    qb.push(
        " FROM recommendations r \
          JOIN episodes e ON e.id = r.episode_id \
          WHERE r.recommendation_date IS NOT NULL",
    );
    if let Some(creator_id) = filter.creator_id {
        qb.push(" AND e.creator_id = ").push_bind(creator_id);
    }
    if let Some(ticker) = &filter.ticker {
        qb.push(" AND r.ticker = ")
            .push_bind(ticker.trim().to_ascii_uppercase());
    }
    if let Some(direction) = filter.direction {
        qb.push(" AND r.type::text = ").push_bind(direction.as_str());
    }
}

/// One page of picks, newest first, plus the total matching the filter.
pub async fn list_picks(
    pool: &sqlx::PgPool,
    filter: &PickFilter,
) -> anyhow::Result<(Vec<Pick>, i64)> {
    let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
    push_pick_filters(&mut count_qb, filter);
    let total: i64 = count_qb
        .build_query_scalar()
        .persistent(false)
        .fetch_one(pool)
        .await
        .context("count recommendations failed")?;

    let page_size = i64::from(filter.page_size.max(1));
    let offset = i64::from(filter.page.max(1) - 1) * page_size;

    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {RECOMMENDATION_COLUMNS}"));
    push_pick_filters(&mut qb, filter);
    qb.push(" ORDER BY r.recommendation_date DESC, r.id ASC LIMIT ")
        .push_bind(page_size)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows = qb
        .build_query_as::<RecommendationRow>()
        .persistent(false)
        .fetch_all(pool)
        .await
        .context("select recommendations failed")?;

    let mut recommendations = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(rec) = row.into_recommendation()? {
            recommendations.push(rec);
        }
    }

    let ids: Vec<Uuid> = recommendations.iter().map(|r| r.id).collect();
    let mut records = fetch_records(pool, &ids).await?;

    let picks = recommendations
        .into_iter()
        .map(|recommendation| {
            let performance = records.remove(&recommendation.id);
            Pick {
                recommendation,
                performance,
            }
        })
        .collect();
    Ok((picks, total))
}

/// Records an operator has to look at: rejected tickers and corrupt reference data.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReviewItem {
    pub recommendation_id: Uuid,
    pub ticker: String,
    pub status: String,
    pub status_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub async fn list_review_queue(pool: &sqlx::PgPool) -> anyhow::Result<Vec<ReviewItem>> {
    sqlx::query_as::<_, ReviewItem>(
        "SELECT p.recommendation_id, r.ticker, p.status, p.status_reason, p.updated_at \
         FROM performance p \
         JOIN recommendations r ON r.id = p.recommendation_id \
         WHERE p.status <> 'active' \
         ORDER BY p.updated_at DESC, p.recommendation_id ASC",
    )
    .persistent(false)
    .fetch_all(pool)
    .await
    .context("select review queue failed")
}
