use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use pickrank_core::domain::performance::{PerformanceRecord, ScoringProgress};
use pickrank_core::domain::recommendation::Direction;
use pickrank_core::ranking::{self, CreatorScore, MINIMUM_PICKS_REQUIRED};
use pickrank_core::storage::creators::{self, CreatorWithScore, Pick, PickFilter, ReviewItem};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

const DEFAULT_RANKING_LIMIT: u32 = 50;
const MAX_RANKING_LIMIT: u32 = 200;
const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct AppState {
    pub pool: Option<PgPool>,
    pub admin_api_key: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/ranking", get(get_ranking))
        .route("/api/creators", get(get_creators))
        .route("/api/creators/:id", get(get_creator))
        .route("/api/recommendations", get(get_recommendations))
        .route(
            "/api/recommendations/:id/performance",
            get(get_recommendation_performance),
        )
        .route("/api/admin/review", get(get_review_queue))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %format!("{e:#}"), "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn parse_id(raw: &str) -> Result<Uuid, StatusCode> {
    Uuid::parse_str(raw).map_err(|_| StatusCode::BAD_REQUEST)
}

#[derive(Debug, Default, Deserialize)]
struct RankingQuery {
    limit: Option<u32>,
    language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct RankingItem {
    rank: usize,
    creator_id: Uuid,
    name: String,
    platform: String,
    language: String,
    total_picks: usize,
    hit_rate: f64,
    avg_outperformance: Option<f64>,
    overall_score: f64,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct RankingResponse {
    items: Vec<RankingItem>,
    total: usize,
    minimum_picks_required: usize,
}

impl RankingResponse {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            minimum_picks_required: MINIMUM_PICKS_REQUIRED,
        }
    }
}

/// The public ranking never fails: storage problems are reported and an empty list is served.
async fn get_ranking(
    State(state): State<AppState>,
    Query(q): Query<RankingQuery>,
) -> Json<RankingResponse> {
    let Some(pool) = &state.pool else {
        return Json(RankingResponse::empty());
    };

    let language = q
        .language
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match creators::list_creators(pool, language).await {
        Ok(rows) => Json(build_ranking(rows, q.limit)),
        Err(e) => {
            let _ = internal_error(e);
            Json(RankingResponse::empty())
        }
    }
}

fn build_ranking(rows: Vec<CreatorWithScore>, limit: Option<u32>) -> RankingResponse {
    let limit = limit
        .unwrap_or(DEFAULT_RANKING_LIMIT)
        .clamp(1, MAX_RANKING_LIMIT) as usize;

    let scores: Vec<CreatorScore> = rows.iter().filter_map(|c| c.score.clone()).collect();
    let by_id: HashMap<Uuid, &CreatorWithScore> =
        rows.iter().map(|c| (c.creator.id, c)).collect();

    let ranking = ranking::rank(&scores);
    let total = ranking.items.len();
    let items = ranking
        .items
        .into_iter()
        .take(limit)
        .filter_map(|entry| {
            let c = by_id.get(&entry.creator_id)?;
            Some(RankingItem {
                rank: entry.rank,
                creator_id: entry.creator_id,
                name: c.creator.name.clone(),
                platform: c.creator.platform.clone(),
                language: c.creator.language.clone(),
                total_picks: entry.total_picks,
                hit_rate: entry.hit_rate,
                avg_outperformance: entry.avg_outperformance,
                overall_score: entry.overall_score,
                updated_at: entry.updated_at,
            })
        })
        .collect();

    RankingResponse {
        items,
        total,
        minimum_picks_required: ranking.minimum_picks_required,
    }
}

async fn get_creators(
    State(state): State<AppState>,
) -> Result<Json<Vec<CreatorWithScore>>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let rows = creators::list_creators(pool, None)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    ticker: Option<String>,
    #[serde(rename = "type")]
    direction: Option<String>,
}

impl PageQuery {
    fn into_filter(self, creator_id: Option<Uuid>) -> Result<PickFilter, StatusCode> {
        let direction = match self.direction.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<Direction>()
                    .map_err(|_| StatusCode::BAD_REQUEST)?,
            ),
        };
        Ok(PickFilter {
            creator_id,
            ticker: self.ticker.filter(|t| !t.trim().is_empty()),
            direction,
            page: self.page.unwrap_or(1).max(1),
            page_size: self
                .page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        })
    }
}

#[derive(Debug, Serialize)]
struct PicksPage {
    items: Vec<Pick>,
    total: i64,
    page: u32,
    page_size: u32,
}

#[derive(Debug, Serialize)]
struct CreatorDetail {
    #[serde(flatten)]
    creator: CreatorWithScore,
    picks: PicksPage,
}

async fn get_creator(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<PageQuery>,
) -> Result<Json<CreatorDetail>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let id = parse_id(&id)?;
    let filter = q.into_filter(Some(id))?;

    let creator = creators::get_creator(pool, id)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let (items, total) = creators::list_picks(pool, &filter)
        .await
        .map_err(internal_error)?;

    Ok(Json(CreatorDetail {
        creator,
        picks: PicksPage {
            items,
            total,
            page: filter.page,
            page_size: filter.page_size,
        },
    }))
}

async fn get_recommendations(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<PicksPage>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let filter = q.into_filter(None)?;

    let (items, total) = creators::list_picks(pool, &filter)
        .await
        .map_err(internal_error)?;

    Ok(Json(PicksPage {
        items,
        total,
        page: filter.page,
        page_size: filter.page_size,
    }))
}

#[derive(Debug, Serialize)]
struct PerformanceView {
    recommendation_id: Uuid,
    progress: ScoringProgress,
    pick_score: Option<f64>,
    record: PerformanceRecord,
}

async fn get_recommendation_performance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PerformanceView>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let id = parse_id(&id)?;

    let record = pickrank_core::storage::performance::fetch_record(pool, id)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(PerformanceView {
        recommendation_id: id,
        progress: record.progress(),
        pick_score: record.pick_score(),
        record,
    }))
}

fn check_admin_key(configured: Option<&str>, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = configured else {
        return Err(StatusCode::NOT_FOUND);
    };
    let provided = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if provided != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

async fn get_review_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReviewItem>>, StatusCode> {
    check_admin_key(state.admin_api_key.as_deref(), &headers)?;
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let items = creators::list_review_queue(pool)
        .await
        .map_err(internal_error)?;
    Ok(Json(items))
}
