use crate::domain::horizon::{due_horizons, Horizon};
use crate::domain::performance::{HorizonOutcome, PerformanceRecord, ReferencePoint, ScoringState};
use crate::domain::recommendation::Recommendation;
use crate::performance::returns::{relative_return, simple_return};
use crate::performance::scorer::score;
use crate::performance::PerformanceError;
use crate::pricing::{PriceResolver, ResolvedPrice};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const DEFAULT_CONCURRENCY: usize = 8;

/// A recommendation that still has work, with its record if one was persisted before.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub recommendation: Recommendation,
    pub record: Option<PerformanceRecord>,
}

#[async_trait::async_trait]
pub trait PerformanceRepository: Send + Sync {
    /// Recommendations dated on or before `as_of` whose record is missing or still active and
    /// not fully scored.
    async fn load_work(&self, as_of: NaiveDate) -> anyhow::Result<Vec<WorkItem>>;

    /// Inserts or replaces the record for its recommendation.
    async fn save_performance(&self, record: &PerformanceRecord) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct RecomputeOptions {
    /// Recommendations processed in parallel.
    pub concurrency: usize,
}

impl Default for RecomputeOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl RecomputeOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Ok(s) = std::env::var("RECOMPUTE_CONCURRENCY") {
            if let Ok(n) = s.parse::<usize>() {
                out.concurrency = n.max(1);
            }
        }
        out
    }
}

/// A failure that leaves work for a later run.
#[derive(Debug, Clone, PartialEq)]
pub struct Deferred {
    /// `None` when the reference point itself could not be resolved.
    pub horizon: Option<Horizon>,
    pub error: PerformanceError,
}

#[derive(Debug, Clone)]
pub struct RecomputeOutcome {
    /// The record to persist. `None` if nothing exists yet and nothing was learned.
    pub record: Option<PerformanceRecord>,
    pub changed: bool,
    pub scored: Vec<Horizon>,
    pub deferred: Vec<Deferred>,
}

/// Brings one recommendation's record up to date as of `as_of`.
///
/// Scored horizons are never touched again. Retryable failures leave their horizon pending;
/// an invalid ticker or a zero reference value moves the record to a terminal state.
pub async fn recompute_one(
    recommendation: &Recommendation,
    existing: Option<&PerformanceRecord>,
    resolver: &PriceResolver,
    as_of: NaiveDate,
    now: DateTime<Utc>,
) -> RecomputeOutcome {
    let mut record = existing.cloned().unwrap_or_else(|| {
        PerformanceRecord::new(recommendation.id, recommendation.benchmark(), now)
    });
    let mut scored = Vec::new();
    let mut deferred = Vec::new();

    if record.needs_work() && recommendation.recommendation_date <= as_of {
        match ensure_reference(recommendation, &mut record, resolver, as_of).await {
            Ok(reference) => {
                let due = due_horizons(recommendation.recommendation_date, as_of, |h| {
                    record.is_scored(h)
                });
                for horizon in due {
                    match score_horizon(recommendation, &record, &reference, horizon, resolver, as_of)
                        .await
                    {
                        Ok(outcome) => {
                            record.horizons.insert(horizon, outcome);
                            scored.push(horizon);
                        }
                        Err(error) if error.is_retryable() => deferred.push(Deferred {
                            horizon: Some(horizon),
                            error,
                        }),
                        Err(error) => {
                            record.state = terminal_state(&error);
                            break;
                        }
                    }
                }
            }
            Err(error) if error.is_retryable() => deferred.push(Deferred {
                horizon: None,
                error,
            }),
            Err(error) => record.state = terminal_state(&error),
        }
    }

    let changed = match existing {
        Some(prev) => !same_content(prev, &record),
        None => record.reference.is_some() || !record.horizons.is_empty() || record.state != ScoringState::Active,
    };

    if changed {
        record.updated_at = now;
    }

    let record = if changed || existing.is_some() {
        Some(record)
    } else {
        None
    };

    RecomputeOutcome {
        record,
        changed,
        scored,
        deferred,
    }
}

async fn ensure_reference(
    recommendation: &Recommendation,
    record: &mut PerformanceRecord,
    resolver: &PriceResolver,
    as_of: NaiveDate,
) -> Result<ReferencePoint, PerformanceError> {
    let reference = match record.reference {
        Some(reference) => reference,
        None => {
            let date = recommendation.recommendation_date;
            let stock = not_after(resolver.resolve(&recommendation.ticker, date).await?, as_of, resolver)?;
            let bench = not_after(
                resolver.resolve_benchmark(record.benchmark, date).await?,
                as_of,
                resolver,
            )?;
            let reference = ReferencePoint {
                price: stock.price,
                price_date: stock.resolved_date,
                benchmark_level: bench.price,
                benchmark_date: bench.resolved_date,
            };
            record.reference = Some(reference);
            reference
        }
    };

    if reference.price == 0.0 || reference.benchmark_level == 0.0 {
        return Err(PerformanceError::DivisionByZero);
    }
    Ok(reference)
}

async fn score_horizon(
    recommendation: &Recommendation,
    record: &PerformanceRecord,
    reference: &ReferencePoint,
    horizon: Horizon,
    resolver: &PriceResolver,
    as_of: NaiveDate,
) -> Result<HorizonOutcome, PerformanceError> {
    let target = horizon
        .target_date(recommendation.recommendation_date)
        .ok_or_else(|| PerformanceError::PriceUnavailable {
            symbol: recommendation.ticker.clone(),
            date: recommendation.recommendation_date,
            max_forward_days: resolver.options().max_forward_days,
        })?;

    let stock = not_after(resolver.resolve(&recommendation.ticker, target).await?, as_of, resolver)?;
    let bench = not_after(
        resolver.resolve_benchmark(record.benchmark, target).await?,
        as_of,
        resolver,
    )?;

    let stock_return = simple_return(reference.price, stock.price)?;
    let benchmark_return = simple_return(reference.benchmark_level, bench.price)?;

    Ok(HorizonOutcome {
        stock_return,
        benchmark_return,
        score: score(relative_return(stock_return, benchmark_return)),
    })
}

// A session after the evaluation date is not yet observable.
fn not_after(
    price: ResolvedPrice,
    as_of: NaiveDate,
    resolver: &PriceResolver,
) -> Result<ResolvedPrice, PerformanceError> {
    if price.resolved_date > as_of {
        return Err(PerformanceError::PriceUnavailable {
            symbol: price.symbol,
            date: price.requested_date,
            max_forward_days: resolver.options().max_forward_days,
        });
    }
    Ok(price)
}

fn terminal_state(error: &PerformanceError) -> ScoringState {
    match error {
        PerformanceError::DivisionByZero => ScoringState::NeedsReview(error.to_string()),
        _ => ScoringState::Unscoreable(error.to_string()),
    }
}

fn same_content(a: &PerformanceRecord, b: &PerformanceRecord) -> bool {
    a.recommendation_id == b.recommendation_id
        && a.benchmark == b.benchmark
        && a.reference == b.reference
        && a.horizons == b.horizons
        && a.state == b.state
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecomputeSummary {
    pub recommendations: usize,
    pub changed: usize,
    pub horizons_scored: usize,
    pub horizons_deferred: usize,
    pub fully_scored: usize,
    pub unscoreable: usize,
    pub needs_review: usize,
    pub persist_failures: usize,
}

/// Recomputes every recommendation with outstanding work on a bounded worker pool.
///
/// Each task owns exactly one record. Failures are counted and logged per recommendation and
/// never abort the batch; only failing to load the work list is an error.
pub async fn run_recompute(
    repository: Arc<dyn PerformanceRepository>,
    resolver: Arc<PriceResolver>,
    as_of: NaiveDate,
    options: &RecomputeOptions,
    now: DateTime<Utc>,
) -> anyhow::Result<RecomputeSummary> {
    let work = repository.load_work(as_of).await?;
    let mut summary = RecomputeSummary {
        recommendations: work.len(),
        ..Default::default()
    };

    tracing::info!(%as_of, recommendations = work.len(), concurrency = options.concurrency, "recompute started");

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for item in work {
        let semaphore = Arc::clone(&semaphore);
        let repository = Arc::clone(&repository);
        let resolver = Arc::clone(&resolver);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let WorkItem {
                recommendation,
                record,
            } = item;
            let outcome =
                recompute_one(&recommendation, record.as_ref(), &resolver, as_of, now).await;

            let mut persisted = true;
            if let (true, Some(record)) = (outcome.changed, outcome.record.as_ref()) {
                if let Err(err) = repository.save_performance(record).await {
                    tracing::error!(
                        recommendation_id = %recommendation.id,
                        error = %format!("{err:#}"),
                        "failed to persist performance record"
                    );
                    persisted = false;
                }
            }
            (recommendation, outcome, persisted)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (recommendation, outcome, persisted) = match joined {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(error = %err, "recompute task failed");
                summary.persist_failures += 1;
                continue;
            }
        };
        tally(&mut summary, &recommendation, &outcome, persisted);
    }

    tracing::info!(%as_of, ?summary, "recompute finished");
    Ok(summary)
}

fn tally(
    summary: &mut RecomputeSummary,
    recommendation: &Recommendation,
    outcome: &RecomputeOutcome,
    persisted: bool,
) {
    if !persisted {
        summary.persist_failures += 1;
        return;
    }
    if outcome.changed {
        summary.changed += 1;
    }
    summary.horizons_scored += outcome.scored.len();
    summary.horizons_deferred += outcome.deferred.len();

    for deferred in &outcome.deferred {
        let horizon = deferred.horizon.map(Horizon::label).unwrap_or("reference");
        if let PerformanceError::InvalidBenchmark { symbol } = &deferred.error {
            tracing::error!(
                recommendation_id = %recommendation.id,
                benchmark_symbol = %symbol,
                horizon,
                "benchmark symbol rejected by provider; check BENCHMARK_*_SYMBOL"
            );
            continue;
        }
        tracing::info!(
            recommendation_id = %recommendation.id,
            ticker = %recommendation.ticker,
            horizon,
            error = %deferred.error,
            "horizon deferred to next run"
        );
    }

    let Some(record) = outcome.record.as_ref() else {
        return;
    };
    match &record.state {
        ScoringState::Active => {
            if !record.needs_work() {
                summary.fully_scored += 1;
            }
        }
        ScoringState::Unscoreable(reason) => {
            summary.unscoreable += 1;
            if outcome.changed {
                tracing::error!(
                    recommendation_id = %recommendation.id,
                    ticker = %recommendation.ticker,
                    %reason,
                    "recommendation marked unscoreable"
                );
            }
        }
        ScoringState::NeedsReview(reason) => {
            summary.needs_review += 1;
            if outcome.changed {
                tracing::error!(
                    recommendation_id = %recommendation.id,
                    ticker = %recommendation.ticker,
                    %reason,
                    "recommendation flagged for manual review"
                );
            }
        }
    }
}
