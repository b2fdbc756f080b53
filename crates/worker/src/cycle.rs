use pickrank_core::config::Settings;
use pickrank_core::performance::job::{run_recompute, RecomputeOptions, RecomputeSummary};
use pickrank_core::pricing::polygon::PolygonProvider;
use pickrank_core::pricing::{PriceCache, PriceResolver, ResolverOptions};
use pickrank_core::ranking::{run_ranking, Ranking};
use pickrank_core::storage::PgRepository;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CycleOptions {
    pub as_of_date: chrono::NaiveDate,
    pub recompute: RecomputeOptions,
    pub resolver: ResolverOptions,
    pub skip_recompute: bool,
    pub skip_ranking: bool,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub recompute: Option<RecomputeSummary>,
    pub ranking: Option<Ranking>,
}

/// One scheduled cycle: recompute performance, then rebuild creator scores from scratch.
///
/// The ranking pass only starts once every recompute task has finished, so it never reads a
/// half-updated cycle.
pub async fn run_cycle(
    pool: &sqlx::PgPool,
    settings: &Settings,
    opts: &CycleOptions,
) -> anyhow::Result<CycleReport> {
    let repository = Arc::new(PgRepository::new(pool.clone()));
    let mut report = CycleReport::default();

    if !opts.skip_recompute {
        let provider = PolygonProvider::from_settings(settings)?;
        // Fresh cache per run; dropped with the resolver at the end of this block.
        let resolver = Arc::new(PriceResolver::new(
            Arc::new(provider),
            PriceCache::new(),
            opts.resolver.clone(),
        ));

        let summary = run_recompute(
            repository.clone(),
            resolver.clone(),
            opts.as_of_date,
            &opts.recompute,
            chrono::Utc::now(),
        )
        .await?;

        tracing::info!(
            as_of_date = %opts.as_of_date,
            recommendations = summary.recommendations,
            changed = summary.changed,
            horizons_scored = summary.horizons_scored,
            horizons_deferred = summary.horizons_deferred,
            unscoreable = summary.unscoreable,
            needs_review = summary.needs_review,
            persist_failures = summary.persist_failures,
            cached_prices = resolver.cache().len().await,
            "performance recompute complete"
        );
        report.recompute = Some(summary);
    }

    if !opts.skip_ranking {
        let ranking = run_ranking(repository.as_ref(), chrono::Utc::now()).await?;
        if let Some(top) = ranking.items.first() {
            tracing::info!(
                eligible = ranking.items.len(),
                top_creator_id = %top.creator_id,
                top_overall_score = top.overall_score,
                "ranking updated"
            );
        } else {
            tracing::info!(
                minimum_picks_required = ranking.minimum_picks_required,
                "ranking updated; no creator is eligible yet"
            );
        }
        report.ranking = Some(ranking);
    }

    Ok(report)
}
