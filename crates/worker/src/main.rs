use anyhow::Context;
use clap::Parser;
use pickrank_core::performance::job::RecomputeOptions;
use pickrank_core::pricing::ResolverOptions;
use pickrank_core::storage::lock::{self, JobLock};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cycle;

#[derive(Debug, Parser)]
#[command(name = "pickrank_worker")]
struct Args {
    /// Evaluation date (YYYY-MM-DD). Defaults to the latest completed US session date (UTC).
    #[arg(long)]
    as_of_date: Option<String>,

    /// Recommendations processed in parallel. Overrides RECOMPUTE_CONCURRENCY.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Only rebuild creator scores and the ranking.
    #[arg(long)]
    skip_recompute: bool,

    /// Only recompute performance records.
    #[arg(long)]
    skip_ranking: bool,

    /// Resolve configuration and the as-of date, then exit without touching the database.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = pickrank_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let as_of_date = pickrank_core::time::market_clock::resolve_as_of_date(
        args.as_of_date.as_deref(),
        chrono::Utc::now(),
        pickrank_core::time::market_clock::close_cutoff_hour_utc(),
    )?;

    let mut recompute = RecomputeOptions::from_env();
    if let Some(n) = args.concurrency {
        recompute.concurrency = n.max(1);
    }

    let opts = cycle::CycleOptions {
        as_of_date,
        recompute,
        resolver: ResolverOptions::from_env(),
        skip_recompute: args.skip_recompute,
        skip_ranking: args.skip_ranking,
    };

    if args.dry_run {
        tracing::info!(
            %as_of_date,
            dry_run = true,
            concurrency = opts.recompute.concurrency,
            max_forward_days = opts.resolver.max_forward_days,
            sp500_symbol = %opts.resolver.sp500_symbol,
            dax_symbol = %opts.resolver.dax_symbol,
            skip_recompute = opts.skip_recompute,
            skip_ranking = opts.skip_ranking,
            "performance cycle (dry-run)"
        );
        return Ok(());
    }

    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections((opts.recompute.concurrency as u32).clamp(2, 16) + 1)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    pickrank_core::storage::migrate(&pool).await?;

    let Some(held) = lock::try_acquire(&pool, JobLock::PerformanceCycle).await? else {
        tracing::warn!(%as_of_date, "performance cycle lock not acquired; another run in progress");
        return Ok(());
    };

    let result = cycle::run_cycle(&pool, &settings, &opts).await;

    if let Err(err) = held.release().await {
        tracing::warn!(error = %err, "failed to release performance cycle lock");
    }

    match result {
        Ok(report) => {
            tracing::info!(
                %as_of_date,
                recomputed = report.recompute.is_some(),
                ranked = report.ranking.is_some(),
                "performance cycle finished"
            );
            Ok(())
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(%as_of_date, error = %format!("{err:#}"), "performance cycle failed");
            Err(err)
        }
    }
}

fn init_sentry(settings: &pickrank_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
