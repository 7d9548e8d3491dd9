use anyhow::Context;
use clap::Parser;
use etfscore_core::ingest::CsvMarketData;
use etfscore_core::policy::EngineConfig;
use etfscore_core::storage::sink::{CacheSink, CsvCacheSink, PgCacheSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod pipeline;

#[derive(Debug, Parser)]
#[command(name = "etfscore_worker")]
struct Args {
    /// As-of date (YYYY-MM-DD). Defaults to the latest date present in the price input.
    #[arg(long)]
    as_of_date: Option<String>,

    /// Engine config JSON. Falls back to ENGINE_CONFIG_PATH, then built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Daily price CSV. Falls back to PRICES_CSV.
    #[arg(long)]
    prices: Option<PathBuf>,

    /// Fund snapshot CSV. Falls back to FUND_SNAPSHOT_CSV.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Cache artifact to write. Falls back to CACHE_CSV.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Also write the per-date risk classification table. Falls back to RISK_TIER_CSV.
    #[arg(long)]
    risk_out: Option<PathBuf>,

    /// Also persist the cache to DATABASE_URL.
    #[arg(long)]
    persist_db: bool,

    /// Compute everything but write nothing.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = etfscore_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let res = run(args, settings).await;
    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %err, "cache build run failed");
    }
    res
}

async fn run(args: Args, settings: etfscore_core::config::Settings) -> anyhow::Result<()> {
    let as_of_date = args
        .as_of_date
        .as_deref()
        .map(parse_as_of_date)
        .transpose()?;

    let config_path = args
        .config
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| settings.engine_config_path.clone());
    let cfg = Arc::new(EngineConfig::load(config_path.as_deref())?);
    tracing::info!(
        config = config_path.as_deref().unwrap_or("<defaults>"),
        window = cfg.window,
        quantiles = cfg.quantiles,
        archetypes = cfg.archetypes.len(),
        max_workers = cfg.max_workers,
        metric_weights = ?etfscore_core::risk::tier::metric_weight_table(&cfg),
        "engine config loaded"
    );

    let prices = match args.prices {
        Some(p) => p,
        None => PathBuf::from(settings.require_prices_csv()?),
    };
    let snapshot = args
        .snapshot
        .or_else(|| settings.fund_snapshot_csv.as_ref().map(PathBuf::from));
    let source = CsvMarketData::new(prices, snapshot);

    let mut sinks: Vec<Box<dyn CacheSink>> = Vec::new();
    if !args.dry_run {
        let out = match args.out {
            Some(p) => p,
            None => PathBuf::from(settings.require_cache_csv()?),
        };
        sinks.push(Box::new(CsvCacheSink::new(out)));

        if args.persist_db {
            let db_url = settings.require_database_url()?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await
                .context("connect DATABASE_URL failed")?;
            etfscore_core::storage::migrate(&pool).await?;
            sinks.push(Box::new(PgCacheSink::new(pool)));
        }
    }

    let risk_out = args
        .risk_out
        .or_else(|| settings.risk_tier_csv.as_ref().map(PathBuf::from));

    pipeline::run(
        &source,
        &sinks,
        cfg,
        pipeline::PipelineOptions {
            as_of_date,
            risk_out,
            dry_run: args.dry_run,
        },
    )
    .await?;
    Ok(())
}

fn init_sentry(settings: &etfscore_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

fn parse_as_of_date(s: &str) -> anyhow::Result<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid --as-of-date {s:?} (expected YYYY-MM-DD)"))
}
