use anyhow::Context;
use chrono::NaiveDate;
use etfscore_core::cache::{build_cache, CacheBuild, CacheInputs};
use etfscore_core::domain::price::PriceObservation;
use etfscore_core::ingest::MarketDataSource;
use etfscore_core::policy::EngineConfig;
use etfscore_core::risk::{ClassificationSummary, RiskPipelineOutput};
use etfscore_core::storage::cache_file;
use etfscore_core::storage::sink::CacheSink;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub as_of_date: Option<NaiveDate>,
    pub risk_out: Option<PathBuf>,
    pub dry_run: bool,
}

/// Latest observation date across the whole universe.
pub fn latest_price_date(prices: &BTreeMap<String, Vec<PriceObservation>>) -> Option<NaiveDate> {
    prices
        .values()
        .filter_map(|series| series.last().map(|o| o.date))
        .max()
}

/// Loads inputs, runs both risk phases, builds the cache and hands it to every sink.
pub async fn run(
    source: &dyn MarketDataSource,
    sinks: &[Box<dyn CacheSink>],
    cfg: Arc<EngineConfig>,
    opts: PipelineOptions,
) -> anyhow::Result<Arc<CacheBuild>> {
    let prices = source.load_prices().await?;
    let snapshots = source.load_snapshots().await?;
    tracing::info!(
        source = source.source_name(),
        price_funds = prices.len(),
        snapshot_funds = snapshots.len(),
        "inputs loaded"
    );

    let as_of_date = match opts.as_of_date {
        Some(d) => d,
        None => latest_price_date(&prices).context("price input has no observations")?,
    };

    let risk_cfg = Arc::clone(&cfg);
    let (prices, risk) = tokio::task::spawn_blocking(move || {
        let risk = RiskPipelineOutput::run(&prices, &risk_cfg);
        (prices, risk)
    })
    .await
    .context("join risk pipeline task failed")?;
    ClassificationSummary::from_classifications(&risk.classifications).log();

    if let Some(path) = opts.risk_out.as_ref().filter(|_| !opts.dry_run) {
        cache_file::write_classification_csv(path, &risk.classifications)?;
    }

    let inputs = Arc::new(CacheInputs::from_pipeline(as_of_date, prices, snapshots, &risk));
    let build = Arc::new(build_cache(inputs, Arc::clone(&cfg)).await);
    build.summary.log(as_of_date);

    if !build.failures.is_empty() {
        let failed: Vec<&str> = build.failures.iter().map(|f| f.fund_id.as_str()).collect();
        tracing::warn!(%as_of_date, failed = ?failed, "some funds were skipped");
    }

    if opts.dry_run {
        tracing::info!(
            %as_of_date,
            dry_run = true,
            rows = build.rows.len(),
            "cache built; skipping outputs"
        );
        return Ok(build);
    }

    let mut first_err: Option<anyhow::Error> = None;
    for sink in sinks {
        match sink.publish(as_of_date, Arc::clone(&build)).await {
            Ok(()) => tracing::info!(%as_of_date, sink = sink.sink_name(), "cache published"),
            Err(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(%as_of_date, sink = sink.sink_name(), error = %err, "cache publish failed");
                first_err.get_or_insert(err);
            }
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(build),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etfscore_core::domain::fund::FundSnapshot;
    use etfscore_core::storage::sink::CsvCacheSink;

    struct SyntheticSource {
        funds: usize,
        days: usize,
    }

    #[async_trait::async_trait]
    impl MarketDataSource for SyntheticSource {
        fn source_name(&self) -> &'static str {
            "synthetic"
        }

        async fn load_prices(&self) -> anyhow::Result<BTreeMap<String, Vec<PriceObservation>>> {
            let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            let mut out = BTreeMap::new();
            for f in 0..self.funds {
                let id = format!("F{f:02}");
                let amp = 0.005 * (f + 1) as f64;
                let series = (0..self.days)
                    .map(|i| PriceObservation {
                        fund_id: id.clone(),
                        date: start + chrono::Duration::days(i as i64),
                        close_price: 100.0 * (1.0 + amp * ((i % 7) as f64 - 3.0)) + 0.01 * i as f64,
                        benchmark_close_price: 100.0 * (1.0 + 0.01 * ((i % 4) as f64 - 1.5)),
                        volume: Some(1_000.0 * (f + 1) as f64),
                    })
                    .collect();
                out.insert(id, series);
            }
            Ok(out)
        }

        async fn load_snapshots(&self) -> anyhow::Result<BTreeMap<String, FundSnapshot>> {
            Ok(BTreeMap::new())
        }
    }

    fn cfg() -> Arc<EngineConfig> {
        Arc::new(EngineConfig {
            window: 20,
            ..EngineConfig::default()
        })
    }

    #[tokio::test]
    async fn end_to_end_writes_reproducible_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let source = SyntheticSource { funds: 8, days: 60 };
        let opts = PipelineOptions {
            as_of_date: None,
            risk_out: Some(dir.path().join("risk.csv")),
            dry_run: false,
        };

        let a_path = dir.path().join("a.csv");
        let b_path = dir.path().join("b.csv");
        let sinks_a: Vec<Box<dyn CacheSink>> = vec![Box::new(CsvCacheSink::new(&a_path))];
        let sinks_b: Vec<Box<dyn CacheSink>> = vec![Box::new(CsvCacheSink::new(&b_path))];

        let build = run(&source, &sinks_a, cfg(), opts.clone()).await.unwrap();
        run(&source, &sinks_b, cfg(), opts).await.unwrap();

        assert!(build.failures.is_empty());
        assert_eq!(build.summary.funds, 8);
        assert!(!build.rows.is_empty());
        assert_eq!(std::fs::read(&a_path).unwrap(), std::fs::read(&b_path).unwrap());
        assert!(dir.path().join("risk.csv").exists());

        let limits = EngineConfig::default();
        for row in &build.rows {
            let tier = row.risk_tier.unwrap();
            assert!(limits.is_eligible(row.level, tier));
        }
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cache.csv");
        let sinks: Vec<Box<dyn CacheSink>> = vec![Box::new(CsvCacheSink::new(&out))];
        let opts = PipelineOptions {
            as_of_date: None,
            risk_out: Some(dir.path().join("risk.csv")),
            dry_run: true,
        };
        let build = run(&SyntheticSource { funds: 3, days: 40 }, &sinks, cfg(), opts)
            .await
            .unwrap();
        assert!(!build.rows.is_empty());
        assert!(!out.exists());
        assert!(!dir.path().join("risk.csv").exists());
    }

    #[tokio::test]
    async fn short_history_funds_follow_unmeasured_policy() {
        let opts = PipelineOptions {
            as_of_date: None,
            risk_out: None,
            dry_run: true,
        };
        // 15 days < window of 20: nobody gets a tier.
        let build = run(&SyntheticSource { funds: 2, days: 15 }, &[], cfg(), opts)
            .await
            .unwrap();
        assert_eq!(build.summary.unmeasured_funds, 2);
        assert!(build.rows.iter().all(|r| r.risk_tier.is_none() && r.level >= 2));
    }

    #[test]
    fn latest_date_spans_all_funds() {
        let d = |day| NaiveDate::from_ymd_opt(2025, 1, day).unwrap();
        let obs = |id: &str, day| PriceObservation {
            fund_id: id.to_string(),
            date: d(day),
            close_price: 1.0,
            benchmark_close_price: 1.0,
            volume: None,
        };
        let mut prices = BTreeMap::new();
        prices.insert("A".to_string(), vec![obs("A", 2), obs("A", 3)]);
        prices.insert("B".to_string(), vec![obs("B", 5)]);
        prices.insert("C".to_string(), Vec::new());
        assert_eq!(latest_price_date(&prices), Some(d(5)));
        assert_eq!(latest_price_date(&BTreeMap::new()), None);
    }
}
