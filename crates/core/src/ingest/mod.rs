pub mod loader;
pub mod table;

use crate::domain::fund::FundSnapshot;
use crate::domain::price::PriceObservation;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Source of the two engine inputs: per-fund price series and the latest fund snapshots.
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Cleaned, date-ordered series keyed by fund id.
    async fn load_prices(&self) -> Result<BTreeMap<String, Vec<PriceObservation>>>;

    async fn load_snapshots(&self) -> Result<BTreeMap<String, FundSnapshot>>;
}

/// Flat CSV exports on local disk.
#[derive(Debug, Clone)]
pub struct CsvMarketData {
    prices_path: PathBuf,
    snapshot_path: Option<PathBuf>,
}

impl CsvMarketData {
    pub fn new(prices_path: impl Into<PathBuf>, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            prices_path: prices_path.into(),
            snapshot_path,
        }
    }
}

#[async_trait::async_trait]
impl MarketDataSource for CsvMarketData {
    fn source_name(&self) -> &'static str {
        "csv"
    }

    async fn load_prices(&self) -> Result<BTreeMap<String, Vec<PriceObservation>>> {
        let path = self.prices_path.clone();
        tokio::task::spawn_blocking(move || {
            let table = table::Table::from_path(&path)?;
            loader::prices_from_table(&table)
                .with_context(|| format!("invalid price file {}", path.display()))
        })
        .await
        .context("join price loader task failed")?
    }

    /// Without a snapshot file every fund is scored from its price history alone.
    async fn load_snapshots(&self) -> Result<BTreeMap<String, FundSnapshot>> {
        let Some(path) = self.snapshot_path.clone() else {
            tracing::warn!("no fund snapshot file configured; metadata factors will be unmeasured");
            return Ok(BTreeMap::new());
        };
        tokio::task::spawn_blocking(move || {
            let table = table::Table::from_path(&path)?;
            loader::snapshots_from_table(&table)
                .with_context(|| format!("invalid snapshot file {}", path.display()))
        })
        .await
        .context("join snapshot loader task failed")?
    }
}
