pub mod cache;
pub mod domain;
pub mod ingest;
pub mod policy;
pub mod risk;
pub mod scoring;
pub mod storage;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub engine_config_path: Option<String>,
        pub prices_csv: Option<String>,
        pub fund_snapshot_csv: Option<String>,
        pub cache_csv: Option<String>,
        pub risk_tier_csv: Option<String>,
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                engine_config_path: non_empty_var("ENGINE_CONFIG_PATH"),
                prices_csv: non_empty_var("PRICES_CSV"),
                fund_snapshot_csv: non_empty_var("FUND_SNAPSHOT_CSV"),
                cache_csv: non_empty_var("CACHE_CSV"),
                risk_tier_csv: non_empty_var("RISK_TIER_CSV"),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_prices_csv(&self) -> anyhow::Result<&str> {
            self.prices_csv
                .as_deref()
                .context("PRICES_CSV (or --prices) is required")
        }

        pub fn require_cache_csv(&self) -> anyhow::Result<&str> {
            self.cache_csv
                .as_deref()
                .context("CACHE_CSV (or --out) is required")
        }
    }
}
