use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use etfscore_core::cache::lookup::{normalize_archetype, normalize_level, DEFAULT_TOP_N};
use etfscore_core::cache::CacheIndex;
use etfscore_core::domain::cache::RecommendationCacheRow;

const MAX_TOP_N: usize = 50;
const MAX_COMPARE_IDS: usize = 20;

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

    let index = match load_index(&settings).await {
        Ok(index) => Some(index),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "recommendation cache unavailable; starting API in degraded mode");
            None
        }
    };

    let state = AppState {
        index: index.map(Arc::new),
    };

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// The CSV artifact when configured, otherwise the newest successful run in Postgres.
async fn load_index(settings: &etfscore_core::config::Settings) -> anyhow::Result<CacheIndex> {
    if let Some(path) = settings.cache_csv.clone() {
        let rows = tokio::task::spawn_blocking(move || {
            etfscore_core::storage::cache_file::read_cache_csv(std::path::Path::new(&path))
        })
        .await??;
        tracing::info!(rows = rows.len(), source = "csv", "recommendation cache loaded");
        return Ok(CacheIndex::from_rows(rows));
    }

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(db_url)
        .await?;
    etfscore_core::storage::migrate(&pool).await?;

    let (run_id, as_of_date, rows) = etfscore_core::storage::recommendation_cache::load_latest(&pool)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no successful cache run in the database"))?;
    tracing::info!(%run_id, %as_of_date, rows = rows.len(), source = "postgres", "recommendation cache loaded");
    Ok(CacheIndex::from_rows(rows))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/recommendations", get(get_recommendations))
        .route("/funds/:fund_id", get(get_fund))
        .route("/compare", get(get_comparison))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    index: Option<Arc<CacheIndex>>,
}

impl AppState {
    fn index(&self) -> Result<&CacheIndex, StatusCode> {
        self.index.as_deref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProfileQuery {
    level: Option<String>,
    archetype: Option<String>,
}

impl ProfileQuery {
    /// Normalised (level, archetype); unknown archetypes are 404.
    fn resolve(&self, index: &CacheIndex) -> Result<(u8, String), StatusCode> {
        let level = normalize_level(self.level.as_deref());
        let archetype = normalize_archetype(self.archetype.as_deref());
        if !index.has_archetype(&archetype) {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok((level, archetype))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RecommendationQuery {
    #[serde(flatten)]
    profile: ProfileQuery,
    category: Option<String>,
    top_n: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct CompareQuery {
    #[serde(flatten)]
    profile: ProfileQuery,
    ids: String,
}

#[derive(Debug, Serialize)]
struct RecommendationResponse {
    level: u8,
    archetype: String,
    category: Option<String>,
    items: Vec<RecommendationCacheRow>,
}

#[derive(Debug, Serialize)]
struct ComparisonResponse {
    level: u8,
    archetype: String,
    items: Vec<RecommendationCacheRow>,
    /// Requested funds with no row for this profile.
    not_eligible: Vec<String>,
}

async fn get_recommendations(
    State(state): State<AppState>,
    Query(q): Query<RecommendationQuery>,
) -> Result<Json<RecommendationResponse>, StatusCode> {
    let index = state.index()?;
    let (level, archetype) = q.profile.resolve(index)?;
    let top_n = q.top_n.unwrap_or(DEFAULT_TOP_N).clamp(1, MAX_TOP_N);

    let items: Vec<RecommendationCacheRow> = index
        .recommend(level, &archetype, q.category.as_deref(), top_n)
        .into_iter()
        .cloned()
        .collect();

    tracing::debug!(level, %archetype, category = ?q.category, hits = items.len(), "recommendations served");
    Ok(Json(RecommendationResponse {
        level,
        archetype,
        category: q.category,
        items,
    }))
}

async fn get_fund(
    State(state): State<AppState>,
    Path(fund_id): Path<String>,
    Query(q): Query<ProfileQuery>,
) -> Result<Json<RecommendationCacheRow>, StatusCode> {
    let index = state.index()?;
    let (level, archetype) = q.resolve(index)?;
    let row = index
        .fund(level, &archetype, fund_id.trim())
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(row.clone()))
}

async fn get_comparison(
    State(state): State<AppState>,
    Query(q): Query<CompareQuery>,
) -> Result<Json<ComparisonResponse>, StatusCode> {
    let index = state.index()?;
    let (level, archetype) = q.profile.resolve(index)?;

    let ids: Vec<&str> = q
        .ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if ids.is_empty() || ids.len() > MAX_COMPARE_IDS {
        return Err(StatusCode::BAD_REQUEST);
    }

    let items: Vec<RecommendationCacheRow> = index
        .compare(level, &archetype, &ids)
        .into_iter()
        .cloned()
        .collect();
    let mut seen = std::collections::HashSet::new();
    let not_eligible: Vec<String> = ids
        .iter()
        .filter(|id| seen.insert(**id))
        .filter(|id| !items.iter().any(|r| r.fund_id == **id))
        .map(|id| id.to_string())
        .collect();

    Ok(Json(ComparisonResponse {
        level,
        archetype,
        items,
        not_eligible,
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fund_id: &str, level: u8, score: f64) -> RecommendationCacheRow {
        RecommendationCacheRow {
            fund_id: fund_id.to_string(),
            fund_name: format!("{fund_id} ETF"),
            category: Some("채권".to_string()),
            base_index: Some(format!("{fund_id} index")),
            level,
            archetype_id: "ABWC".to_string(),
            base_score: score,
            final_score: score,
            risk_tier: Some(0),
            aum: None,
            avg_volume: None,
            volatility: None,
            expense_ratio: None,
        }
    }

    fn state() -> AppState {
        let rows = vec![row("A", 3, 0.7), row("B", 3, 0.6), row("C", 5, 0.9)];
        AppState {
            index: Some(Arc::new(CacheIndex::from_rows(rows))),
        }
    }

    fn profile(level: &str) -> ProfileQuery {
        ProfileQuery {
            level: Some(level.to_string()),
            archetype: Some("abwc".to_string()),
        }
    }

    #[tokio::test]
    async fn degraded_mode_is_service_unavailable() {
        let res = get_recommendations(
            State(AppState { index: None }),
            Query(RecommendationQuery::default()),
        )
        .await;
        assert_eq!(res.err(), Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn recommendations_default_to_level_three() {
        let Json(body) = get_recommendations(
            State(state()),
            Query(RecommendationQuery {
                top_n: Some(1),
                ..RecommendationQuery::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(body.level, 3);
        assert_eq!(body.archetype, "ABWC");
        assert_eq!(body.items.len(), 1);
        assert_eq!(body.items[0].fund_id, "A");
    }

    #[tokio::test]
    async fn level_is_clamped_and_unknown_archetype_is_404() {
        let Json(row) = get_fund(State(state()), Path("C".to_string()), Query(profile("level 9")))
            .await
            .unwrap();
        assert_eq!(row.level, 5);

        let q = ProfileQuery {
            level: None,
            archetype: Some("ZZZZ".to_string()),
        };
        let res = get_fund(State(state()), Path("A".to_string()), Query(q)).await;
        assert_eq!(res.err(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn compare_reports_ineligible_funds() {
        let Json(body) = get_comparison(
            State(state()),
            Query(CompareQuery {
                profile: profile("3"),
                ids: "B, A, C,".to_string(),
            }),
        )
        .await
        .unwrap();
        let ids: Vec<_> = body.items.iter().map(|r| r.fund_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A"]);
        assert_eq!(body.not_eligible, vec!["C".to_string()]);

        let res = get_comparison(
            State(state()),
            Query(CompareQuery {
                profile: profile("3"),
                ids: " , ".to_string(),
            }),
        )
        .await;
        assert_eq!(res.err(), Some(StatusCode::BAD_REQUEST));
    }
}
