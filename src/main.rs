//! Read-only operator surface over the Repository contract (§6.1). Not
//! part of the spec's core (§1 scopes dashboards out), but a thin window
//! onto the document store the Orchestrator writes to - the teacher's
//! `api-server` binary repurposed for this pipeline's data shape.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use phoenix_property_pipeline::config::Config;
use phoenix_property_pipeline::domain::{PriceStats, Property};
use phoenix_property_pipeline::repository::{PgRepository, Repository};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct AppState {
    repository: Arc<dyn Repository>,
}

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Deserialize)]
struct ZipcodeQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    include_inactive: bool,
}

#[derive(Deserialize)]
struct RecentQuery {
    #[serde(default)]
    hours: Option<i64>,
    #[serde(default)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().unwrap_or_else(|err| {
        tracing::error!(error = %err, "configuration error; refusing to start");
        std::process::exit(1);
    });

    tracing::info!("connecting to repository");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let repository: Arc<dyn Repository> = Arc::new(PgRepository::new(pool));
    let state = AppState { repository };

    let app = Router::new()
        .route("/", get(health_check))
        .route("/api/health", get(health_check))
        .route("/api/properties/:property_id", get(get_property))
        .route("/api/properties/zipcode/:zipcode", get(search_by_zipcode))
        .route("/api/properties/recent", get(recent_updates))
        .route("/api/stats/price", get(price_stats))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], 3001));
    tracing::info!(%addr, "api-server listening");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn get_property(
    State(state): State<AppState>,
    Path(property_id): Path<String>,
) -> Result<Json<Property>, StatusCode> {
    state
        .repository
        .get_by_id(&property_id)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "repository read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn search_by_zipcode(
    State(state): State<AppState>,
    Path(zipcode): Path<String>,
    Query(query): Query<ZipcodeQuery>,
) -> Result<Json<Vec<Property>>, StatusCode> {
    let properties = state
        .repository
        .search_by_zipcode(&zipcode, query.limit.unwrap_or(50), query.include_inactive)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "repository read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(properties))
}

async fn recent_updates(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<Property>>, StatusCode> {
    let properties = state
        .repository
        .recent_updates(query.hours.unwrap_or(24), query.limit.unwrap_or(50))
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "repository read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(properties))
}

#[derive(Deserialize)]
struct PriceStatsQuery {
    #[serde(default)]
    zipcode: Option<String>,
}

async fn price_stats(
    State(state): State<AppState>,
    Query(query): Query<PriceStatsQuery>,
) -> Result<Json<PriceStats>, StatusCode> {
    state
        .repository
        .price_stats(query.zipcode.as_deref())
        .await
        .map(Json)
        .map_err(|err| {
            tracing::error!(error = %err, "repository read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
