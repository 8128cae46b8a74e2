use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    response::Html,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::error::{ApiError, ApiResult};
use crate::query::{DataPayload, QueryService};
use crate::scheduler::RefreshHandle;
use crate::stats::{Stats, StatsSnapshot};
use crate::types::{AssetSnapshot, MarketSummary};
use crate::view;

pub struct AppState {
    pub query: QueryService,
    pub refresh: RefreshHandle,
    pub stats: Arc<Stats>,
    pub refresh_interval: Duration,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    let payload = state.query.data();
    let summary = state.query.summary();
    Html(view::render_dashboard(
        state.query.tracked(),
        &payload,
        &summary,
        state.refresh_interval,
    ))
}

async fn get_data(State(state): State<Arc<AppState>>) -> Json<DataPayload> {
    Json(state.query.data())
}

async fn get_asset(
    Path(asset): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Arc<AssetSnapshot>>> {
    let snap = state.query.snapshot_for(&asset)?;
    Ok(Json(snap))
}

async fn get_summary(State(state): State<Arc<AppState>>) -> Json<MarketSummary> {
    Json(state.query.summary())
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsSnapshot> {
    let now = chrono::Utc::now().timestamp_millis() as u64;
    Json(state.stats.snapshot(now))
}

#[derive(Debug, Default, Deserialize)]
struct RefreshParams {
    #[serde(default)]
    wait: bool,
}

/// Queues a refresh. With `?wait=true`, answers only after a fresh cycle has finished.
async fn refresh(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RefreshParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    if !params.wait {
        state.refresh.request();
        return Ok(Json(json!({ "status": "ok", "queued": true })));
    }

    match state.refresh.request_and_wait().await {
        Some(report) => Ok(Json(json!({ "status": "ok", "report": report }))),
        None => Err(ApiError::Unavailable("refresh loop is not running".into())),
    }
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/api/data", get(get_data))
        .route("/api/data/{asset}", get(get_asset))
        .route("/api/summary", get(get_summary))
        .route("/api/stats", get(get_stats))
        .route("/api/refresh", get(refresh).post(refresh))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
