// src/api.rs
//! Read-only status surface: liveness, scheduler snapshot, Prometheus metrics.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::metrics::Metrics;
use crate::scheduler::{SchedulerHandle, SchedulerSnapshot};
use crate::store::SeenStore;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: SchedulerHandle,
    pub seen: Arc<dyn SeenStore>,
    pub backend: &'static str,
    pub started_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct StatsOut {
    backend: &'static str,
    started_at: DateTime<Utc>,
    seen_keys: usize,
    #[serde(flatten)]
    scheduler: SchedulerSnapshot,
}

pub fn router(state: AppState, metrics: &Metrics) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/stats", get(stats))
        .with_state(state)
        .merge(metrics.router())
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsOut>, (StatusCode, &'static str)> {
    let snap = state
        .scheduler
        .snapshot()
        .await
        .map_err(|_| (StatusCode::SERVICE_UNAVAILABLE, "scheduler not running"))?;
    Ok(Json(StatsOut {
        backend: state.backend,
        started_at: state.started_at,
        seen_keys: state.seen.size(),
        scheduler: snap,
    }))
}
