use crate::bulk_write::{BulkWriteOptions, BulkWriter, HistoryEntry, QueryOutcome, SubmitError};
use crate::metrics::Metrics;
use crate::poller::DashboardController;
use crate::series::ChartView;
use crate::settings::Settings;
use crate::source::{ServerStatus, StatsSource};
use crate::state::{DbStatsView, PollState};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub struct HttpAppState<S: StatsSource> {
    pub metrics: Arc<Metrics>,
    pub controller: Arc<DashboardController<S>>,
    pub writer: Arc<BulkWriter<S>>,
}

impl<S: StatsSource> Clone for HttpAppState<S> {
    fn clone(&self) -> Self {
        Self {
            metrics: self.metrics.clone(),
            controller: self.controller.clone(),
            writer: self.writer.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiDashboard {
    pub poll_state: PollState,
    pub settings: Option<Settings>,
    pub started_at_unix: i64,
    pub last_poll_unix: Option<i64>,
    pub status_error: Option<String>,
    pub stats_error: Option<String>,
    pub server_status: Option<ServerStatus>,
    pub db_stats: Option<DbStatsView>,
    pub charts: Vec<ChartView>,
}

#[derive(Debug, Deserialize)]
pub struct BulkWriteRequest {
    pub collection: String,
    /// Editor text, parsed server-side.
    pub operations: String,
    #[serde(default)]
    pub options: BulkWriteOptions,
}

#[derive(Debug, Serialize)]
pub struct ApiEditor {
    pub text: String,
    pub busy: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiRender {
    pub rendered: bool,
    pub text: String,
}

pub fn build_router<S: StatsSource>(
    metrics: Arc<Metrics>,
    controller: Arc<DashboardController<S>>,
    writer: Arc<BulkWriter<S>>,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler::<S>))
        .route("/api/dashboard", get(dashboard_handler::<S>))
        .route("/api/charts", get(charts_handler::<S>))
        .route("/api/settings", put(settings_handler::<S>))
        .route("/api/bulk-write", post(bulk_write_handler::<S>))
        .route("/api/history", get(history_handler::<S>))
        .route("/api/history/:index/render", post(render_handler::<S>))
        .route("/api/history/:index/replay", post(replay_handler::<S>))
        .route("/api/editor", get(editor_handler::<S>))
        .with_state(HttpAppState {
            metrics,
            controller,
            writer,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler<S: StatsSource>(State(state): State<HttpAppState<S>>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn dashboard_handler<S: StatsSource>(
    State(state): State<HttpAppState<S>>,
) -> Json<ApiDashboard> {
    let controller = &state.controller;
    let settings = controller.settings().current();
    let show_db_stats = settings.map(|s| s.show_db_stats).unwrap_or(false);
    let unit = settings.and_then(|s| s.scale);

    // Reads go through the controller so a missing snapshot is re-fetched.
    let server_status = controller.server_status().await;
    let db_stats = if show_db_stats {
        controller.db_stats().await
    } else {
        None
    };

    let shared = controller.state();
    let guard = shared.read().await;
    Json(ApiDashboard {
        poll_state: controller.poll_state(),
        settings,
        started_at_unix: guard.started_at_unix,
        last_poll_unix: guard.last_poll_unix,
        status_error: guard.status_error.clone(),
        stats_error: guard.stats_error.clone(),
        server_status,
        db_stats: db_stats.map(|s| DbStatsView::new(&s, unit)),
        charts: guard.charts.views(),
    })
}

async fn charts_handler<S: StatsSource>(
    State(state): State<HttpAppState<S>>,
) -> Json<Vec<ChartView>> {
    let shared = state.controller.state();
    let views = shared.read().await.charts.views();
    Json(views)
}

async fn settings_handler<S: StatsSource>(
    State(state): State<HttpAppState<S>>,
    Json(settings): Json<Settings>,
) -> Json<Settings> {
    state.controller.settings().publish(settings);
    Json(settings)
}

async fn bulk_write_handler<S: StatsSource>(
    State(state): State<HttpAppState<S>>,
    Json(request): Json<BulkWriteRequest>,
) -> Response {
    let outcome = state
        .writer
        .submit(&request.collection, &request.operations, request.options)
        .await;
    outcome_response(outcome)
}

async fn history_handler<S: StatsSource>(
    State(state): State<HttpAppState<S>>,
) -> Json<Vec<HistoryEntry>> {
    Json(state.writer.history().await)
}

async fn render_handler<S: StatsSource>(
    State(state): State<HttpAppState<S>>,
    Path(index): Path<usize>,
) -> Response {
    let Some(entry) = state.writer.history_entry(index).await else {
        return history_not_found(index);
    };
    let rendered = state.writer.render_query(&entry).await;
    let text = state.writer.editor_text().await;
    Json(ApiRender { rendered, text }).into_response()
}

async fn replay_handler<S: StatsSource>(
    State(state): State<HttpAppState<S>>,
    Path(index): Path<usize>,
) -> Response {
    let Some(entry) = state.writer.history_entry(index).await else {
        return history_not_found(index);
    };
    outcome_response(state.writer.replay(&entry).await)
}

async fn editor_handler<S: StatsSource>(State(state): State<HttpAppState<S>>) -> Json<ApiEditor> {
    Json(ApiEditor {
        text: state.writer.editor_text().await,
        busy: state.writer.busy().is_busy(),
    })
}

fn outcome_response(outcome: Result<QueryOutcome, SubmitError>) -> Response {
    match outcome {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

fn history_not_found(index: usize) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("no history entry at index {index}") })),
    )
        .into_response()
}
