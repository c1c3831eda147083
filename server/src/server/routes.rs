use crate::engine::{ConcurrencyTracker, LoadRunner, RampConfig, SessionContext};
use crate::engine::stats::LoadTestSummary;
use crate::server::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Trigger payload; every field falls back to the configured default
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoadTestRequest {
    pub num_sessions: Option<usize>,
    pub ramp_start_sessions: Option<usize>,
    pub ramp_max_sessions: Option<usize>,
    pub ramp_increment: Option<usize>,
    pub ramp_interval_seconds: Option<u64>,
    pub use_progressive_rampup: bool,
}

#[derive(Debug, Serialize)]
pub struct LoadTestResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<LoadTestSummary>,
}

/// Start a run and hold the response open until it completes. The
/// full statistics report is the response body.
pub async fn run_load_test(
    State(state): State<AppState>,
    Json(request): Json<LoadTestRequest>,
) -> impl IntoResponse {
    let Ok(_guard) = state.run_guard.try_lock() else {
        warn!("load test trigger rejected, a run is already active");
        return (
            StatusCode::CONFLICT,
            Json(LoadTestResponse {
                status: "rejected",
                message: "a load test is already running".to_string(),
                statistics: None,
            }),
        );
    };

    let load = &state.config.load;
    let ctx = Arc::new(SessionContext {
        bootstrap: state.bootstrap.clone(),
        connector: state.connector.clone(),
        tracker: Arc::new(ConcurrencyTracker::new()),
        questions: state.config.questions.clone(),
        message: state.config.message.clone(),
        encryption_enabled: state.config.target.encryption_enabled,
    });
    let runner = LoadRunner::new(ctx, load.monitor_interval, load.run_timeout);

    let summary = if request.use_progressive_rampup {
        let ramp = RampConfig {
            start_sessions: request
                .ramp_start_sessions
                .unwrap_or(load.ramp_start_sessions),
            max_sessions: request.ramp_max_sessions.unwrap_or(load.ramp_max_sessions),
            increment: request.ramp_increment.unwrap_or(load.ramp_increment),
            interval: request
                .ramp_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(load.ramp_interval),
        };
        runner.run_progressive(ramp).await
    } else {
        let num_sessions = request.num_sessions.unwrap_or(load.num_sessions);
        runner.run_flat(num_sessions).await
    };

    info!(
        sessions = summary.total_sessions,
        success_rate = format!("{:.1}%", summary.success_rate),
        "load test run finished"
    );
    (
        StatusCode::OK,
        Json(LoadTestResponse {
            status: "completed",
            message: format!(
                "ran {} sessions, {:.1}% of questions answered",
                summary.total_sessions, summary.success_rate
            ),
            statistics: Some(summary),
        }),
    )
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
pub struct IndexResponse {
    pub service: &'static str,
    pub version: &'static str,
}

pub async fn index() -> Json<IndexResponse> {
    Json(IndexResponse {
        service: "chatload",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Metrics in Prometheus exposition format
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.prometheus.render()
}
