//! HTTP trigger surface
//!
//! A small axum app that starts load runs on demand and exposes
//! health and metrics endpoints. One run at a time; a trigger while a
//! run is active is rejected rather than queued.

pub mod routes;

pub use routes::{LoadTestRequest, LoadTestResponse};

use crate::client::{BootstrapClient, ChannelConnector};
use crate::config::Config;
use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bootstrap: Arc<dyn BootstrapClient>,
    pub connector: Arc<dyn ChannelConnector>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
    /// Held for the duration of a run so triggers cannot overlap
    pub run_guard: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        bootstrap: Arc<dyn BootstrapClient>,
        connector: Arc<dyn ChannelConnector>,
        prometheus: PrometheusHandle,
    ) -> Self {
        Self {
            config,
            bootstrap,
            connector,
            prometheus,
            started_at: Instant::now(),
            run_guard: Arc::new(Mutex::new(())),
        }
    }
}

/// Build the trigger app
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::index))
        .route("/health", get(routes::health))
        .route("/metrics/prometheus", get(routes::prometheus_metrics))
        .route("/run-load-test", post(routes::run_load_test))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
