use chatload_server::client::{HttpBootstrapClient, WsConnector};
use chatload_server::codec;
use chatload_server::config::Config;
use chatload_server::server::{AppState, router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the Prometheus metrics recorder
fn setup_prometheus_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize Prometheus metrics recorder (must be done before any metrics are recorded)
    let prometheus_handle = setup_prometheus_metrics()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatload=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // The morph table must stay collision-free or wire frames become
    // ambiguous; refuse to start otherwise
    if !codec::morph_rules_are_reversible() {
        anyhow::bail!("wire codec morph rules are not reversible");
    }

    // Load configuration from environment
    let config = Arc::new(Config::from_env());
    info!(
        host = %config.host,
        port = config.port,
        api_base_url = %config.target.api_base_url,
        websocket_url = %config.target.websocket_url,
        encryption_enabled = config.target.encryption_enabled,
        "loaded configuration"
    );

    let bootstrap = Arc::new(HttpBootstrapClient::new(config.target.clone()));
    let connector = Arc::new(WsConnector::new(config.target.clone()));
    let state = AppState::new(config.clone(), bootstrap, connector, prometheus_handle);

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("chatload trigger API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
