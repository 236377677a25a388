use std::path::PathBuf;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;

use plotwise_engine::agent::QueryAgent;
use plotwise_engine::config;
use plotwise_engine::routes::{self, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Plotwise starting");

    // Load configuration, refusing to start on misconfiguration.
    let config_dir = std::env::var("PLOTWISE_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    let engine_config = match config::load_config(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration, refusing to start");
            std::process::exit(1);
        }
    };

    // Install Prometheus metrics recorder.
    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus metrics recorder");
            std::process::exit(1);
        }
    };

    // Credentials are read here, once; a missing key is fatal.
    let agent = match QueryAgent::from_config(&engine_config) {
        Ok(agent) => agent,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build query agent");
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState {
        agent,
        metrics_handle,
        static_dir: PathBuf::from(&engine_config.system.server.static_dir),
    });

    let app = routes::router(state);

    let port: u16 = std::env::var("PLOTWISE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(engine_config.system.server.port);

    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, port = port, "Failed to bind TCP listener");
            std::process::exit(1);
        }
    };

    tracing::info!(port = port, "Plotwise listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "HTTP server error");
        std::process::exit(1);
    }
}
