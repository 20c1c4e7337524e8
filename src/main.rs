mod artifacts;
mod config;
mod crop_engine;
mod densenet;
mod disease_engine;
mod engine;
mod error;
mod forest;
mod label_encoder;
mod routes;
mod types;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;

use artifacts::ArtifactPaths;
use config::Config;
use crop_engine::ForestCropEngine;
use disease_engine::DenseNetDiseaseEngine;
use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,agri_gateway=debug".into());
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting agri gateway with config: {:?}", config);

    let paths = ArtifactPaths::resolve(&config).await?;

    tracing::info!("Loading crop recommendation forest...");
    let crops = ForestCropEngine::load(&paths.crop_model, &paths.label_encoder)?;
    tracing::info!("Loading plant disease network...");
    let disease = DenseNetDiseaseEngine::load(&paths.disease_model, config.cpu_only)?;
    tracing::info!("Models loaded successfully");

    let state = AppState::new(Arc::new(crops), Arc::new(disease));
    let cors = routes::cors_layer(&config.origins())?;

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
    let app = routes::router(state, cors, config.max_upload_bytes)
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer);

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}
