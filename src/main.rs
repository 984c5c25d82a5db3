mod audit;
mod charts;
mod config;
mod error;
mod face;
mod llm;
mod models;
mod pdf;
mod pipeline;
mod report;
mod routes;
mod scratch;
mod validator;
mod vision;
mod workflow;

use std::net::SocketAddr;

use tracing_subscriber::{fmt, EnvFilter};

use crate::{config::AppConfig, llm::http_client, pipeline::Services, routes::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env()?;
    for kind in config.configured_backends() {
        if let Some(endpoint) = config.endpoint(kind) {
            tracing::info!("🔑 {} at {} (key {})", kind.display_name(), endpoint.base_url, config::mask(&endpoint.api_key));
        }
    }
    if config.deepseek.is_none() {
        tracing::warn!("DEEPSEEK_API_KEY is not set; reports will use the local fallback text");
    }

    std::fs::create_dir_all(&config.scratch_dir)?;
    let client = http_client(config.upstream_timeout);
    let services = Services::from_config(&config, &client)?;
    let app = routes::router(AppState::new(services, config.session_idle), config.max_upload_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
