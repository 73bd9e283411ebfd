use investment_agent_orchestrator::{api::start_server, bootstrap::build_orchestrator, config::AppConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Loads .env as well
    let config = AppConfig::from_env()?;

    info!("Investment Agent Orchestrator - API Server");
    info!("Port: {}", config.port);

    let orchestrator = Arc::new(build_orchestrator(&config).await?);

    info!("Starting API server...");
    start_server(orchestrator, config.port).await?;

    Ok(())
}
