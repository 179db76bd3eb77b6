use anyhow::Result;
use fleetline_api::build_app;
use fleetline_api::config::ApiConfig;
use fleetline_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("fleetline_api");

    let config = ApiConfig::from_env()?;
    let app = build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!(
        bind = %config.bind,
        storage = if config.database_url.is_some() { "sqlite" } else { "memory" },
        "fleetline api started"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
