use tracing::info;
use tracing_subscriber::EnvFilter;

use car_platform_api::config::AppConfig;
use car_platform_api::handlers;
use car_platform_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // A missing or malformed variable aborts here with the offending name
    let config = AppConfig::from_env()?;
    let port = config.port;

    let state = AppState::init(config).await?;
    let app = handlers::router(state.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "car-platform-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
