//! Offsync Server binary.

use offsync_server::config::Config;
use offsync_server::{app, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "offsync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Offsync Server on {}:{}", config.host, config.port);
    if config.auth_secret.is_none() {
        tracing::warn!("AUTH_SECRET is not set, accepting anonymous requests");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::connect(config).await?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
