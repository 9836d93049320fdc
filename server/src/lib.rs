//! Offsync Server - reference authority for offsync clients.
//!
//! Serves record tables over REST. Each table has its own id sequence;
//! the server assigns ids on insert and never reuses them, which is what
//! lets clients adopt remote ids during a sync pass.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;

use crate::config::Config;
use crate::db::Pool;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
}

impl AppState {
    /// Open the pool and bring the schema up to date.
    pub async fn connect(config: Config) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let pool = db::create_pool(&config.database_url).await?;
        db::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
