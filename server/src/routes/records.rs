//! Record endpoint routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use offsync_engine::{RecordId, Row};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_delete, handle_get, handle_insert, handle_list, handle_update};
use crate::AppState;

/// Create record routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/tables/{table}/records",
            get(list_handler).post(insert_handler),
        )
        .route(
            "/tables/{table}/records/{id}",
            get(get_handler).put(update_handler).delete(delete_handler),
        )
}

/// GET /tables/{table}/records
async fn list_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(table): Path<String>,
) -> Result<Json<Vec<Row>>> {
    Ok(Json(handle_list(&state.pool, &table).await?))
}

/// POST /tables/{table}/records
async fn insert_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(table): Path<String>,
    Json(row): Json<Row>,
) -> Result<(StatusCode, Json<Row>)> {
    let stored = handle_insert(&state.pool, &table, row).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// GET /tables/{table}/records/{id}
async fn get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((table, id)): Path<(String, RecordId)>,
) -> Result<Json<Row>> {
    Ok(Json(handle_get(&state.pool, &table, id).await?))
}

/// PUT /tables/{table}/records/{id}
async fn update_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((table, id)): Path<(String, RecordId)>,
    Json(row): Json<Row>,
) -> Result<Json<Row>> {
    Ok(Json(handle_update(&state.pool, &table, id, row).await?))
}

/// DELETE /tables/{table}/records/{id}
async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((table, id)): Path<(String, RecordId)>,
) -> Result<StatusCode> {
    handle_delete(&state.pool, &table, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
