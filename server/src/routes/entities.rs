//! Entity endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::error::Result;
use crate::handlers::{
    handle_create, handle_delete, handle_get, handle_list, handle_update, EntityVersion,
    ListQuery, ListResponse, SnapshotRequest, VersionQuery, WriteResponse,
};
use crate::AppState;
use asof_engine::Snapshot;

/// Create entity routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/collections/{collection}/entities",
            get(list_handler).post(create_handler),
        )
        .route(
            "/collections/{collection}/entities/{id}",
            get(get_handler).put(update_handler).delete(delete_handler),
        )
}

/// POST /collections/{collection}/entities - Insert a new entity.
async fn create_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(request): Json<SnapshotRequest>,
) -> Result<(StatusCode, Json<WriteResponse>)> {
    let response = handle_create(&state, &collection, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// PUT /collections/{collection}/entities/{id} - Accept a new version.
async fn update_handler(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(request): Json<SnapshotRequest>,
) -> Result<Json<WriteResponse>> {
    let response = handle_update(&state, &collection, &id, request).await?;
    Ok(Json(response))
}

/// GET /collections/{collection}/entities/{id}?version=V - Latest or as-of read.
async fn get_handler(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<Snapshot<EntityVersion>>> {
    let snapshot = handle_get(&state, &collection, &id, query).await?;
    Ok(Json(snapshot))
}

/// GET /collections/{collection}/entities - Find all, filtered and paged.
async fn list_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>> {
    let response = handle_list(&state, &collection, query).await?;
    Ok(Json(response))
}

/// DELETE /collections/{collection}/entities/{id} - Remove an entity and its history.
async fn delete_handler(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    handle_delete(&state, &collection, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
