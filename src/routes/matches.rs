use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::error::AppResult;
use crate::middleware::{auth::CurrentUser, validation::parse_item_id};
use crate::state::AppState;

/// Candidates for an item, best first. Stale candidates are included and flagged.
pub async fn list_matches(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<impl IntoResponse> {
    let id = parse_item_id(&id)?;
    let matches = state.catalog.matches_for(id).await?;
    Ok(Json(json!({ "item_id": id, "matches": matches })))
}

pub async fn refresh_matches(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentUser(user): CurrentUser,
) -> AppResult<impl IntoResponse> {
    let id = parse_item_id(&id)?;
    let queued = state.catalog.refresh_matches(&user, id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "item_id": id, "queued": queued }))))
}
