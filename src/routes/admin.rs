use std::time::Duration;

use axum::{
    extract::{Json, State},
    response::IntoResponse,
};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;

/// Rebuilds the search index from the item table.
pub async fn reindex(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> AppResult<impl IntoResponse> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("admin role required".to_string()));
    }
    let limit = Duration::from_millis(state.config.search.rebuild_timeout_ms);
    tracing::info!(user_id = %user.id, "index rebuild requested");
    let stats = state.catalog.index().rebuild(&state.db, limit).await?;
    Ok(Json(stats))
}
