use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};

use crate::error::AppResult;
use crate::middleware::{auth::CurrentUser, ip::MaybeRemoteAddr};
use crate::state::AppState;

/// Accepts raw image bytes and returns `{storage_key, content_hash}` for use
/// in a subsequent `POST /items`. An `image/*` content type is kept and
/// served back on download.
pub async fn upload_image(
    State(state): State<AppState>,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    CurrentUser(user): CurrentUser,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    state.rate_limiter.check_endpoint_limit("POST /images", remote.client_ip(&headers)).await?;
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let upload = state.catalog.upload_image(&body, content_type).await?;
    tracing::info!(user_id = %user.id, storage_key = %upload.storage_key, bytes = body.len(), "image uploaded");
    Ok((StatusCode::CREATED, Json(upload)))
}

pub async fn get_image(State(state): State<AppState>, Path(storage_key): Path<String>) -> AppResult<impl IntoResponse> {
    let (bytes, content_type) = state.catalog.fetch_image(&storage_key).await?;
    Ok((
        [(header::CONTENT_TYPE, content_type), (header::CACHE_CONTROL, "private, max-age=86400".to_string())],
        bytes,
    ))
}
