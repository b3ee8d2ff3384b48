use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use super::json_body;
use crate::accounts;
use crate::error::AppResult;
use crate::middleware::{auth::CurrentUser, ip::MaybeRemoteAddr};
use crate::state::AppState;
use crate::types::{ChangePasswordRequest, LoginRequest, RegisterRequest};

pub async fn register(
    State(state): State<AppState>,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    state.rate_limiter.check_endpoint_limit("POST /users", remote.client_ip(&headers)).await?;
    let req = json_body(body)?;
    let resp = accounts::register(&state.db, state.config.security.as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn login(
    State(state): State<AppState>,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    state.rate_limiter.check_endpoint_limit("POST /users/login", remote.client_ip(&headers)).await?;
    let req = json_body(body)?;
    Ok(Json(accounts::login(&state.db, req).await?))
}

pub async fn me(CurrentUser(user): CurrentUser) -> impl IntoResponse {
    Json(user)
}

pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let req = json_body(body)?;
    let changed = accounts::change_password(&state.db, &user, req).await?;
    if let Ok(mut cache) = state.token_cache.lock() {
        cache.pop(&changed.previous_token);
    }
    Ok(Json(changed.auth))
}
