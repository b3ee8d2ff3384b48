//! HTTP route handlers.
//!
//! - `users`: registration, login and the current account
//! - `images`: photo upload ahead of item creation, and download
//! - `items`: create, search, edit, lifecycle and delete
//! - `matches`: ranked match candidates and manual refresh
//! - `admin`: index maintenance
//! - `health`: liveness, readiness, metrics and version

pub mod admin;
pub mod health;
pub mod images;
pub mod items;
pub mod matches;
pub mod users;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Json, Query};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, patch, post, put};
use axum::Router;

use crate::error::{AppError, AppResult};
use crate::middleware::{auth::auth_middleware, validation::max_body_size};
use crate::state::AppState;

/// All API routes behind bearer authentication (public routes pass through).
/// Transport layers such as tracing and compression are added by the binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version))
        .route("/users", post(users::register))
        .route("/users/login", post(users::login))
        .route("/users/me", get(users::me))
        .route("/users/me/password", put(users::change_password))
        .route("/images", post(images::upload_image))
        .route("/images/{storage_key}", get(images::get_image))
        .route("/items", post(items::create_item).get(items::search_items))
        .route("/items/mine", get(items::my_items))
        .route("/items/{id}", get(items::get_item).patch(items::update_item).delete(items::delete_item))
        .route("/items/{id}/status", patch(items::change_status))
        .route("/items/{id}/matches", get(matches::list_matches))
        .route("/items/{id}/matches/refresh", post(matches::refresh_matches))
        .route("/admin/reindex", post(admin::reindex))
        .layer(from_fn_with_state(state.clone(), auth_middleware))
        .layer(DefaultBodyLimit::max(max_body_size()))
        .with_state(state)
}

/// Unwraps a JSON body, turning axum's rejection into our error format.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    body.map(|Json(v)| v).map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e.body_text())))
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> AppResult<T> {
    query.map(|Query(v)| v).map_err(|e| AppError::BadRequest(format!("Invalid query string: {}", e.body_text())))
}
