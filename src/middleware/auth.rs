use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::accounts;
use crate::error::AppError;
use crate::state::AppState;
use crate::types::User;

/// Routes reachable without a token.
fn is_public(method: &Method, path: &str) -> bool {
    matches!(path, "/healthz" | "/readyz" | "/version" | "/metrics" | "/metrics/prometheus")
        || (method == Method::POST && matches!(path, "/users" | "/users/login"))
}

fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim()).filter(|t| !t.is_empty())
}

/// Resolves `Authorization: Bearer <token>` to a [`User`] and stores it as a
/// request extension. Requests to non-public routes without a valid token
/// are rejected with 401.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let public = is_public(req.method(), req.uri().path());
    let token = bearer_token(&req).map(str::to_string);

    let user = match token {
        Some(token) => match resolve(&state, &token).await {
            Ok(user) => Some(user),
            Err(e) if public => {
                tracing::debug!("ignoring bad token on public route: {}", e);
                None
            }
            Err(e) => return e.into_response(),
        },
        None if public => None,
        None => return AppError::Unauthorized("missing bearer token".to_string()).into_response(),
    };

    if let Some(user) = user {
        req.extensions_mut().insert(user);
    }
    next.run(req).await
}

async fn resolve(state: &AppState, token: &str) -> Result<User, AppError> {
    if let Ok(mut cache) = state.token_cache.lock() {
        if let Some(user) = cache.get(token) {
            return Ok(user.clone());
        }
    }
    let user = accounts::authenticate(&state.db, token).await?;
    if let Ok(mut cache) = state.token_cache.lock() {
        cache.put(token.to_string(), user.clone());
    }
    Ok(user)
}

/// The authenticated caller, as placed by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<User>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("authentication required".to_string()))
    }
}
