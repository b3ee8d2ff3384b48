//! User registration, credential login and bearer token lookup.
//!
//! Passwords are stored as argon2id PHC strings. Each account has one
//! bearer token; login hands it out again and a password change replaces it.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::store::{self, users};
use crate::types::{AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest, User, UserRole};

pub const MAX_DISPLAY_NAME_CHARS: usize = 100;
pub const MIN_USERNAME_CHARS: usize = 3;
pub const MAX_USERNAME_CHARS: usize = 32;
pub const MIN_PASSWORD_CHARS: usize = 8;
pub const MAX_PASSWORD_CHARS: usize = 128;

/// 244 random bits, URL safe.
fn new_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn normalize_username(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

fn validate_username(errors: &mut FieldErrors, username: &str) {
    let len = username.chars().count();
    if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&len) {
        errors.push(
            "username",
            format!("must be {} to {} characters", MIN_USERNAME_CHARS, MAX_USERNAME_CHARS),
        );
    } else if !username.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
        errors.push("username", "may only contain letters, digits, '.', '_' and '-'");
    }
}

fn validate_password(errors: &mut FieldErrors, field: &str, password: &str) {
    let len = password.chars().count();
    if len < MIN_PASSWORD_CHARS {
        errors.push(field, format!("must be at least {} characters", MIN_PASSWORD_CHARS));
    } else if len > MAX_PASSWORD_CHARS {
        errors.push(field, format!("must be at most {} characters", MAX_PASSWORD_CHARS));
    }
}

/// Hashes off the async runtime; argon2 is deliberately slow.
async fn hash_password(password: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default().hash_password(password.as_bytes(), &salt).map(|h| h.to_string())
    })
    .await
    .map_err(|e| anyhow::anyhow!("password hashing task failed: {}", e))?
    .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

async fn verify_password(password: String, stored_hash: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored_hash)?;
        Ok::<_, argon2::password_hash::Error>(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
    })
    .await
    .map_err(|e| anyhow::anyhow!("password verification task failed: {}", e))?
    .map_err(|e| AppError::Internal(anyhow::anyhow!("stored password hash is unreadable: {}", e)))
}

fn bad_credentials() -> AppError {
    AppError::Unauthorized("invalid username or password".to_string())
}

pub async fn register(
    db: &SqlitePool,
    security: Option<&SecurityConfig>,
    req: RegisterRequest,
) -> AppResult<AuthResponse> {
    let mut errors = FieldErrors::new();
    let username = normalize_username(&req.username);
    validate_username(&mut errors, &username);
    validate_password(&mut errors, "password", &req.password);
    let display_name = req.display_name.trim().to_string();
    if display_name.is_empty() {
        errors.push("display_name", "must not be empty");
    } else if display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        errors.push("display_name", format!("must be at most {} characters", MAX_DISPLAY_NAME_CHARS));
    }
    let contact = req.contact.as_deref().map(str::trim).filter(|c| !c.is_empty()).map(str::to_string);

    let role = match req.admin_secret.as_deref() {
        None => UserRole::User,
        Some(given) => match security.and_then(|s| s.admin_secret.as_deref()) {
            Some(expected) if !expected.is_empty() && expected == given => UserRole::Admin,
            _ => {
                errors.push("admin_secret", "not accepted");
                UserRole::User
            }
        },
    };
    errors.into_result()?;

    let password_hash = hash_password(req.password).await?;
    let user = User { id: Uuid::new_v4(), username, display_name, contact, role, created_at: store::now() };
    let token = new_token();
    let mut conn = db.acquire().await?;
    users::insert_user(&mut conn, &user, &password_hash, &token).await?;
    tracing::info!(user_id = %user.id, username = %user.username, role = user.role.as_str(), "user registered");
    Ok(AuthResponse { user, token })
}

/// Checks a username and password and returns the account's token.
pub async fn login(db: &SqlitePool, req: LoginRequest) -> AppResult<AuthResponse> {
    let username = normalize_username(&req.username);
    let creds = {
        let mut conn = db.acquire().await?;
        users::credentials_by_username(&mut conn, &username).await?
    };
    let Some(creds) = creds else {
        tracing::info!(username = %username, "login for unknown user");
        return Err(bad_credentials());
    };
    if !verify_password(req.password, creds.password_hash).await? {
        tracing::warn!(user_id = %creds.user.id, "login with wrong password");
        return Err(bad_credentials());
    }
    tracing::info!(user_id = %creds.user.id, "user logged in");
    Ok(AuthResponse { user: creds.user, token: creds.token })
}

/// A password change and the token it replaced.
#[derive(Debug, Clone)]
pub struct PasswordChanged {
    pub auth: AuthResponse,
    pub previous_token: String,
}

/// Sets a new password after checking the current one. The old token stops
/// working; the response carries its replacement.
pub async fn change_password(db: &SqlitePool, user: &User, req: ChangePasswordRequest) -> AppResult<PasswordChanged> {
    let mut errors = FieldErrors::new();
    validate_password(&mut errors, "new_password", &req.new_password);
    errors.into_result()?;

    let creds = {
        let mut conn = db.acquire().await?;
        users::credentials_by_id(&mut conn, user.id).await?
    };
    let creds = creds.ok_or_else(|| AppError::Unauthorized("account no longer exists".to_string()))?;
    if !verify_password(req.current_password, creds.password_hash.clone()).await? {
        return Err(AppError::invalid("current_password", "is incorrect"));
    }

    let password_hash = hash_password(req.new_password).await?;
    let token = new_token();
    let mut conn = db.acquire().await?;
    if !users::replace_password(&mut conn, user.id, &creds.password_hash, &password_hash, &token).await? {
        return Err(AppError::Conflict("password was changed concurrently".to_string()));
    }
    tracing::info!(user_id = %user.id, "password changed, token rotated");
    Ok(PasswordChanged { auth: AuthResponse { user: creds.user, token }, previous_token: creds.token })
}

pub async fn authenticate(db: &SqlitePool, token: &str) -> AppResult<User> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::Unauthorized("missing bearer token".to_string()));
    }
    let mut conn = db.acquire().await?;
    users::find_by_token(&mut conn, token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("invalid bearer token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_normalised_and_checked() {
        assert_eq!(normalize_username("  Mara.K "), "mara.k");

        let mut errors = FieldErrors::new();
        validate_username(&mut errors, "ab");
        validate_username(&mut errors, "has space");
        validate_username(&mut errors, "ok_name-1");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn password_length_bounds() {
        let mut errors = FieldErrors::new();
        validate_password(&mut errors, "password", "short");
        validate_password(&mut errors, "password", &"x".repeat(MAX_PASSWORD_CHARS + 1));
        validate_password(&mut errors, "password", "long enough");
        assert_eq!(errors.len(), 2);
    }

    #[tokio::test]
    async fn hashes_verify_only_the_original_password() {
        let hash = hash_password("correct horse".to_string()).await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse".to_string(), hash.clone()).await.unwrap());
        assert!(!verify_password("wrong horse".to_string(), hash).await.unwrap());
        assert!(verify_password("x".to_string(), "not a phc string".to_string()).await.is_err());
    }
}
