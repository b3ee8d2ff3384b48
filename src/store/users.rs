use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;

use super::{from_millis, parse_column, to_millis};
use crate::error::{AppError, AppResult};
use crate::types::User;

const USER_COLUMNS: &str = "id, username, display_name, contact, role, created_at";

/// A user together with the secrets only the account code may see.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: User,
    pub password_hash: String,
    pub token: String,
}

fn user_from_row(row: &SqliteRow) -> AppResult<User> {
    Ok(User {
        id: parse_column("id", &row.try_get::<String, _>("id")?)?,
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
        contact: row.try_get("contact")?,
        role: parse_column("role", &row.try_get::<String, _>("role")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn credentials_from_row(row: &SqliteRow) -> AppResult<Credentials> {
    Ok(Credentials {
        user: user_from_row(row)?,
        password_hash: row.try_get("password_hash")?,
        token: row.try_get("token")?,
    })
}

/// Inserts a user. A taken username is a validation error.
pub async fn insert_user(conn: &mut SqliteConnection, user: &User, password_hash: &str, token: &str) -> AppResult<()> {
    let res = sqlx::query(
        r#"INSERT INTO users (id, username, display_name, contact, role, password_hash, token, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
    )
    .bind(user.id.to_string())
    .bind(&user.username)
    .bind(&user.display_name)
    .bind(user.contact.as_deref())
    .bind(user.role.as_str())
    .bind(password_hash)
    .bind(token)
    .bind(to_millis(user.created_at))
    .execute(&mut *conn)
    .await;
    match res {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() && e.message().contains("users.username") => {
            Err(AppError::invalid("username", "is already taken"))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn find_by_token(conn: &mut SqliteConnection, token: &str) -> AppResult<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE token = ?1", USER_COLUMNS);
    let row = sqlx::query(&sql).bind(token).fetch_optional(&mut *conn).await?;
    row.as_ref().map(user_from_row).transpose()
}

pub async fn credentials_by_username(conn: &mut SqliteConnection, username: &str) -> AppResult<Option<Credentials>> {
    let sql = format!("SELECT {}, password_hash, token FROM users WHERE username = ?1", USER_COLUMNS);
    let row = sqlx::query(&sql).bind(username).fetch_optional(&mut *conn).await?;
    row.as_ref().map(credentials_from_row).transpose()
}

pub async fn credentials_by_id(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Option<Credentials>> {
    let sql = format!("SELECT {}, password_hash, token FROM users WHERE id = ?1", USER_COLUMNS);
    let row = sqlx::query(&sql).bind(id.to_string()).fetch_optional(&mut *conn).await?;
    row.as_ref().map(credentials_from_row).transpose()
}

/// Replaces password hash and token together, only if the stored hash is
/// still `expected_hash`. Returns whether the row was updated.
pub async fn replace_password(
    conn: &mut SqliteConnection,
    id: Uuid,
    expected_hash: &str,
    password_hash: &str,
    token: &str,
) -> AppResult<bool> {
    let res = sqlx::query("UPDATE users SET password_hash = ?1, token = ?2 WHERE id = ?3 AND password_hash = ?4")
        .bind(password_hash)
        .bind(token)
        .bind(id.to_string())
        .bind(expected_hash)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected() == 1)
}
