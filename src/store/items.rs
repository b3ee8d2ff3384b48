use std::collections::HashMap;

use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, SqliteConnection};
use uuid::Uuid;

use super::{from_millis, parse_column, to_millis};
use crate::error::{AppError, AppResult};
use crate::types::{ImageRef, Item, ItemStatus, Location};

const ITEM_COLUMNS: &str = "id, kind, category, title, description, latitude, longitude, place, contact, \
     status, matched_with, owner_id, reported_at, updated_at, version";

fn item_from_row(row: &SqliteRow) -> AppResult<Item> {
    let id: String = row.try_get("id")?;
    let matched_with: Option<String> = row.try_get("matched_with")?;
    Ok(Item {
        id: parse_column("id", &id)?,
        kind: parse_column("kind", &row.try_get::<String, _>("kind")?)?,
        category: parse_column("category", &row.try_get::<String, _>("category")?)?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        location: Location {
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            place: row.try_get("place")?,
        },
        contact: row.try_get("contact")?,
        status: parse_column("status", &row.try_get::<String, _>("status")?)?,
        matched_with: matched_with.as_deref().map(|m| parse_column("matched_with", m)).transpose()?,
        owner_id: parse_column("owner_id", &row.try_get::<String, _>("owner_id")?)?,
        images: Vec::new(),
        reported_at: from_millis(row.try_get("reported_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
        version: row.try_get("version")?,
    })
}

fn image_from_row(row: &SqliteRow) -> AppResult<ImageRef> {
    Ok(ImageRef {
        storage_key: row.try_get("storage_key")?,
        item_id: parse_column("item_id", &row.try_get::<String, _>("item_id")?)?,
        content_hash: row.try_get("content_hash")?,
        position: row.try_get("position")?,
        uploaded_at: from_millis(row.try_get("uploaded_at")?)?,
    })
}

/// Inserts a new item row. The item is flagged as pending for matching.
pub async fn insert_item(conn: &mut SqliteConnection, item: &Item) -> AppResult<()> {
    sqlx::query(
        r#"INSERT INTO items (id, kind, category, title, description, latitude, longitude, place, contact,
                              status, matched_with, owner_id, reported_at, updated_at, version, match_pending)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 1)"#,
    )
    .bind(item.id.to_string())
    .bind(item.kind.as_str())
    .bind(item.category.as_str())
    .bind(&item.title)
    .bind(&item.description)
    .bind(item.location.latitude)
    .bind(item.location.longitude)
    .bind(item.location.place.as_deref())
    .bind(item.contact.as_deref())
    .bind(item.status.as_str())
    .bind(item.matched_with.map(|m| m.to_string()))
    .bind(item.owner_id.to_string())
    .bind(to_millis(item.reported_at))
    .bind(to_millis(item.updated_at))
    .bind(item.version)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Attaches images to their item. A storage key already attached elsewhere
/// is a validation error.
pub async fn insert_images(conn: &mut SqliteConnection, images: &[ImageRef]) -> AppResult<()> {
    if images.is_empty() {
        return Ok(());
    }
    let mut qb =
        QueryBuilder::new("INSERT INTO item_images (item_id, position, storage_key, content_hash, uploaded_at) ");
    qb.push_values(images, |mut b, img| {
        b.push_bind(img.item_id.to_string())
            .push_bind(img.position)
            .push_bind(&img.storage_key)
            .push_bind(&img.content_hash)
            .push_bind(to_millis(img.uploaded_at));
    });
    match qb.build().execute(&mut *conn).await {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() && e.message().contains("storage_key") => {
            Err(AppError::invalid("images", "an image is already attached to another item"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Which of `keys` are attached to some item already.
pub async fn attached_image_keys(conn: &mut SqliteConnection, keys: &[&str]) -> AppResult<Vec<String>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::new("SELECT storage_key FROM item_images WHERE storage_key IN (");
    let mut sep = qb.separated(", ");
    for key in keys {
        sep.push_bind(key.to_string());
    }
    sep.push_unseparated(")");
    let rows = qb.build().fetch_all(&mut *conn).await?;
    rows.iter().map(|r| r.try_get::<String, _>("storage_key").map_err(AppError::from)).collect()
}

pub async fn fetch_images(conn: &mut SqliteConnection, item_id: Uuid) -> AppResult<Vec<ImageRef>> {
    let rows = sqlx::query(
        r#"SELECT item_id, position, storage_key, content_hash, uploaded_at
           FROM item_images WHERE item_id = ?1 ORDER BY position"#,
    )
    .bind(item_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(image_from_row).collect()
}

pub async fn fetch_item(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Option<Item>> {
    let sql = format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS);
    let row = sqlx::query(&sql).bind(id.to_string()).fetch_optional(&mut *conn).await?;
    match row {
        Some(row) => {
            let mut item = item_from_row(&row)?;
            item.images = fetch_images(conn, id).await?;
            Ok(Some(item))
        }
        None => Ok(None),
    }
}

/// Loads several items with their images, returned in the order of `ids`.
/// Ids without a row are skipped.
pub async fn fetch_items(conn: &mut SqliteConnection, ids: &[Uuid]) -> AppResult<Vec<Item>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let id_strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();

    let mut qb = QueryBuilder::new(format!("SELECT {} FROM items WHERE id IN (", ITEM_COLUMNS));
    let mut sep = qb.separated(", ");
    for id in &id_strings {
        sep.push_bind(id);
    }
    sep.push_unseparated(")");
    let rows = qb.build().fetch_all(&mut *conn).await?;
    let mut by_id: HashMap<Uuid, Item> = HashMap::with_capacity(rows.len());
    for row in &rows {
        let item = item_from_row(row)?;
        by_id.insert(item.id, item);
    }

    let mut qb = QueryBuilder::new(
        "SELECT item_id, position, storage_key, content_hash, uploaded_at FROM item_images WHERE item_id IN (",
    );
    let mut sep = qb.separated(", ");
    for id in &id_strings {
        sep.push_bind(id);
    }
    sep.push_unseparated(") ORDER BY item_id, position");
    for row in qb.build().fetch_all(&mut *conn).await? {
        let img = image_from_row(&row)?;
        if let Some(item) = by_id.get_mut(&img.item_id) {
            item.images.push(img);
        }
    }

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

/// Writes editable fields, bumping the version. Returns `false` when the
/// stored version no longer equals `expected_version`.
pub async fn update_fields(conn: &mut SqliteConnection, item: &Item, expected_version: i64) -> AppResult<bool> {
    let res = sqlx::query(
        r#"UPDATE items SET category = ?1, title = ?2, description = ?3, latitude = ?4, longitude = ?5,
                  place = ?6, contact = ?7, updated_at = ?8, version = version + 1, match_pending = 1
           WHERE id = ?9 AND version = ?10"#,
    )
    .bind(item.category.as_str())
    .bind(&item.title)
    .bind(&item.description)
    .bind(item.location.latitude)
    .bind(item.location.longitude)
    .bind(item.location.place.as_deref())
    .bind(item.contact.as_deref())
    .bind(to_millis(item.updated_at))
    .bind(item.id.to_string())
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Version-checked status write. Returns `false` on a lost race.
pub async fn update_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    status: ItemStatus,
    matched_with: Option<Uuid>,
    updated_at: chrono::DateTime<chrono::Utc>,
    expected_version: i64,
) -> AppResult<bool> {
    let res = sqlx::query(
        r#"UPDATE items SET status = ?1, matched_with = ?2, updated_at = ?3, version = version + 1
           WHERE id = ?4 AND version = ?5"#,
    )
    .bind(status.as_str())
    .bind(matched_with.map(|m| m.to_string()))
    .bind(to_millis(updated_at))
    .bind(id.to_string())
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Deletes the item row; images and index rows go with it via cascade.
pub async fn delete_item(conn: &mut SqliteConnection, id: Uuid) -> AppResult<bool> {
    let res = sqlx::query("DELETE FROM items WHERE id = ?1").bind(id.to_string()).execute(&mut *conn).await?;
    Ok(res.rows_affected() == 1)
}

/// Clears the pending-match flag unless the item changed since `version` was read.
pub async fn clear_match_pending(conn: &mut SqliteConnection, id: Uuid, version: i64) -> AppResult<()> {
    sqlx::query("UPDATE items SET match_pending = 0 WHERE id = ?1 AND version = ?2")
        .bind(id.to_string())
        .bind(version)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Flags an item for another matching pass.
pub async fn mark_match_pending(conn: &mut SqliteConnection, id: Uuid) -> AppResult<bool> {
    let res = sqlx::query("UPDATE items SET match_pending = 1 WHERE id = ?1")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected() == 1)
}

pub async fn pending_match_ids(conn: &mut SqliteConnection, limit: i64) -> AppResult<Vec<Uuid>> {
    let rows = sqlx::query("SELECT id FROM items WHERE match_pending = 1 ORDER BY reported_at LIMIT ?1")
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(|r| parse_column("id", &r.try_get::<String, _>("id")?)).collect()
}

/// Opposite-kind, same-category items still taking part in matching whose
/// report time lies within `window_ms` of `item`. Images are not loaded.
pub async fn matching_counterparts(
    conn: &mut SqliteConnection,
    item: &Item,
    window_ms: i64,
) -> AppResult<Vec<Item>> {
    let reported = to_millis(item.reported_at);
    let sql = format!(
        "SELECT {} FROM items WHERE kind = ?1 AND category = ?2 AND status IN ('open', 'matched') \
         AND reported_at BETWEEN ?3 AND ?4 AND id <> ?5",
        ITEM_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(item.kind.opposite().as_str())
        .bind(item.category.as_str())
        .bind(reported.saturating_sub(window_ms))
        .bind(reported.saturating_add(window_ms))
        .bind(item.id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(item_from_row).collect()
}

/// All items without images, for index rebuilds.
pub async fn all_items(conn: &mut SqliteConnection) -> AppResult<Vec<Item>> {
    let sql = format!("SELECT {} FROM items", ITEM_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows.iter().map(item_from_row).collect()
}
