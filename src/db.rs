use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqlitePool, SqlitePoolOptions},
    Sqlite,
};

/// Opens (creating if needed) the SQLite database and applies per-connection pragmas.
pub async fn connect(db_url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
        tracing::info!("Creating SQLite database at {}", db_url);
        Sqlite::create_database(db_url).await?;
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // foreign_keys is per connection; without it cascades silently do nothing
                sqlx::query("PRAGMA foreign_keys=ON;").execute(&mut *conn).await?;
                let _ = sqlx::query("PRAGMA busy_timeout=10000;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA temp_store=MEMORY;").execute(&mut *conn).await;
                Ok(())
            })
        })
        .connect(db_url)
        .await?;
    Ok(pool)
}

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // Pragmas for better durability/performance
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    // Image and index cascades depend on this
    sqlx::query("PRAGMA foreign_keys=ON;").execute(pool).await?;
    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            contact TEXT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            password_hash TEXT NOT NULL,
            token TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    // Timestamps are epoch milliseconds so ordering and cursors compare as integers
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            category TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            latitude REAL NULL,
            longitude REAL NULL,
            place TEXT NULL,
            contact TEXT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            matched_with TEXT NULL,
            owner_id TEXT NOT NULL,
            reported_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            match_pending INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(owner_id) REFERENCES users(id)
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS item_images (
            item_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            storage_key TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            uploaded_at INTEGER NOT NULL,
            PRIMARY KEY (item_id, position),
            UNIQUE (storage_key),
            UNIQUE (item_id, content_hash),
            FOREIGN KEY(item_id) REFERENCES items(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    // No foreign keys: stale rows outlive deleted items for auditing
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS match_candidates (
            lost_id TEXT NOT NULL,
            found_id TEXT NOT NULL,
            score REAL NOT NULL,
            generated_at INTEGER NOT NULL,
            stale INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (lost_id, found_id)
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS item_index (
            item_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            category TEXT NOT NULL,
            status TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            time_bucket INTEGER NOT NULL,
            reported_at INTEGER NOT NULL,
            latitude REAL NULL,
            longitude REAL NULL,
            FOREIGN KEY(item_id) REFERENCES items(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS item_terms (
            term TEXT NOT NULL,
            item_id TEXT NOT NULL,
            PRIMARY KEY (term, item_id),
            FOREIGN KEY(item_id) REFERENCES items(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        ("idx_users_token", "CREATE INDEX IF NOT EXISTS idx_users_token ON users(token)"),
        ("idx_items_pending", "CREATE INDEX IF NOT EXISTS idx_items_pending ON items(match_pending)"),
        ("idx_images_hash", "CREATE INDEX IF NOT EXISTS idx_images_hash ON item_images(content_hash)"),
        ("idx_candidates_found", "CREATE INDEX IF NOT EXISTS idx_candidates_found ON match_candidates(found_id)"),
        (
            "idx_index_category_bucket",
            "CREATE INDEX IF NOT EXISTS idx_index_category_bucket ON item_index(category, time_bucket)",
        ),
        (
            "idx_index_status_reported",
            "CREATE INDEX IF NOT EXISTS idx_index_status_reported ON item_index(status, reported_at DESC, item_id DESC)",
        ),
        ("idx_index_owner", "CREATE INDEX IF NOT EXISTS idx_index_owner ON item_index(owner_id)"),
        ("idx_terms_item", "CREATE INDEX IF NOT EXISTS idx_terms_item ON item_terms(item_id)"),
    ];

    for (name, query) in indexes {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            match &e {
                sqlx::Error::Database(db_err) => {
                    let msg = db_err.message().to_lowercase();
                    if msg.contains("already exists") || msg.contains("duplicate") {
                        tracing::debug!("Index {} already exists, skipping", name);
                    } else {
                        tracing::warn!("Failed to create index {}: {}", name, e);
                    }
                }
                _ => {
                    tracing::warn!("Failed to create index {}: {}", name, e);
                }
            }
        }
    }

    Ok(())
}
