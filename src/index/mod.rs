//! Search index over the item catalog.
//!
//! `item_index` holds one denormalized row per item keyed by category and a
//! coarse time bucket; `item_terms` maps keywords from title and description
//! to items. Both are written inside the catalog's own transaction, so an
//! acknowledged write is visible to the very next query.

pub mod cursor;
pub mod filter;
pub mod text;

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::error::{AppError, AppResult};
use crate::geo::{haversine_km, BoundingBox};
use crate::store::{self, parse_column, to_millis};
use crate::types::{Coordinate, Item, ItemStatus};
use cursor::PageCursor;
use filter::{SearchFilter, SearchRequest, SortOrder};
use text::{escape_like_pattern, item_terms};

/// One result row: the item id and, for spatial queries, its distance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub item_id: Uuid,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildStats {
    pub items: u64,
    pub terms: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
struct IndexRow {
    item_id: Uuid,
    reported_at_ms: i64,
    coordinate: Option<Coordinate>,
    distance_km: Option<f64>,
}

impl IndexRow {
    fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let lat: Option<f64> = row.try_get("latitude")?;
        let lon: Option<f64> = row.try_get("longitude")?;
        Ok(Self {
            item_id: parse_column("item_id", &row.try_get::<String, _>("item_id")?)?,
            reported_at_ms: row.try_get("reported_at")?,
            coordinate: lat.zip(lon).map(|(lat, lon)| Coordinate::new(lat, lon)),
            distance_km: None,
        })
    }

    /// Sets the exact distance, or drops rows outside the radius.
    fn within(mut self, center: &Coordinate, radius_km: f64) -> Option<Self> {
        let d = haversine_km(center, &self.coordinate?);
        self.distance_km = Some(d);
        (d <= radius_km).then_some(self)
    }

    fn distance(&self) -> f64 {
        self.distance_km.unwrap_or(f64::INFINITY)
    }

    fn distance_cmp(&self, other: &Self) -> Ordering {
        self.distance().total_cmp(&other.distance()).then_with(|| self.item_id.cmp(&other.item_id))
    }

    /// Whether this row sorts strictly after a distance cursor at `(distance_km, id)`.
    fn is_farther_than(&self, distance_km: f64, id: Uuid) -> bool {
        let d = self.distance();
        d > distance_km || (d == distance_km && self.item_id > id)
    }

    fn cursor(&self, sort: SortOrder) -> PageCursor {
        match sort {
            SortOrder::Newest => PageCursor::Newest { reported_at_ms: self.reported_at_ms, id: self.item_id },
            SortOrder::Distance => PageCursor::Distance { distance_km: self.distance(), id: self.item_id },
        }
    }
}

fn newest_position(cursor: PageCursor) -> Option<(i64, Uuid)> {
    match cursor {
        PageCursor::Newest { reported_at_ms, id } => Some((reported_at_ms, id)),
        PageCursor::Distance { .. } => None,
    }
}

#[derive(Debug, Clone)]
pub struct SearchIndex {
    bucket_ms: i64,
    default_page_size: u32,
    max_page_size: u32,
    max_near_candidates: usize,
}

impl SearchIndex {
    pub fn new(cfg: &SearchConfig) -> Self {
        Self {
            bucket_ms: i64::from(cfg.time_bucket_hours.max(1)) * 3_600_000,
            default_page_size: cfg.default_page_size.max(1),
            max_page_size: cfg.max_page_size.max(1),
            max_near_candidates: cfg.max_near_candidates.max(1) as usize,
        }
    }

    pub fn time_bucket(&self, ts: DateTime<Utc>) -> i64 {
        to_millis(ts).div_euclid(self.bucket_ms)
    }

    /// Writes (or replaces) the index row and keywords of `item`. Returns the
    /// number of keywords written.
    pub async fn upsert(&self, conn: &mut SqliteConnection, item: &Item) -> AppResult<u64> {
        sqlx::query(
            r#"INSERT INTO item_index (item_id, kind, category, status, owner_id, time_bucket, reported_at, latitude, longitude)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
               ON CONFLICT(item_id) DO UPDATE SET
                   kind = excluded.kind, category = excluded.category, status = excluded.status,
                   owner_id = excluded.owner_id, time_bucket = excluded.time_bucket,
                   reported_at = excluded.reported_at, latitude = excluded.latitude,
                   longitude = excluded.longitude"#,
        )
        .bind(item.id.to_string())
        .bind(item.kind.as_str())
        .bind(item.category.as_str())
        .bind(item.status.as_str())
        .bind(item.owner_id.to_string())
        .bind(self.time_bucket(item.reported_at))
        .bind(to_millis(item.reported_at))
        .bind(item.location.latitude)
        .bind(item.location.longitude)
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM item_terms WHERE item_id = ?1").bind(item.id.to_string()).execute(&mut *conn).await?;

        let terms = item_terms(&item.title, &item.description);
        if terms.is_empty() {
            return Ok(0);
        }
        let id = item.id.to_string();
        let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO item_terms (term, item_id) ");
        qb.push_values(&terms, |mut b, term| {
            b.push_bind(term.as_str()).push_bind(id.as_str());
        });
        qb.build().execute(&mut *conn).await?;
        Ok(terms.len() as u64)
    }

    pub async fn remove(&self, conn: &mut SqliteConnection, item_id: Uuid) -> AppResult<()> {
        let id = item_id.to_string();
        sqlx::query("DELETE FROM item_terms WHERE item_id = ?1").bind(&id).execute(&mut *conn).await?;
        sqlx::query("DELETE FROM item_index WHERE item_id = ?1").bind(&id).execute(&mut *conn).await?;
        Ok(())
    }

    pub async fn count(&self, conn: &mut SqliteConnection) -> AppResult<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM item_index").fetch_one(&mut *conn).await?)
    }

    /// Runs a search. Without a `Status` filter only open items are returned.
    pub async fn query(&self, conn: &mut SqliteConnection, req: &SearchRequest) -> AppResult<SearchPage> {
        req.validate()?;
        let limit = req.limit.unwrap_or(self.default_page_size).clamp(1, self.max_page_size) as usize;
        let cursor = req.page_token.as_deref().map(|t| PageCursor::decode(t, req.sort)).transpose()?;

        let mut rows = match (req.near(), req.sort) {
            (None, _) => {
                let after = cursor.and_then(newest_position);
                self.newest_rows(conn, req, after, limit + 1).await?
            }
            (Some((center, radius_km)), SortOrder::Newest) => {
                self.near_newest_rows(conn, req, cursor.and_then(newest_position), center, radius_km, limit + 1)
                    .await?
            }
            (Some((center, radius_km)), SortOrder::Distance) => {
                self.near_distance_rows(conn, req, cursor.as_ref(), center, radius_km, limit + 1).await?
            }
        };

        let next_page_token = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|r| r.cursor(req.sort).encode())
        } else {
            None
        };

        tracing::debug!(hits = rows.len(), sort = req.sort.as_str(), "index query");
        Ok(SearchPage {
            hits: rows.into_iter().map(|r| SearchHit { item_id: r.item_id, distance_km: r.distance_km }).collect(),
            next_page_token,
        })
    }

    /// Index rows passing every SQL-expressible filter, unordered.
    fn filtered(&self, req: &SearchRequest) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT ix.item_id, ix.reported_at, ix.latitude, ix.longitude FROM item_index ix WHERE 1 = 1",
        );
        if !req.has_status_filter() {
            qb.push(" AND ix.status = ").push_bind(ItemStatus::Open.as_str());
        }
        for f in &req.filters {
            self.push_filter(&mut qb, f);
        }
        qb
    }

    /// Newest first, strictly after `after`, at most `take` rows.
    async fn newest_rows(
        &self,
        conn: &mut SqliteConnection,
        req: &SearchRequest,
        after: Option<(i64, Uuid)>,
        take: usize,
    ) -> AppResult<Vec<IndexRow>> {
        let mut qb = self.filtered(req);
        if let Some((reported_at_ms, id)) = after {
            qb.push(" AND (ix.reported_at < ")
                .push_bind(reported_at_ms)
                .push(" OR (ix.reported_at = ")
                .push_bind(reported_at_ms)
                .push(" AND ix.item_id < ")
                .push_bind(id.to_string())
                .push("))");
        }
        qb.push(" ORDER BY ix.reported_at DESC, ix.item_id DESC LIMIT ").push_bind(take as i64);
        let rows = qb.build().fetch_all(&mut *conn).await?;
        rows.iter().map(IndexRow::from_row).collect()
    }

    /// Newest first within the radius. Walks the bounding box in keyset
    /// batches of `max_near_candidates` rows, or one page if that is larger.
    async fn near_newest_rows(
        &self,
        conn: &mut SqliteConnection,
        req: &SearchRequest,
        mut after: Option<(i64, Uuid)>,
        center: Coordinate,
        radius_km: f64,
        take: usize,
    ) -> AppResult<Vec<IndexRow>> {
        let batch = self.max_near_candidates.max(take);
        let mut out = Vec::with_capacity(take);
        loop {
            let rows = self.newest_rows(conn, req, after, batch).await?;
            let exhausted = rows.len() < batch;
            after = rows.last().map(|r| (r.reported_at_ms, r.item_id));
            out.extend(rows.into_iter().filter_map(|r| r.within(&center, radius_km)));
            if out.len() >= take || exhausted {
                break;
            }
        }
        out.truncate(take);
        Ok(out)
    }

    /// Nearest first. Exact distances are only known after the prefilter,
    /// so the whole bounding box is read; past `max_near_candidates` rows
    /// the query is refused.
    async fn near_distance_rows(
        &self,
        conn: &mut SqliteConnection,
        req: &SearchRequest,
        cursor: Option<&PageCursor>,
        center: Coordinate,
        radius_km: f64,
        take: usize,
    ) -> AppResult<Vec<IndexRow>> {
        let mut qb = self.filtered(req);
        qb.push(" LIMIT ").push_bind((self.max_near_candidates + 1) as i64);
        let rows = qb.build().fetch_all(&mut *conn).await?;
        if rows.len() > self.max_near_candidates {
            return Err(AppError::invalid(
                "radius_km",
                format!(
                    "more than {} located items in range; narrow the radius or sort by newest",
                    self.max_near_candidates
                ),
            ));
        }

        let mut rows: Vec<IndexRow> = rows
            .iter()
            .map(IndexRow::from_row)
            .filter_map(|r| r.map(|r| r.within(&center, radius_km)).transpose())
            .collect::<AppResult<_>>()?;
        rows.sort_by(IndexRow::distance_cmp);
        if let Some(&PageCursor::Distance { distance_km, id }) = cursor {
            rows.retain(|r| r.is_farther_than(distance_km, id));
        }
        rows.truncate(take);
        Ok(rows)
    }

    fn push_filter(&self, qb: &mut QueryBuilder<'_, Sqlite>, filter: &SearchFilter) {
        match filter {
            SearchFilter::Kind(kind) => {
                qb.push(" AND ix.kind = ").push_bind(kind.as_str());
            }
            SearchFilter::Categories(set) => {
                qb.push(" AND ix.category IN (");
                let mut sep = qb.separated(", ");
                for c in set {
                    sep.push_bind(c.as_str());
                }
                sep.push_unseparated(")");
            }
            SearchFilter::Status(statuses) => {
                qb.push(" AND ix.status IN (");
                let mut sep = qb.separated(", ");
                for s in statuses {
                    sep.push_bind(s.as_str());
                }
                sep.push_unseparated(")");
            }
            SearchFilter::ReportedBetween { from, to } => {
                // bucket range narrows the index scan, the exact bounds decide
                qb.push(" AND ix.time_bucket BETWEEN ")
                    .push_bind(self.time_bucket(*from))
                    .push(" AND ")
                    .push_bind(self.time_bucket(*to))
                    .push(" AND ix.reported_at BETWEEN ")
                    .push_bind(to_millis(*from))
                    .push(" AND ")
                    .push_bind(to_millis(*to));
            }
            SearchFilter::Near { center, radius_km } => {
                let bb = BoundingBox::around(center, *radius_km);
                qb.push(" AND ix.latitude BETWEEN ")
                    .push_bind(bb.min_lat)
                    .push(" AND ")
                    .push_bind(bb.max_lat)
                    .push(" AND ix.longitude IS NOT NULL");
                if let Some((min_lon, max_lon)) = bb.lon_range {
                    qb.push(" AND ix.longitude BETWEEN ").push_bind(min_lon).push(" AND ").push_bind(max_lon);
                }
            }
            SearchFilter::Text(terms) => {
                for term in terms {
                    qb.push(" AND EXISTS (SELECT 1 FROM item_terms t WHERE t.item_id = ix.item_id AND t.term LIKE ")
                        .push_bind(format!("{}%", escape_like_pattern(term)))
                        .push(" ESCAPE '!')");
                }
            }
            SearchFilter::Owner(owner) => {
                qb.push(" AND ix.owner_id = ").push_bind(owner.to_string());
            }
        }
    }

    /// Recreates both index tables from the items table in one transaction.
    ///
    /// When `limit` elapses the transaction is dropped, which rolls it back
    /// and leaves the previous index untouched.
    pub async fn rebuild(&self, pool: &SqlitePool, limit: Duration) -> AppResult<RebuildStats> {
        let started = Instant::now();
        let work = async {
            let mut tx = pool.begin().await?;
            sqlx::query("DELETE FROM item_terms").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM item_index").execute(&mut *tx).await?;
            let items = store::items::all_items(&mut tx).await?;
            let mut terms = 0;
            for item in &items {
                terms += self.upsert(&mut tx, item).await?;
            }
            tx.commit().await?;
            Ok::<_, AppError>((items.len() as u64, terms))
        };

        match tokio::time::timeout(limit, work).await {
            Ok(res) => {
                let (items, terms) = res?;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::info!(items, terms, elapsed_ms, "search index rebuilt");
                Ok(RebuildStats { items, terms, elapsed_ms })
            }
            Err(_) => {
                tracing::warn!(timeout_ms = limit.as_millis() as u64, "search index rebuild timed out, rolled back");
                Err(AppError::StorageUnavailable("index rebuild timed out".to_string()))
            }
        }
    }
}
