//! Matching engine.
//!
//! Writes enqueue a [`MatchTask`]; a single [`MatchWorker`] scores the item
//! against opposite-kind reports and upserts one candidate row per pair.
//! Candidates of claimed, closed or deleted items are flagged stale, never
//! removed.

mod queue;
pub mod scoring;
mod worker;

pub use queue::{MatchQueue, MatchTask};
pub use worker::{MatchWorker, PassOutcome};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::error::{AppResult, OptionExt};
use crate::store::{items, matches};
use crate::types::ItemSummary;

/// A candidate as seen from one of its two items.
#[derive(Debug, Clone, Serialize)]
pub struct RankedMatch {
    pub lost_id: Uuid,
    pub found_id: Uuid,
    pub counterpart_id: Uuid,
    pub score: f64,
    pub generated_at: DateTime<Utc>,
    pub stale: bool,
    /// `None` once the counterpart has been deleted.
    pub counterpart: Option<ItemSummary>,
}

/// Ranked candidates for an existing item, stale ones included.
pub async fn matches_for(conn: &mut SqliteConnection, item_id: Uuid) -> AppResult<Vec<RankedMatch>> {
    items::fetch_item(conn, item_id).await?.ok_or_not_found("Item")?;
    let candidates = matches::candidates_for(conn, item_id).await?;
    let counterpart_ids: Vec<Uuid> = candidates.iter().map(|c| c.counterpart_of(item_id)).collect();
    let counterparts = items::fetch_items(conn, &counterpart_ids).await?;

    Ok(candidates
        .into_iter()
        .map(|c| {
            let counterpart_id = c.counterpart_of(item_id);
            RankedMatch {
                lost_id: c.lost_id,
                found_id: c.found_id,
                counterpart_id,
                score: c.score,
                generated_at: c.generated_at,
                stale: c.stale,
                counterpart: counterparts
                    .iter()
                    .find(|i| i.id == counterpart_id)
                    .map(|i| ItemSummary::from_item(i, None)),
            }
        })
        .collect())
}
