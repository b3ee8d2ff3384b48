use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;

use super::{from_millis, parse_column, to_millis};
use crate::error::AppResult;
use crate::types::MatchCandidate;

fn candidate_from_row(row: &SqliteRow) -> AppResult<MatchCandidate> {
    Ok(MatchCandidate {
        lost_id: parse_column("lost_id", &row.try_get::<String, _>("lost_id")?)?,
        found_id: parse_column("found_id", &row.try_get::<String, _>("found_id")?)?,
        score: row.try_get("score")?,
        generated_at: from_millis(row.try_get("generated_at")?)?,
        stale: row.try_get::<i64, _>("stale")? != 0,
    })
}

/// Outcome of writing one candidate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Superseded,
    Unchanged,
}

/// Writes a candidate for its pair. An existing fresh row with the same score
/// is left untouched; anything else is replaced by the new computation.
pub async fn upsert_candidate(conn: &mut SqliteConnection, c: &MatchCandidate) -> AppResult<UpsertOutcome> {
    let existing = sqlx::query("SELECT score, stale FROM match_candidates WHERE lost_id = ?1 AND found_id = ?2")
        .bind(c.lost_id.to_string())
        .bind(c.found_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    let outcome = match existing {
        Some(row) => {
            let score: f64 = row.try_get("score")?;
            let stale: i64 = row.try_get("stale")?;
            if stale == 0 && (score - c.score).abs() < 1e-9 {
                return Ok(UpsertOutcome::Unchanged);
            }
            UpsertOutcome::Superseded
        }
        None => UpsertOutcome::Inserted,
    };

    sqlx::query(
        r#"INSERT INTO match_candidates (lost_id, found_id, score, generated_at, stale)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(lost_id, found_id) DO UPDATE SET
               score = excluded.score, generated_at = excluded.generated_at, stale = excluded.stale"#,
    )
    .bind(c.lost_id.to_string())
    .bind(c.found_id.to_string())
    .bind(c.score)
    .bind(to_millis(c.generated_at))
    .bind(if c.stale { 1i64 } else { 0i64 })
    .execute(&mut *conn)
    .await?;
    Ok(outcome)
}

/// Flags every candidate touching `item_id` as stale. Rows are kept.
pub async fn mark_stale(conn: &mut SqliteConnection, item_id: Uuid) -> AppResult<u64> {
    let id = item_id.to_string();
    let res = sqlx::query("UPDATE match_candidates SET stale = 1 WHERE (lost_id = ?1 OR found_id = ?1) AND stale = 0")
        .bind(&id)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected())
}

/// Candidates for an item, best first; ties go to the more recently reported counterpart.
pub async fn candidates_for(conn: &mut SqliteConnection, item_id: Uuid) -> AppResult<Vec<MatchCandidate>> {
    let rows = sqlx::query(
        r#"SELECT mc.lost_id, mc.found_id, mc.score, mc.generated_at, mc.stale
           FROM match_candidates mc
           LEFT JOIN items other
             ON other.id = CASE WHEN mc.lost_id = ?1 THEN mc.found_id ELSE mc.lost_id END
           WHERE mc.lost_id = ?1 OR mc.found_id = ?1
           ORDER BY mc.score DESC, COALESCE(other.reported_at, 0) DESC, mc.generated_at DESC"#,
    )
    .bind(item_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(candidate_from_row).collect()
}

/// Flags fresh candidates of `item_id` whose pair is not in `keep`. Used
/// after a re-run so pairs that stopped qualifying do not look current.
pub async fn retire_unlisted(
    conn: &mut SqliteConnection,
    item_id: Uuid,
    keep: &[(Uuid, Uuid)],
) -> AppResult<u64> {
    let mut retired = 0;
    for c in candidates_for(conn, item_id).await? {
        if c.stale || keep.contains(&(c.lost_id, c.found_id)) {
            continue;
        }
        let res = sqlx::query("UPDATE match_candidates SET stale = 1 WHERE lost_id = ?1 AND found_id = ?2")
            .bind(c.lost_id.to_string())
            .bind(c.found_id.to_string())
            .execute(&mut *conn)
            .await?;
        retired += res.rows_affected();
    }
    Ok(retired)
}
