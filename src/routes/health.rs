use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::fmt::Write as _;

// Liveness: no I/O, no rate limiting
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// Readiness: DB reachable within a bounded time
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let query = sqlx::query("SELECT 1").fetch_one(&state.db);
    match tokio::time::timeout(std::time::Duration::from_secs(5), query).await {
        Ok(Ok(_)) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => {
            tracing::warn!("readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "not ready: database error").into_response()
        }
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready: timeout").into_response(),
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.get_snapshot())
}

// Prometheus text exposition format
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot();
    let series: [(&str, &str, &str, u64); 15] = [
        ("items_created", "counter", "Items reported", m.items_created),
        ("items_updated", "counter", "Item edits", m.items_updated),
        ("items_deleted", "counter", "Items deleted", m.items_deleted),
        ("status_transitions", "counter", "Item status changes", m.status_transitions),
        ("searches", "counter", "Search queries served", m.searches),
        ("images_uploaded", "counter", "Images uploaded", m.images_uploaded),
        ("match_tasks_queued", "counter", "Matching tasks queued", m.match_tasks_queued),
        ("match_tasks_dropped", "counter", "Matching tasks dropped on a full queue", m.match_tasks_dropped),
        ("match_tasks_processed", "counter", "Matching passes completed", m.match_tasks_processed),
        ("match_tasks_failed", "counter", "Matching passes failed", m.match_tasks_failed),
        ("match_backlog", "gauge", "Matching tasks waiting", m.match_backlog),
        ("candidates_written", "counter", "Match candidates inserted or superseded", m.candidates_written),
        ("candidates_unchanged", "counter", "Match candidates already current", m.candidates_unchanged),
        ("candidates_skipped", "counter", "Candidate pairs skipped on scoring errors", m.candidates_skipped),
        ("uptime_seconds", "gauge", "Uptime seconds", m.uptime_seconds),
    ];
    let mut body = String::new();
    for (name, kind, help, value) in series {
        let _ = write!(
            body,
            "# HELP fundbuero_{name} {help}\n# TYPE fundbuero_{name} {kind}\nfundbuero_{name} {value}\n"
        );
    }
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "package": {
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "license": env!("CARGO_PKG_LICENSE"),
        },
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}
