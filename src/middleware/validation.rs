use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Default request body cap; image uploads are the largest bodies.
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Body limit from `FUNDBUERO_MAX_BODY_SIZE`, clamped to 1..=50 MiB.
pub fn max_body_size() -> usize {
    std::env::var("FUNDBUERO_MAX_BODY_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_BODY_SIZE)
        .clamp(1024 * 1024, 50 * 1024 * 1024)
}

/// Rejects traversal-looking URIs and oversized declared bodies before any
/// handler runs, and logs scanner user agents.
pub async fn validate_request_middleware(req: Request, next: Next) -> Response {
    if contains_path_traversal(req.uri().path()) {
        return AppError::BadRequest("Path traversal detected in request".to_string()).into_response();
    }

    if let Some(ua) = req.headers().get("user-agent").and_then(|v| v.to_str().ok()) {
        if is_suspicious_user_agent(ua) {
            tracing::warn!("Suspicious user agent detected: {}", sanitize_for_logging(ua));
        }
    }

    if matches!(req.method(), &Method::POST | &Method::PUT | &Method::PATCH) {
        let declared = req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<usize>().ok());
        let max = max_body_size();
        if let Some(length) = declared.filter(|&l| l > max) {
            tracing::debug!(length, max, "rejecting oversized body");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({
                    "error": {
                        "code": "PAYLOAD_TOO_LARGE",
                        "message": format!("Request body exceeds maximum size of {} bytes", max),
                    },
                    "status": 413,
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })),
            )
                .into_response();
        }
    }

    next.run(req).await
}

fn contains_path_traversal(path: &str) -> bool {
    let lower = path.to_lowercase();
    if path.contains("/..") || path.contains("\\..") || path.starts_with("..") || path.contains("/./") {
        return true;
    }
    const ENCODED: &[&str] = &["%2e%2e", "%252e%252e", "%2e/", "/%2e", "%2f%2e", "%5c", "%00"];
    ENCODED.iter().any(|p| lower.contains(p)) || path.contains('\0')
}

fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua_lower = ua.to_lowercase();
    ["nikto", "sqlmap", "havij", "acunetix", "scanner"].iter().any(|p| ua_lower.contains(p))
}

/// Parses an item id from a path segment.
pub fn parse_item_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::BadRequest(format!("Invalid item id: {}", sanitize_for_logging(raw))))
}

/// Strips control characters and caps length for log output.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_traversal_detection() {
        assert!(contains_path_traversal("/items/../admin"));
        assert!(contains_path_traversal("%2e%2e/etc"));
        assert!(contains_path_traversal("/items/a\0b"));
        assert!(!contains_path_traversal("/items/550e8400-e29b-41d4-a716-446655440000/matches"));
    }

    #[test]
    fn test_suspicious_user_agents() {
        assert!(is_suspicious_user_agent("sqlmap/1.0"));
        assert!(!is_suspicious_user_agent("okhttp/4.12.0"));
    }

    #[test]
    fn test_item_id_parsing() {
        assert!(parse_item_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(matches!(parse_item_id("not-a-uuid"), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(sanitize_for_logging("plain"), "plain");
        assert!(!sanitize_for_logging("a\x00b").contains('\x00'));
        assert_eq!(sanitize_for_logging(&"x".repeat(300)).len(), 200);
    }
}
