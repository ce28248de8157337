//! Responses produced by the gate itself.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

/// Body of every 429 response. Clients match on this text exactly.
pub const RATE_LIMIT_BODY: &str = r#"{"error": "Rate limit exceeded. Please try again later."}"#;

/// Build the 429 response for a denied request.
pub fn rate_limited(retry_after: Duration) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            ),
            (header::RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after))),
        ],
        RATE_LIMIT_BODY,
    )
        .into_response()
}

/// Whole seconds until retry, rounded up, never less than one.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_is_valid_json() {
        let value: serde_json::Value = serde_json::from_str(RATE_LIMIT_BODY).unwrap();
        assert_eq!(value["error"], "Rate limit exceeded. Please try again later.");
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(200)), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(45)), 45);
        assert_eq!(retry_after_secs(Duration::from_millis(45_001)), 46);
    }

    #[test]
    fn test_rate_limited_headers() {
        let response = rate_limited(Duration::from_secs(30));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    }
}
