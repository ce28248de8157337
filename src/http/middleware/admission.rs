//! Admission middleware.
//! Runs the [`AdmissionFilter`] before any downstream handler.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::http::response::rate_limited;
use crate::security::{AdmissionFilter, Decision, DenyReason};

pub async fn admission_middleware(
    State(filter): State<Arc<AdmissionFilter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let decision = filter.evaluate_request(request.method(), request.headers(), request.uri().path());

    match decision {
        Decision::Admit => next.run(request).await,
        Decision::Deny(DenyReason::RateLimitExceeded { retry_after }) => rate_limited(retry_after),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdmissionConfig;
    use crate::http::response::RATE_LIMIT_BODY;
    use crate::security::ManualClock;
    use axum::{http::StatusCode, middleware::from_fn_with_state, routing::get, Router};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(filter: Arc<AdmissionFilter>) -> Router {
        Router::new()
            .route("/api/greeting", get(|| async { "Hello" }))
            .route("/api/greeting/{name}", get(|| async { "Hello, you" }))
            .layer(from_fn_with_state(filter, admission_middleware))
    }

    fn request(path: &str, forwarded_for: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(ip) = forwarded_for {
            builder = builder.header("X-Forwarded-For", ip);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limited_response_contract() {
        let app = app(Arc::new(AdmissionFilter::default()));

        for _ in 0..100 {
            let res = app.clone().oneshot(request("/api/greeting", Some("1.2.3.4"))).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app.clone().oneshot(request("/api/greeting", Some("1.2.3.4"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()["content-type"], "application/json");
        assert!(res.headers().contains_key("retry-after"));
        assert_eq!(body_string(res).await, RATE_LIMIT_BODY);
    }

    #[tokio::test]
    async fn test_endpoints_share_one_limit_per_identity() {
        let config = AdmissionConfig {
            bucket_capacity: 10,
            ..AdmissionConfig::default()
        };
        let app = app(Arc::new(AdmissionFilter::new(&config)));

        for _ in 0..5 {
            let a = app.clone().oneshot(request("/api/greeting", None)).await.unwrap();
            let b = app.clone().oneshot(request("/api/greeting/TestUser", None)).await.unwrap();
            assert_eq!(a.status(), StatusCode::OK);
            assert_eq!(b.status(), StatusCode::OK);
        }

        let res = app.clone().oneshot(request("/api/greeting", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

        let res = app.oneshot(request("/api/greeting", Some("9.9.9.9"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admits_again_after_window() {
        let clock = ManualClock::new();
        let config = AdmissionConfig {
            bucket_capacity: 1,
            ..AdmissionConfig::default()
        };
        let filter = Arc::new(AdmissionFilter::with_clock(&config, Arc::new(clock.clone())));
        let app = app(filter);

        let res = app.clone().oneshot(request("/api/greeting", Some("1.2.3.4"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = app.clone().oneshot(request("/api/greeting", Some("1.2.3.4"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()["retry-after"], "60");

        clock.advance(Duration::from_secs(60));
        let res = app.oneshot(request("/api/greeting", Some("1.2.3.4"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
