//! API middleware layers.

use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::config::defaults::RETRY_AFTER_SECS;

/// Adds `Retry-After` to every 503 that does not already carry one, so
/// pollers back off while the store or ingest queue is unavailable.
pub async fn add_retry_after(request: axum::extract::Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    if response.status() == StatusCode::SERVICE_UNAVAILABLE && !response.headers().contains_key(header::RETRY_AFTER)
    {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::middleware;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/down", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .layer(middleware::from_fn(add_retry_after))
    }

    #[tokio::test]
    async fn test_retry_after_only_on_503() {
        let resp = app()
            .oneshot(Request::get("/down").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers().get(header::RETRY_AFTER).unwrap(), &RETRY_AFTER_SECS.to_string());

        let resp = app()
            .oneshot(Request::get("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.headers().get(header::RETRY_AFTER).is_none());
    }
}
