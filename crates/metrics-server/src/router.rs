// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::handlers::{self, AppState};
use crate::http::handler_not_found;
use crate::middleware::{
    check_trusted_subnet, decompress_request, decrypt_body, log_request, verify_hash,
    SecurityState,
};
use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::predicate::SizeAbove;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;

pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Update routes run the whole security chain and gzip their responses for
/// clients that accept it. Read routes only gunzip.
pub fn build_router(storage: AppState, security: Arc<SecurityState>) -> Router {
    // layers run bottom to top on the way in
    let updates = Router::new()
        .route("/update/", post(handlers::update))
        .route("/update/{kind}/{id}/{value}", post(handlers::update_from_path))
        .route("/updates/", post(handlers::update_batch))
        .layer(from_fn_with_state(Arc::clone(&security), decrypt_body))
        .layer(from_fn_with_state(Arc::clone(&security), verify_hash))
        .layer(from_fn(decompress_request))
        .layer(from_fn_with_state(security, check_trusted_subnet))
        .layer(CompressionLayer::new().compress_when(SizeAbove::new(0)));

    let reads = Router::new()
        .route("/", get(handlers::list))
        .route("/value/", post(handlers::value))
        .route("/value/{kind}/{id}", get(handlers::value_from_path))
        .route("/ping", get(handlers::ping))
        .layer(from_fn(decompress_request));

    Router::new()
        .merge(updates)
        .merge(reads)
        .fallback(handler_not_found)
        .layer(from_fn(log_request))
        .layer(CatchPanicLayer::new())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .with_state(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use metrics_core::security::compression::gzip;
    use tower::ServiceExt;

    fn router() -> Router {
        build_router(
            Arc::new(Storage::Memory(MemoryStorage::default())),
            Arc::new(SecurityState::default()),
        )
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    fn post(uri: &str, content_type: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_update_from_path() {
        let router = router();
        let (status, _) = send(&router, post("/update/gauge/Alloc/128.5", "text/plain", "")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&router, get("/value/gauge/Alloc")).await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "128.5"));
    }

    #[tokio::test]
    async fn test_update_from_path_rejects_bad_input() {
        let router = router();
        let (status, _) = send(&router, post("/update/histogram/x/1", "text/plain", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&router, post("/update/counter/x/1.5", "text/plain", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&router, post("/update/gauge/x/none", "text/plain", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&router, post("/update/gauge/", "text/plain", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_json_echoes_total() {
        let router = router();
        let body = r#"{"id":"PollCount","type":"counter","delta":3}"#;
        send(&router, post("/update/", "application/json", body)).await;
        let (status, echoed) = send(&router, post("/update/", "application/json", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(echoed, r#"{"id":"PollCount","type":"counter","delta":6}"#);
    }

    #[tokio::test]
    async fn test_json_routes_require_content_type() {
        let router = router();
        let (status, body) = send(
            &router,
            post("/update/", "text/plain", r#"{"id":"a","type":"gauge","value":1}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid Content-Type, expected application/json");

        let (status, _) = send(&router, post("/updates/", "application/json", "[{")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_value_json() {
        let router = router();
        send(
            &router,
            post("/updates/", "application/json", r#"[{"id":"Alloc","type":"gauge","value":2.5}]"#),
        )
        .await;

        let (status, body) = send(
            &router,
            post("/value/", "application/json", r#"{"id":"Alloc","type":"gauge"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"id":"Alloc","type":"gauge","value":2.5}"#);

        let (status, _) = send(
            &router,
            post("/value/", "application/json", r#"{"id":"Alloc","type":"counter"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list() {
        let router = router();
        send(&router, post("/update/gauge/Zeta/1.5", "text/plain", "")).await;
        send(&router, post("/update/counter/Alpha/2", "text/plain", "")).await;
        let (status, body) = send(&router, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        let alpha = body.find("<li>Alpha: 2</li>").unwrap();
        let zeta = body.find("<li>Zeta: 1.5</li>").unwrap();
        assert!(alpha < zeta);
    }

    #[tokio::test]
    async fn test_ping_and_fallback() {
        let router = router();
        assert_eq!(send(&router, get("/ping")).await.0, StatusCode::OK);
        let (status, body) = send(&router, get("/nowhere")).await;
        assert_eq!((status, body.as_str()), (StatusCode::NOT_FOUND, "Not Found"));
    }

    #[tokio::test]
    async fn test_body_limit() {
        let router = router();
        let big = "x".repeat(MAX_BODY_SIZE + 1);
        let (status, _) = send(&router, post("/updates/", "application/json", &big)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_inflated_body_limit() {
        let router = router();
        let compressed = gzip(&vec![b' '; MAX_BODY_SIZE + 1]).unwrap();
        assert!(compressed.len() < MAX_BODY_SIZE);
        let request = Request::post("/updates/")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Body::from(compressed))
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body, format!("decompressed payload exceeds {MAX_BODY_SIZE} bytes"));
    }
}
