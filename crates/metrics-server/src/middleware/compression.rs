// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ApiError;
use crate::http::{content_type, extract_request_body};
use crate::router::MAX_BODY_SIZE;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics_core::security::compression::{gunzip, GZIP};
use tracing::{debug, warn};

const COMPRESSIBLE_TYPES: [&str; 6] = [
    "application/javascript",
    "application/json",
    "text/css",
    "text/html",
    "text/plain",
    "text/xml",
];

fn is_gzipped(headers: &HeaderMap) -> bool {
    let encoded = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|e| e.trim().eq_ignore_ascii_case(GZIP)));
    encoded
        && content_type(headers).is_some_and(|ct| COMPRESSIBLE_TYPES.contains(&ct.as_str()))
}

/// Replaces a gzip body with its decompressed bytes. Other bodies pass
/// through untouched. The inflated body is held to the same size limit as
/// the raw one.
pub async fn decompress_request(request: Request, next: Next) -> Response {
    if !is_gzipped(request.headers()) {
        return next.run(request).await;
    }

    let (mut parts, body) = match extract_request_body(request).await {
        Ok(split) => split,
        Err(rejection) => return rejection,
    };
    let plain = match gunzip(&body, MAX_BODY_SIZE) {
        Ok(plain) => plain,
        Err(e) => {
            warn!("Rejecting request to {}: {e}", parts.uri);
            return ApiError::from(e).into_response();
        }
    };
    debug!("Decompressed {} bytes into {}", body.len(), plain.len());

    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.remove(header::CONTENT_LENGTH);
    next.run(Request::from_parts(parts, Body::from(plain))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(encoding: Option<&'static str>, content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(encoding) = encoding {
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(encoding));
        }
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    #[test]
    fn test_is_gzipped() {
        assert!(is_gzipped(&headers(Some("gzip"), "application/json")));
        assert!(is_gzipped(&headers(Some("deflate, gzip"), "text/plain; charset=utf-8")));
        assert!(!is_gzipped(&headers(None, "application/json")));
        assert!(!is_gzipped(&headers(Some("br"), "application/json")));
        assert!(!is_gzipped(&headers(Some("gzip"), "application/octet-stream")));
    }
}
