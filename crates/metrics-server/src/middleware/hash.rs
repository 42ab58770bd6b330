// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::SecurityState;
use crate::error::ApiError;
use crate::http::extract_request_body;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics_core::security::HASH_HEADER;
use std::sync::Arc;
use tracing::{debug, warn};

/// Checks the `HashSHA256` header against the body. Requests without the
/// header, or any request when no key is configured, are let through.
pub async fn verify_hash(
    State(security): State<Arc<SecurityState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(signer) = &security.signer else {
        return next.run(request).await;
    };
    let digest = request
        .headers()
        .get(HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default();
    if digest.is_empty() {
        debug!("No {HASH_HEADER} header on {}, skipping verification", request.uri());
        return next.run(request).await;
    }

    let (parts, body) = match extract_request_body(request).await {
        Ok(split) => split,
        Err(rejection) => return rejection,
    };
    if let Err(e) = signer.verify(&body, &digest) {
        warn!("Rejecting request to {}: {e}", parts.uri);
        return ApiError::from(e).into_response();
    }
    next.run(Request::from_parts(parts, Body::from(body))).await
}
