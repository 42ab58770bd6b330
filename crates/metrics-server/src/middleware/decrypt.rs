// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::SecurityState;
use crate::error::ApiError;
use crate::http::extract_request_body;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::warn;

pub async fn decrypt_body(
    State(security): State<Arc<SecurityState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(key) = &security.decryption_key else {
        return next.run(request).await;
    };

    let (mut parts, body) = match extract_request_body(request).await {
        Ok(split) => split,
        Err(rejection) => return rejection,
    };
    let plain = match key.decrypt(&body) {
        Ok(plain) => plain,
        Err(e) => {
            warn!("Rejecting request to {}: {e}", parts.uri);
            return ApiError::from(e).into_response();
        }
    };
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    next.run(Request::from_parts(parts, Body::from(plain))).await
}
