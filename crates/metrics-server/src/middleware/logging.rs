// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use axum::body::HttpBody;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::info;

/// One line per request with its outcome.
pub async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let size = response.body().size_hint().exact();
    info!(
        %uri,
        %method,
        duration = ?start.elapsed(),
        status = response.status().as_u16(),
        size = ?size,
        "Request handled"
    );
    response
}
