// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::SecurityState;
use crate::error::ApiError;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::warn;

pub const REAL_IP_HEADER: &str = "X-Real-IP";

fn real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Rejects with 403 unless `X-Real-IP` is inside the trusted subnet.
pub async fn check_trusted_subnet(
    State(security): State<Arc<SecurityState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(subnet) = security.trusted_subnet else {
        return next.run(request).await;
    };
    match real_ip(request.headers()) {
        Some(ip) if subnet.contains(&ip) => next.run(request).await,
        ip => {
            warn!("Rejecting request to {} from untrusted address {ip:?}", request.uri());
            ApiError::Forbidden("untrusted source address".to_string()).into_response()
        }
    }
}
