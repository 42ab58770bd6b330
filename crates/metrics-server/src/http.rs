// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use axum::{
    extract::{FromRequest, Request},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Splits a request into its parts and fully buffered body. The rejection
/// (for instance an exceeded body limit) is returned as a ready response.
pub async fn extract_request_body(request: Request) -> Result<(Parts, Bytes), Response> {
    let (parts, body) = request.into_parts();
    let bytes = Bytes::from_request(Request::from_parts(parts.clone(), body), &())
        .await
        .map_err(IntoResponse::into_response)?;
    Ok((parts, bytes))
}

/// Media type of the request without parameters, lowercased.
#[must_use]
pub fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
}

#[must_use]
pub fn is_json(headers: &HeaderMap) -> bool {
    content_type(headers).as_deref() == Some(JSON_CONTENT_TYPE)
}

pub async fn handler_not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}
