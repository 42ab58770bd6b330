// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ApiError;
use crate::http::is_json;
use crate::storage::{MetricStore, Storage};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Html;
use axum::Json;
use bytes::Bytes;
use metrics_core::metric::{Batch, Metric, MetricKind, MetricQuery, MetricValue};
use serde::de::DeserializeOwned;
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

pub type AppState = Arc<Storage>;

fn decode_json<T: DeserializeOwned>(headers: &HeaderMap, body: &[u8]) -> Result<T, ApiError> {
    if !is_json(headers) {
        return Err(ApiError::BadRequest(
            "Invalid Content-Type, expected application/json".to_string(),
        ));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// `POST /update/{type}/{name}/{value}`
pub async fn update_from_path(
    State(storage): State<AppState>,
    Path((kind, id, raw)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let kind: MetricKind = kind.parse()?;
    let value = MetricValue::parse(kind, &raw)?;
    storage.insert_metric(&Metric { id, value }).await?;
    Ok(StatusCode::OK)
}

/// `POST /update/`: stores one metric and echoes what is now stored.
pub async fn update(
    State(storage): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let metric: Metric = decode_json(&headers, &body)?;
    let value = storage.insert_metric(&metric).await?;
    Ok(Json(Metric {
        id: metric.id,
        value,
    }))
}

/// `POST /updates/`
pub async fn update_batch(
    State(storage): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let batch: Batch = decode_json(&headers, &body)?;
    storage.insert_batch(&batch).await?;
    debug!("Stored batch of {} metrics", batch.len());
    Ok(StatusCode::OK)
}

/// `POST /value/`
pub async fn value(
    State(storage): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let query: MetricQuery = decode_json(&headers, &body)?;
    let value = storage.select(query.kind, &query.id).await?;
    Ok(Json(Metric {
        id: query.id,
        value,
    }))
}

/// `GET /value/{type}/{name}` as plain text.
pub async fn value_from_path(
    State(storage): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let kind: MetricKind = kind.parse()?;
    Ok(storage.select(kind, &id).await?.to_string())
}

/// `GET /`
pub async fn list(State(storage): State<AppState>) -> Result<Html<String>, ApiError> {
    let mut rows: Vec<(String, MetricValue)> = storage
        .gauges()
        .await?
        .into_iter()
        .map(|(id, v)| (id, MetricValue::Gauge(v)))
        .chain(
            storage
                .counters()
                .await?
                .into_iter()
                .map(|(id, d)| (id, MetricValue::Counter(d))),
        )
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let mut page = String::from("<html><body><ul>\n");
    for (id, value) in rows {
        let _ = writeln!(page, "<li>{}: {value}</li>", escape_html(&id));
    }
    page.push_str("</ul></body></html>\n");
    Ok(Html(page))
}

/// `GET /ping`
pub async fn ping(State(storage): State<AppState>) -> Result<&'static str, ApiError> {
    storage
        .ping()
        .await
        .map_err(|e| ApiError::Internal(format!("storage unavailable: {e}")))?;
    Ok("OK")
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("Alloc"), "Alloc");
        assert_eq!(escape_html("<b>&'x'"), "&lt;b&gt;&amp;&#39;x&#39;");
    }
}
