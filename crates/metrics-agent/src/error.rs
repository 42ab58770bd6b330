// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use metrics_core::config::ConfigError;
use metrics_core::retry::RetryError;
use metrics_core::security::SecurityError;
use reqwest::StatusCode;
use std::io;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("failed to read {source_name}: {source}")]
    Read {
        source_name: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("no statistics could be read")]
    Empty,
}

/// Outcome of a single delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    #[error("failed to prepare payload: {0}")]
    Payload(String),
    #[error("{}: {1}", .0.map_or_else(|| "network error".to_string(), |s| s.to_string()))]
    Destination(Option<StatusCode>, String),
}

impl ShippingError {
    /// Network failures and gateway-class 5xx responses are worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ShippingError::Payload(_) => false,
            ShippingError::Destination(None, _) => true,
            ShippingError::Destination(Some(status), _) => matches!(
                *status,
                StatusCode::INTERNAL_SERVER_ERROR
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("failed to seal batch: {0}")]
    Seal(#[from] SecurityError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to deliver batch: {0}")]
    Delivery(#[from] RetryError<ShippingError>),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("key error: {0}")]
    Key(#[from] SecurityError),
    #[error("initialization error: {0}")]
    Init(#[from] FlushError),
    #[error("agent already started")]
    AlreadyStarted,
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}
