// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use metrics_core::metric::MetricKind;
use metrics_core::retry::RetryError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{kind} metric {id} not found")]
    NotFound { kind: MetricKind, id: String },

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("storage is closed")]
    Closed,

    #[error("journal I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("journal encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("database unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: usize,
        #[source]
        source: sqlx::Error,
    },
}

impl StorageError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

impl From<RetryError<sqlx::Error>> for StorageError {
    fn from(err: RetryError<sqlx::Error>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => StorageError::Unavailable {
                attempts,
                source: last,
            },
            RetryError::Permanent(e) => StorageError::Database(e),
            RetryError::Cancelled => StorageError::Closed,
        }
    }
}
