// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric storage.
//!
//! Every backend implements [`MetricStore`]: gauges overwrite, counters add,
//! and a batch is applied as a unit. The backend is picked once at startup
//! from [`StorageConfig`] and used through the closed [`Storage`] enum.

pub mod error;
pub mod file;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use metrics_core::metric::{Metric, MetricKind, MetricValue};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use error::StorageError;
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use postgres::{PostgresOptions, PostgresStorage};

#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Overwrites the gauge and returns the stored value.
    async fn insert_gauge(&self, id: &str, value: f64) -> Result<f64, StorageError>;

    /// Adds `delta` to the counter (absent counters start at 0) and returns
    /// the new total.
    async fn insert_counter(&self, id: &str, delta: i64) -> Result<i64, StorageError>;

    /// Applies every metric or none of them.
    async fn insert_batch(&self, batch: &[Metric]) -> Result<(), StorageError>;

    async fn select_gauge(&self, id: &str) -> Result<f64, StorageError>;

    async fn select_counter(&self, id: &str) -> Result<i64, StorageError>;

    async fn gauges(&self) -> Result<HashMap<String, f64>, StorageError>;

    async fn counters(&self) -> Result<HashMap<String, i64>, StorageError>;

    async fn ping(&self) -> Result<(), StorageError>;

    /// Persists buffered state and releases resources.
    async fn close(&self) -> Result<(), StorageError>;

    async fn insert_metric(&self, metric: &Metric) -> Result<MetricValue, StorageError> {
        match metric.value {
            MetricValue::Gauge(v) => self.insert_gauge(&metric.id, v).await.map(MetricValue::Gauge),
            MetricValue::Counter(d) => self
                .insert_counter(&metric.id, d)
                .await
                .map(MetricValue::Counter),
        }
    }

    async fn select(&self, kind: MetricKind, id: &str) -> Result<MetricValue, StorageError> {
        match kind {
            MetricKind::Gauge => self.select_gauge(id).await.map(MetricValue::Gauge),
            MetricKind::Counter => self.select_counter(id).await.map(MetricValue::Counter),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
    Memory,
    File {
        path: PathBuf,
        restore: bool,
        /// Zero means every write is flushed before it returns.
        store_interval: Duration,
    },
    Postgres {
        dsn: String,
    },
}

pub enum Storage {
    Memory(MemoryStorage),
    File(FileStorage),
    Postgres(PostgresStorage),
}

impl Storage {
    /// Opens the configured backend. Background work (periodic journal
    /// flushes, retries) stops when `cancel` fires or on [`MetricStore::close`].
    pub async fn open(
        config: &StorageConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, StorageError> {
        let storage = match config {
            StorageConfig::Memory => Storage::Memory(MemoryStorage::default()),
            StorageConfig::File {
                path,
                restore,
                store_interval,
            } => Storage::File(FileStorage::open(path, *restore, *store_interval, cancel).await?),
            StorageConfig::Postgres { dsn } => {
                Storage::Postgres(PostgresStorage::connect(dsn, cancel).await?)
            }
        };
        info!("Using {} storage", storage.name());
        Ok(storage)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Storage::Memory(_) => "memory",
            Storage::File(_) => "file",
            Storage::Postgres(_) => "postgres",
        }
    }
}

macro_rules! delegate {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            Storage::Memory($store) => $call,
            Storage::File($store) => $call,
            Storage::Postgres($store) => $call,
        }
    };
}

#[async_trait]
impl MetricStore for Storage {
    async fn insert_gauge(&self, id: &str, value: f64) -> Result<f64, StorageError> {
        delegate!(self, store => store.insert_gauge(id, value).await)
    }

    async fn insert_counter(&self, id: &str, delta: i64) -> Result<i64, StorageError> {
        delegate!(self, store => store.insert_counter(id, delta).await)
    }

    async fn insert_batch(&self, batch: &[Metric]) -> Result<(), StorageError> {
        delegate!(self, store => store.insert_batch(batch).await)
    }

    async fn select_gauge(&self, id: &str) -> Result<f64, StorageError> {
        delegate!(self, store => store.select_gauge(id).await)
    }

    async fn select_counter(&self, id: &str) -> Result<i64, StorageError> {
        delegate!(self, store => store.select_counter(id).await)
    }

    async fn gauges(&self) -> Result<HashMap<String, f64>, StorageError> {
        delegate!(self, store => store.gauges().await)
    }

    async fn counters(&self) -> Result<HashMap<String, i64>, StorageError> {
        delegate!(self, store => store.counters().await)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        delegate!(self, store => store.ping().await)
    }

    async fn close(&self) -> Result<(), StorageError> {
        delegate!(self, store => store.close().await)
    }
}
