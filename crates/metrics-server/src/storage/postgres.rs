// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Postgres backend.
//!
//! Counters and gauges live in two tables keyed by metric id. Writes are
//! upserts, batches run in a single transaction, and any operation that fails
//! with a connection-class error is retried with the linear backoff schedule.

use super::{MetricStore, StorageError};
use async_trait::async_trait;
use metrics_core::metric::{Metric, MetricKind, MetricValue};
use metrics_core::retry::{retry, RetryStrategy};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Connection, Postgres, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub max_connections: u32,
    /// How long one connect or acquire may take before it counts as a failed attempt.
    pub acquire_timeout: Duration,
    pub retry_strategy: RetryStrategy,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            retry_strategy: RetryStrategy::default(),
        }
    }
}

const UPSERT_GAUGE: &str = "INSERT INTO gauges (id, gauge) VALUES ($1, $2) \
     ON CONFLICT (id) DO UPDATE SET gauge = EXCLUDED.gauge RETURNING gauge";
const UPSERT_COUNTER: &str = "INSERT INTO counters (id, counter) VALUES ($1, $2) \
     ON CONFLICT (id) DO UPDATE SET counter = counters.counter + EXCLUDED.counter \
     RETURNING counter";

/// Connection failures worth retrying: I/O, pool exhaustion, TLS, and
/// SQLSTATE class 08 (connection exception).
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_) => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| code.starts_with("08")),
        _ => false,
    }
}

pub struct PostgresStorage {
    pool: PgPool,
    retry_strategy: RetryStrategy,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PostgresStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStorage").finish_non_exhaustive()
    }
}

impl PostgresStorage {
    /// Connects and runs the schema migration.
    pub async fn connect(dsn: &str, cancel: &CancellationToken) -> Result<Self, StorageError> {
        Self::connect_with(dsn, PostgresOptions::default(), cancel).await
    }

    pub async fn connect_with(
        dsn: &str,
        options: PostgresOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, StorageError> {
        let cancel = cancel.child_token();
        let retry_strategy = options.retry_strategy;
        let pool = retry(&retry_strategy, &cancel, is_transient, |attempt| {
            debug!("Connecting to database, attempt {attempt}");
            PgPoolOptions::new()
                .max_connections(options.max_connections)
                .acquire_timeout(options.acquire_timeout)
                .connect(dsn)
        })
        .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database schema is up to date");

        Ok(Self {
            pool,
            retry_strategy,
            cancel,
        })
    }

    async fn upsert_gauge(&self, id: &str, value: f64) -> Result<f64, sqlx::Error> {
        sqlx::query_scalar::<_, f64>(UPSERT_GAUGE)
            .bind(id)
            .bind(value)
            .fetch_one(&self.pool)
            .await
    }

    async fn upsert_counter(&self, id: &str, delta: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(UPSERT_COUNTER)
            .bind(id)
            .bind(delta)
            .fetch_one(&self.pool)
            .await
    }

    async fn upsert_batch(&self, batch: &[Metric]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if let Err(e) = upsert_all(&mut tx, batch).await {
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback failed: {rollback}");
            }
            return Err(e);
        }
        tx.commit().await
    }
}

async fn upsert_all(tx: &mut Transaction<'_, Postgres>, batch: &[Metric]) -> Result<(), sqlx::Error> {
    for metric in batch {
        match metric.value {
            MetricValue::Gauge(v) => {
                sqlx::query(UPSERT_GAUGE)
                    .bind(&metric.id)
                    .bind(v)
                    .execute(&mut **tx)
                    .await?;
            }
            MetricValue::Counter(d) => {
                sqlx::query(UPSERT_COUNTER)
                    .bind(&metric.id)
                    .bind(d)
                    .execute(&mut **tx)
                    .await?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl MetricStore for PostgresStorage {
    async fn insert_gauge(&self, id: &str, value: f64) -> Result<f64, StorageError> {
        Ok(retry(&self.retry_strategy, &self.cancel, is_transient, |_| {
            self.upsert_gauge(id, value)
        })
        .await?)
    }

    async fn insert_counter(&self, id: &str, delta: i64) -> Result<i64, StorageError> {
        Ok(retry(&self.retry_strategy, &self.cancel, is_transient, |_| {
            self.upsert_counter(id, delta)
        })
        .await?)
    }

    async fn insert_batch(&self, batch: &[Metric]) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        retry(&self.retry_strategy, &self.cancel, is_transient, |_| {
            self.upsert_batch(batch)
        })
        .await?;
        debug!("Stored batch of {} metrics", batch.len());
        Ok(())
    }

    async fn select_gauge(&self, id: &str) -> Result<f64, StorageError> {
        let found = retry(&self.retry_strategy, &self.cancel, is_transient, |_| {
            sqlx::query_scalar::<_, f64>("SELECT gauge FROM gauges WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
        })
        .await?;
        found.ok_or_else(|| StorageError::NotFound {
            kind: MetricKind::Gauge,
            id: id.to_string(),
        })
    }

    async fn select_counter(&self, id: &str) -> Result<i64, StorageError> {
        let found = retry(&self.retry_strategy, &self.cancel, is_transient, |_| {
            sqlx::query_scalar::<_, i64>("SELECT counter FROM counters WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
        })
        .await?;
        found.ok_or_else(|| StorageError::NotFound {
            kind: MetricKind::Counter,
            id: id.to_string(),
        })
    }

    async fn gauges(&self) -> Result<HashMap<String, f64>, StorageError> {
        let rows = retry(&self.retry_strategy, &self.cancel, is_transient, |_| {
            sqlx::query_as::<_, (String, f64)>("SELECT id, gauge FROM gauges").fetch_all(&self.pool)
        })
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn counters(&self) -> Result<HashMap<String, i64>, StorageError> {
        let rows = retry(&self.retry_strategy, &self.cancel, is_transient, |_| {
            sqlx::query_as::<_, (String, i64)>("SELECT id, counter FROM counters")
                .fetch_all(&self.pool)
        })
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Single attempt.
    async fn ping(&self) -> Result<(), StorageError> {
        if self.pool.is_closed() {
            return Err(StorageError::Closed);
        }
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.cancel.cancel();
        self.pool.close().await;
        info!("Database pool closed");
        Ok(())
    }
}
