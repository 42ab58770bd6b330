// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Memory storage persisted to a newline-delimited JSON journal.
//!
//! Each flush rewrites the whole journal: every counter, then every gauge,
//! one [`Metric`] per line. With a zero store interval each mutation flushes
//! before it returns; otherwise a background task flushes periodically and
//! [`MetricStore::close`] flushes one last time.

use super::{MemoryStorage, MetricStore, StorageError};
use async_trait::async_trait;
use metrics_core::metric::Metric;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Journal {
    memory: MemoryStorage,
    path: PathBuf,
    /// Serialises flushes so an older snapshot never replaces a newer one.
    flush_lock: Mutex<()>,
}

impl Journal {
    async fn flush(&self) -> Result<usize, StorageError> {
        let _guard = self.flush_lock.lock().await;
        let metrics = self.memory.snapshot()?;

        let mut contents = Vec::new();
        for metric in &metrics {
            serde_json::to_writer(&mut contents, metric)?;
            contents.push(b'\n');
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Flushed {} metrics to {}", metrics.len(), self.path.display());
        Ok(metrics.len())
    }

    async fn restore(&self) -> Result<usize, StorageError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No journal at {}, starting empty", self.path.display());
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut restored = 0;
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Metric>(line) {
                Ok(metric) => {
                    self.memory.apply(&metric)?;
                    restored += 1;
                }
                Err(e) => warn!(
                    "Skipping malformed journal line {} in {}: {e}",
                    line_no + 1,
                    self.path.display()
                ),
            }
        }
        Ok(restored)
    }
}

pub struct FileStorage {
    journal: Arc<Journal>,
    write_through: bool,
    cancel: CancellationToken,
    flush_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FileStorage {
    pub async fn open(
        path: &Path,
        restore: bool,
        store_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, StorageError> {
        let journal = Arc::new(Journal {
            memory: MemoryStorage::default(),
            path: path.to_path_buf(),
            flush_lock: Mutex::new(()),
        });

        if restore {
            let restored = journal.restore().await?;
            info!("Restored {restored} metrics from {}", path.display());
        }

        let cancel = cancel.child_token();
        let write_through = store_interval.is_zero();
        let flush_task = if write_through {
            None
        } else {
            Some(tokio::spawn(run_periodic_flush(
                Arc::clone(&journal),
                store_interval,
                cancel.clone(),
            )))
        };

        Ok(Self {
            journal,
            write_through,
            cancel,
            flush_task: std::sync::Mutex::new(flush_task),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.journal.path
    }

    /// Writes the current state to the journal now.
    pub async fn flush(&self) -> Result<usize, StorageError> {
        self.journal.flush().await
    }

    async fn after_write(&self) -> Result<(), StorageError> {
        if self.write_through {
            self.journal.flush().await?;
        }
        Ok(())
    }
}

async fn run_periodic_flush(journal: Arc<Journal>, every: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = journal.flush().await {
                    error!("Periodic flush to {} failed: {e}", journal.path.display());
                }
            }
        }
    }
    debug!("Periodic flush stopped");
}

#[async_trait]
impl MetricStore for FileStorage {
    async fn insert_gauge(&self, id: &str, value: f64) -> Result<f64, StorageError> {
        let stored = self.journal.memory.insert_gauge(id, value).await?;
        self.after_write().await?;
        Ok(stored)
    }

    async fn insert_counter(&self, id: &str, delta: i64) -> Result<i64, StorageError> {
        let stored = self.journal.memory.insert_counter(id, delta).await?;
        self.after_write().await?;
        Ok(stored)
    }

    async fn insert_batch(&self, batch: &[Metric]) -> Result<(), StorageError> {
        self.journal.memory.insert_batch(batch).await?;
        self.after_write().await
    }

    async fn select_gauge(&self, id: &str) -> Result<f64, StorageError> {
        self.journal.memory.select_gauge(id).await
    }

    async fn select_counter(&self, id: &str) -> Result<i64, StorageError> {
        self.journal.memory.select_counter(id).await
    }

    async fn gauges(&self) -> Result<HashMap<String, f64>, StorageError> {
        self.journal.memory.gauges().await
    }

    async fn counters(&self) -> Result<HashMap<String, i64>, StorageError> {
        self.journal.memory.counters().await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.journal.memory.ping().await
    }

    /// Stops the periodic flush, then flushes once more. Closing twice is a no-op.
    async fn close(&self) -> Result<(), StorageError> {
        if self.journal.memory.ping().await.is_err() {
            return Ok(());
        }
        self.cancel.cancel();
        let task = self
            .flush_task
            .lock()
            .map_err(|_| StorageError::Poisoned)?
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Periodic flush task failed: {e}");
            }
        }

        let flushed = self.journal.flush().await?;
        self.journal.memory.mark_closed();
        info!("Saved {flushed} metrics to {}", self.journal.path.display());
        Ok(())
    }
}
