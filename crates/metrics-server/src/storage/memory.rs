// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{MetricStore, StorageError};
use async_trait::async_trait;
use metrics_core::metric::{Metric, MetricKind, MetricValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct State {
    counters: HashMap<String, i64>,
    gauges: HashMap<String, f64>,
}

impl State {
    fn apply(&mut self, metric: &Metric) -> MetricValue {
        match metric.value {
            MetricValue::Gauge(v) => {
                self.gauges.insert(metric.id.clone(), v);
                MetricValue::Gauge(v)
            }
            MetricValue::Counter(d) => {
                let total = self.counters.entry(metric.id.clone()).or_insert(0);
                *total = total.saturating_add(d);
                MetricValue::Counter(*total)
            }
        }
    }
}

/// Counters and gauges behind one reader/writer lock. A batch holds the
/// write lock from its first metric to its last.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
    closed: AtomicBool,
}

impl MemoryStorage {
    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        self.state.read().map_err(|_| StorageError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        self.state.write().map_err(|_| StorageError::Poisoned)
    }

    pub fn apply(&self, metric: &Metric) -> Result<MetricValue, StorageError> {
        Ok(self.write()?.apply(metric))
    }

    pub fn apply_batch(&self, batch: &[Metric]) -> Result<(), StorageError> {
        let mut state = self.write()?;
        for metric in batch {
            state.apply(metric);
        }
        Ok(())
    }

    /// All counters sorted by id, then all gauges sorted by id.
    pub fn snapshot(&self) -> Result<Vec<Metric>, StorageError> {
        let state = self.read()?;
        let mut counters: Vec<_> = state.counters.iter().collect();
        counters.sort_by(|a, b| a.0.cmp(b.0));
        let mut gauges: Vec<_> = state.gauges.iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(b.0));

        Ok(counters
            .into_iter()
            .map(|(id, d)| Metric::counter(id.as_str(), *d))
            .chain(gauges.into_iter().map(|(id, v)| Metric::gauge(id.as_str(), *v)))
            .collect())
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl MetricStore for MemoryStorage {
    async fn insert_gauge(&self, id: &str, value: f64) -> Result<f64, StorageError> {
        self.write()?.gauges.insert(id.to_string(), value);
        Ok(value)
    }

    async fn insert_counter(&self, id: &str, delta: i64) -> Result<i64, StorageError> {
        let mut state = self.write()?;
        let total = state.counters.entry(id.to_string()).or_insert(0);
        *total = total.saturating_add(delta);
        Ok(*total)
    }

    async fn insert_batch(&self, batch: &[Metric]) -> Result<(), StorageError> {
        self.apply_batch(batch)
    }

    async fn select_gauge(&self, id: &str) -> Result<f64, StorageError> {
        self.read()?
            .gauges
            .get(id)
            .copied()
            .ok_or_else(|| StorageError::NotFound {
                kind: MetricKind::Gauge,
                id: id.to_string(),
            })
    }

    async fn select_counter(&self, id: &str) -> Result<i64, StorageError> {
        self.read()?
            .counters
            .get(id)
            .copied()
            .ok_or_else(|| StorageError::NotFound {
                kind: MetricKind::Counter,
                id: id.to_string(),
            })
    }

    async fn gauges(&self) -> Result<HashMap<String, f64>, StorageError> {
        Ok(self.read()?.gauges.clone())
    }

    async fn counters(&self) -> Result<HashMap<String, i64>, StorageError> {
        Ok(self.read()?.counters.clone())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.read().map(|_| ())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.mark_closed();
        Ok(())
    }
}
