// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns the latest snapshot into a [`Batch`] once per report interval and
//! hands it to the worker queue.
//!
//! The queue is bounded. When every slot is taken the dispatcher drops the
//! cycle's batch with a warning instead of waiting, so a slow server never
//! delays sampling or later reports.

use crate::snapshot::{Snapshot, SnapshotHandle};
use metrics_core::metric::{Batch, Metric};
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub const RANDOM_VALUE: &str = "RandomValue";
pub const POLL_COUNT: &str = "PollCount";

/// Gauges for every parsable snapshot value, sorted by id, followed by
/// `RandomValue` and a `PollCount` increment of 1.
pub fn build_batch<R: Rng + ?Sized>(snapshot: &Snapshot, rng: &mut R) -> Batch {
    let mut batch: Batch = snapshot
        .iter()
        .filter_map(|(id, raw)| match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Some(Metric::gauge(id.as_str(), value)),
            _ => {
                error!("Skipping {id}: {raw:?} is not a number");
                None
            }
        })
        .collect();
    batch.sort_by(|a, b| a.id.cmp(&b.id));

    batch.push(Metric::gauge(RANDOM_VALUE, rng.gen::<f64>()));
    batch.push(Metric::counter(POLL_COUNT, 1));
    batch
}

#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    Queued,
    /// No snapshot yet.
    Skipped,
    /// Queue full, batch discarded.
    Dropped,
    Closed,
}

pub struct Dispatcher {
    snapshots: SnapshotHandle,
    queue: mpsc::Sender<Batch>,
    report_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        snapshots: SnapshotHandle,
        queue: mpsc::Sender<Batch>,
        report_interval: Duration,
    ) -> Self {
        Self {
            snapshots,
            queue,
            report_interval,
        }
    }

    /// Dispatches once per report interval, starting one interval from now.
    pub async fn run(self, cancel: CancellationToken) {
        let start = Instant::now() + self.report_interval;
        let mut ticker = interval_at(start, self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.dispatch().await == Dispatch::Closed {
                        break;
                    }
                }
            }
        }
        debug!("Dispatcher stopped");
    }

    pub async fn dispatch(&self) -> Dispatch {
        let snapshot = match self.snapshots.latest().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("No snapshot yet, skipping report");
                return Dispatch::Skipped;
            }
            Err(e) => {
                error!("{e}");
                return Dispatch::Skipped;
            }
        };

        let batch = build_batch(&snapshot, &mut rand::thread_rng());
        let size = batch.len();
        match self.queue.try_send(batch) {
            Ok(()) => {
                debug!("Queued batch of {size} metrics");
                Dispatch::Queued
            }
            Err(TrySendError::Full(_)) => {
                warn!("Batch queue is full, dropping batch of {size} metrics");
                Dispatch::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Batch queue closed");
                Dispatch::Closed
            }
        }
    }
}
