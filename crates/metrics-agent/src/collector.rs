// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic sampling of process statistics.
//!
//! The [`Collector`] reads one [`Snapshot`] per poll tick from a
//! [`StatsReader`] and hands it to the snapshot service. A failed tick is
//! logged and skipped; it never stops the loop.

use crate::error::CollectorError;
use crate::proc;
use crate::snapshot::{Snapshot, SnapshotHandle};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub trait StatsReader: Send + Sync {
    fn read(&self) -> Result<Snapshot, CollectorError>;
}

/// Reads `/proc` (or a fixture tree with the same layout).
pub struct ProcStatsReader {
    status_path: PathBuf,
    stat_path: PathBuf,
    meminfo_path: PathBuf,
    loadavg_path: PathBuf,
    clk_tck: u64,
}

impl Default for ProcStatsReader {
    fn default() -> Self {
        Self {
            status_path: PathBuf::from(proc::PROC_SELF_STATUS_PATH),
            stat_path: PathBuf::from(proc::PROC_SELF_STAT_PATH),
            meminfo_path: PathBuf::from(proc::PROC_MEMINFO_PATH),
            loadavg_path: PathBuf::from(proc::PROC_LOADAVG_PATH),
            clk_tck: proc::clk_tck(),
        }
    }
}

impl ProcStatsReader {
    /// Reader over `root/{status,stat,meminfo,loadavg}`.
    pub fn with_root(root: impl Into<PathBuf>, clk_tck: u64) -> Self {
        let root = root.into();
        Self {
            status_path: root.join("status"),
            stat_path: root.join("stat"),
            meminfo_path: root.join("meminfo"),
            loadavg_path: root.join("loadavg"),
            clk_tck,
        }
    }
}

impl StatsReader for ProcStatsReader {
    fn read(&self) -> Result<Snapshot, CollectorError> {
        let sources: [(&'static str, Result<Vec<proc::Stat>, io::Error>); 4] = [
            ("status", proc::read_status_from_path(&self.status_path)),
            ("stat", proc::read_stat_from_path(&self.stat_path, self.clk_tck)),
            ("meminfo", proc::read_meminfo_from_path(&self.meminfo_path)),
            ("loadavg", proc::read_loadavg_from_path(&self.loadavg_path)),
        ];

        let mut snapshot = Snapshot::new();
        for (source_name, result) in sources {
            match result {
                Ok(stats) => snapshot.extend(
                    stats
                        .into_iter()
                        .map(|(name, value)| (name.to_string(), value)),
                ),
                Err(source) => debug!(
                    "{}",
                    CollectorError::Read {
                        source_name,
                        source
                    }
                ),
            }
        }

        if snapshot.is_empty() {
            return Err(CollectorError::Empty);
        }
        Ok(snapshot)
    }
}

pub struct Collector<R> {
    reader: R,
    poll_interval: Duration,
    snapshots: SnapshotHandle,
}

impl<R: StatsReader> Collector<R> {
    pub fn new(reader: R, poll_interval: Duration, snapshots: SnapshotHandle) -> Self {
        Self {
            reader,
            poll_interval,
            snapshots,
        }
    }

    /// Samples once per poll interval until `cancel` fires. The first sample is
    /// taken immediately.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Collector stopped");
                    return;
                }
                _ = ticker.tick() => self.sample(),
            }
        }
    }

    fn sample(&self) {
        match self.reader.read() {
            Ok(snapshot) => {
                debug!("Sampled {} statistics", snapshot.len());
                if self.snapshots.push(snapshot).is_err() {
                    error!("Failed to publish snapshot - snapshot service stopped");
                }
            }
            Err(e) => error!("Skipping poll tick: {e}"),
        }
    }
}
