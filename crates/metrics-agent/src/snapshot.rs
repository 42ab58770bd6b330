// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// Metric name to decimal string, as sampled on one poll tick.
pub type Snapshot = HashMap<String, String>;

#[derive(Debug)]
pub enum SnapshotCommand {
    Push(Snapshot),
    Latest(oneshot::Sender<Option<Snapshot>>),
    Shutdown,
}

#[derive(Clone)]
pub struct SnapshotHandle {
    tx: mpsc::UnboundedSender<SnapshotCommand>,
}

impl SnapshotHandle {
    /// Replaces the held snapshot.
    pub fn push(&self, snapshot: Snapshot) -> Result<(), mpsc::error::SendError<SnapshotCommand>> {
        self.tx.send(SnapshotCommand::Push(snapshot))
    }

    /// Most recent snapshot, `None` if the collector has not produced one yet.
    pub async fn latest(&self) -> Result<Option<Snapshot>, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(SnapshotCommand::Latest(response_tx))
            .map_err(|e| format!("Failed to send latest command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive latest snapshot: {e}"))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<SnapshotCommand>> {
        self.tx.send(SnapshotCommand::Shutdown)
    }
}

/// Owns the latest snapshot. Last push wins.
pub struct SnapshotService {
    latest: Option<Snapshot>,
    rx: mpsc::UnboundedReceiver<SnapshotCommand>,
}

impl SnapshotService {
    #[must_use]
    pub fn new() -> (Self, SnapshotHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { latest: None, rx }, SnapshotHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("Snapshot service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                SnapshotCommand::Push(snapshot) => {
                    self.latest = Some(snapshot);
                }
                SnapshotCommand::Latest(response_tx) => {
                    if response_tx.send(self.latest.clone()).is_err() {
                        error!("Failed to send latest snapshot - receiver dropped");
                    }
                }
                SnapshotCommand::Shutdown => {
                    debug!("Snapshot service shutting down");
                    break;
                }
            }
        }

        debug!("Snapshot service stopped");
    }
}
