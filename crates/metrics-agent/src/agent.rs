// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent coordinator.
//!
//! Wires collector, snapshot service, dispatcher and worker pool together and
//! owns their lifecycle:
//!
//! ```text
//! Collector --push--> SnapshotService <--latest-- Dispatcher --try_send--> queue --> Workers --> server
//! ```
//!
//! On shutdown the shared token is cancelled, every task is awaited against a
//! single deadline, and one last batch built from the latest snapshot is sent
//! without retries.

use crate::batcher::{build_batch, Dispatcher};
use crate::collector::{Collector, ProcStatsReader, StatsReader};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::flusher::{local_ip_for, Flusher, FlusherConfig};
use crate::snapshot::{SnapshotHandle, SnapshotService};
use crate::worker::spawn_pool;
use metrics_core::retry::RetryStrategy;
use metrics_core::security::{EncryptionKey, SecurityPipeline, Signer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Cancelled through an [`AgentHandle`].
    Requested,
    /// SIGINT.
    UserInterrupt,
    /// SIGTERM.
    Terminated,
    FatalError,
}

/// Cloneable trigger for a graceful shutdown.
#[derive(Clone)]
pub struct AgentHandle {
    shutdown_token: CancellationToken,
}

impl AgentHandle {
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }
}

pub struct Agent {
    config: Arc<AgentConfig>,
    shutdown_token: CancellationToken,
    flusher: Flusher,
    snapshots: Option<SnapshotHandle>,
    snapshot_task: Option<JoinHandle<()>>,
    /// Tasks that observe the shutdown token.
    task_handles: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl Agent {
    /// Loads key material and builds the HTTP client. Fails if a configured
    /// key file is missing or malformed.
    pub async fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let signer = Signer::from_optional(config.key.as_deref());
        let encryption_key = config
            .crypto_key
            .as_ref()
            .map(EncryptionKey::from_file)
            .transpose()?;

        let real_ip = local_ip_for(&config.address).await;
        if real_ip.is_none() {
            warn!("Could not determine local address for {}", config.address);
        }

        let flusher = Flusher::new(FlusherConfig {
            address: config.address.clone(),
            timeout: config.request_timeout,
            retry_strategy: RetryStrategy::default(),
            security: SecurityPipeline::new(signer, encryption_key),
            real_ip,
        })?;

        Ok(Self {
            config: Arc::new(config),
            shutdown_token: CancellationToken::new(),
            flusher,
            snapshots: None,
            snapshot_task: None,
            task_handles: Vec::new(),
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[must_use]
    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            shutdown_token: self.shutdown_token.clone(),
        }
    }

    /// Starts sampling `/proc`.
    pub fn start(&mut self) -> Result<(), AgentError> {
        self.start_with_reader(ProcStatsReader::default())
    }

    pub fn start_with_reader<R: StatsReader + 'static>(
        &mut self,
        reader: R,
    ) -> Result<(), AgentError> {
        if self.snapshots.is_some() {
            return Err(AgentError::AlreadyStarted);
        }
        info!(
            "Starting agent: endpoint={} workers={} queue={} signing={} encryption={}",
            self.flusher.endpoint(),
            self.config.rate_limit,
            self.config.queue_size(),
            self.config.key.is_some(),
            self.config.crypto_key.is_some(),
        );

        let (service, snapshots) = SnapshotService::new();
        self.snapshot_task = Some(tokio::spawn(service.run()));

        let (tx, rx) = mpsc::channel(self.config.queue_size());

        self.task_handles.extend(spawn_pool(
            self.config.rate_limit,
            &self.flusher,
            rx,
            &self.shutdown_token,
        ));

        let collector = Collector::new(reader, self.config.poll_interval, snapshots.clone());
        self.task_handles
            .push(tokio::spawn(collector.run(self.shutdown_token.clone())));

        let dispatcher = Dispatcher::new(snapshots.clone(), tx, self.config.report_interval);
        self.task_handles
            .push(tokio::spawn(dispatcher.run(self.shutdown_token.clone())));

        self.snapshots = Some(snapshots);
        debug!("Started {} tasks", self.task_handles.len());
        Ok(())
    }

    /// Resolves on SIGINT, SIGTERM or [`AgentHandle::shutdown`].
    pub async fn wait_for_shutdown(&self) -> ShutdownReason {
        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    ShutdownReason::Terminated
                }
                Err(e) => {
                    error!("Failed to listen for SIGTERM: {e}");
                    std::future::pending::<ShutdownReason>().await
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<ShutdownReason>();

        tokio::select! {
            () = self.shutdown_token.cancelled() => ShutdownReason::Requested,
            reason = terminate => {
                info!("Received SIGTERM, initiating shutdown");
                reason
            }
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Received Ctrl+C, initiating shutdown");
                    ShutdownReason::UserInterrupt
                }
                Err(e) => {
                    error!("Failed to listen for Ctrl+C: {e}");
                    ShutdownReason::FatalError
                }
            },
        }
    }

    /// Cancels every task, waits for them, then sends a final batch. Fails if
    /// the whole sequence outlives the shutdown timeout.
    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        info!("Initiating graceful shutdown");
        self.shutdown_token.cancel();

        let deadline = Instant::now() + self.shutdown_timeout;
        let mut timed_out = false;

        info!("Waiting for {} tasks to complete", self.task_handles.len());
        for (idx, handle) in std::mem::take(&mut self.task_handles).into_iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                handle.abort();
                timed_out = true;
                continue;
            }
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => debug!("Task {idx} completed"),
                Ok(Err(e)) => error!("Task {idx} failed: {e}"),
                Err(_) => {
                    warn!("Task {idx} timed out");
                    timed_out = true;
                }
            }
        }

        if let Some(snapshots) = self.snapshots.take() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, self.final_flush(&snapshots))
                .await
                .is_err()
            {
                warn!("Final flush timed out");
                timed_out = true;
            }
            if snapshots.shutdown().is_err() {
                debug!("Snapshot service already stopped");
            }
        }
        if let Some(task) = self.snapshot_task.take() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, task).await.is_err() {
                timed_out = true;
            }
        }

        if timed_out {
            return Err(AgentError::ShutdownTimeout(self.shutdown_timeout));
        }
        info!("Agent shutdown complete");
        Ok(())
    }

    async fn final_flush(&self, snapshots: &SnapshotHandle) {
        let snapshot = match snapshots.latest().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("No snapshot taken, skipping final flush");
                return;
            }
            Err(e) => {
                error!("Skipping final flush: {e}");
                return;
            }
        };

        let batch = build_batch(&snapshot, &mut rand::thread_rng());
        match self
            .flusher
            .flush_with(&batch, &RetryStrategy::Immediate(1), &CancellationToken::new())
            .await
        {
            Ok(()) => info!("Final batch of {} metrics delivered", batch.len()),
            Err(e) => error!("Final flush failed: {e}"),
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
        for handle in &self.task_handles {
            handle.abort();
        }
        if let Some(task) = &self.snapshot_task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectorError;
    use crate::snapshot::Snapshot;

    struct FixedReader;

    impl StatsReader for FixedReader {
        fn read(&self) -> Result<Snapshot, CollectorError> {
            Ok(Snapshot::from([("Alloc".to_string(), "128".to_string())]))
        }
    }

    fn config(address: String) -> AgentConfig {
        AgentConfig {
            address,
            poll_interval: Duration::from_millis(20),
            report_interval: Duration::from_millis(50),
            request_timeout: Duration::from_secs(1),
            ..AgentConfig::default()
        }
    }

    #[tokio::test]
    async fn test_missing_key_file_is_fatal() {
        let result = Agent::new(AgentConfig {
            crypto_key: Some("/nonexistent/public.key".into()),
            ..AgentConfig::default()
        })
        .await;
        assert!(matches!(result, Err(AgentError::Key(_))));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut agent = Agent::new(config("127.0.0.1:1".to_string()))
            .await
            .unwrap();
        agent.start_with_reader(FixedReader).unwrap();
        assert!(matches!(
            agent.start_with_reader(FixedReader),
            Err(AgentError::AlreadyStarted)
        ));
        agent.handle().shutdown();
        assert_eq!(agent.wait_for_shutdown().await, ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn test_shutdown_sends_final_batch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/updates/")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        // reports would only start after an hour, so the one request seen
        // is the final flush
        let mut agent = Agent::new(AgentConfig {
            report_interval: Duration::from_secs(3600),
            ..config(server.url())
        })
        .await
        .unwrap();
        agent.start_with_reader(FixedReader).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        agent.shutdown().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_shutdown_without_snapshot_skips_final_flush() {
        let mut agent = Agent::new(config("127.0.0.1:1".to_string()))
            .await
            .unwrap();
        agent.shutdown().await.unwrap();
    }
}
