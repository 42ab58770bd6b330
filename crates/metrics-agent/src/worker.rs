// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::FlushError;
use crate::flusher::Flusher;
use metrics_core::metric::Batch;
use metrics_core::retry::RetryError;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Receiving half of the batch queue, shared by all workers.
pub type BatchQueue = Arc<Mutex<mpsc::Receiver<Batch>>>;

pub struct Worker {
    id: usize,
    flusher: Flusher,
    queue: BatchQueue,
}

impl Worker {
    pub fn new(id: usize, flusher: Flusher, queue: BatchQueue) -> Self {
        Self { id, flusher, queue }
    }

    /// Takes batches off the queue one at a time until the queue closes or
    /// `cancel` fires. A batch in flight when `cancel` fires gives up its
    /// remaining retries.
    pub async fn run(self, cancel: CancellationToken) {
        debug!("Worker {} started", self.id);
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break,
                next = async { self.queue.lock().await.recv().await } => next,
            };
            let Some(batch) = next else {
                debug!("Worker {}: queue closed", self.id);
                break;
            };

            match self.flusher.flush(&batch, &cancel).await {
                Ok(()) => {}
                Err(FlushError::Delivery(RetryError::Cancelled)) => {
                    warn!("Worker {}: shutdown interrupted delivery, batch dropped", self.id);
                }
                Err(e) => error!("Worker {}: dropping batch: {e}", self.id),
            }
        }
        debug!("Worker {} stopped", self.id);
    }
}

/// Spawns `count` workers draining `rx`.
pub fn spawn_pool(
    count: usize,
    flusher: &Flusher,
    rx: mpsc::Receiver<Batch>,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let queue: BatchQueue = Arc::new(Mutex::new(rx));
    (0..count)
        .map(|id| {
            let worker = Worker::new(id, flusher.clone(), Arc::clone(&queue));
            tokio::spawn(worker.run(cancel.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flusher::FlusherConfig;
    use metrics_core::metric::Metric;
    use metrics_core::retry::RetryStrategy;
    use metrics_core::security::SecurityPipeline;
    use std::time::Duration;

    fn flusher(address: String) -> Flusher {
        Flusher::new(FlusherConfig {
            address,
            timeout: Duration::from_secs(2),
            retry_strategy: RetryStrategy::linear(Duration::from_millis(10)),
            security: SecurityPipeline::default(),
            real_ip: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_pool_drains_queue() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/updates/")
            .with_status(200)
            .expect(4)
            .create_async()
            .await;

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handles = spawn_pool(2, &flusher(server.url()), rx, &cancel);

        for i in 0..4 {
            tx.send(vec![Metric::counter("PollCount", i)]).await.unwrap();
        }
        drop(tx);
        for handle in handles {
            handle.await.unwrap();
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_workers() {
        let (_tx, rx) = mpsc::channel::<Batch>(1);
        let cancel = CancellationToken::new();
        let handles = spawn_pool(3, &flusher("127.0.0.1:1".to_string()), rx, &cancel);
        cancel.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
