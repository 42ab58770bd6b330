// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Server lifecycle: load key material, open storage, serve until a signal
//! or [`ServerHandle::shutdown`], then drain connections and close storage
//! within one deadline.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::middleware::SecurityState;
use crate::router::build_router;
use crate::storage::{MetricStore, Storage};
use axum::Router;
use metrics_core::security::{DecryptionKey, Signer};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Requested,
    UserInterrupt,
    Terminated,
    FatalError,
}

#[derive(Clone)]
pub struct ServerHandle {
    shutdown_token: CancellationToken,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

pub struct Server {
    config: ServerConfig,
    shutdown_token: CancellationToken,
    /// Cancelled only once connections have drained, so in-flight requests
    /// keep their storage retries.
    storage_token: CancellationToken,
    storage: Arc<Storage>,
    security: Arc<SecurityState>,
    shutdown_timeout: Duration,
}

impl Server {
    /// Fails on an unreadable key file, a bad subnet or a storage backend
    /// that cannot be opened.
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let decryption_key = config
            .crypto_key
            .as_ref()
            .map(DecryptionKey::from_file)
            .transpose()?;
        let security = SecurityState {
            signer: Signer::from_optional(config.key.as_deref()),
            decryption_key,
            trusted_subnet: config.trusted_network()?,
        };

        let storage_token = CancellationToken::new();
        let storage = Storage::open(&config.storage_config(), &storage_token).await?;

        Ok(Self {
            config,
            shutdown_token: CancellationToken::new(),
            storage_token,
            storage: Arc::new(storage),
            security: Arc::new(security),
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown_token: self.shutdown_token.clone(),
        }
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    #[must_use]
    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.storage), Arc::clone(&self.security))
    }

    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(&self.config.address)
            .await
            .map_err(|source| ServerError::Bind {
                address: self.config.address.clone(),
                source,
            })
    }

    /// Serves until a shutdown signal, then drains open connections and
    /// closes storage. Connections still open at the deadline are dropped.
    pub async fn run(self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(
                "Listening on {addr}: storage={} signing={} decryption={} trusted_subnet={:?}",
                self.storage.name(),
                self.security.signer.is_some(),
                self.security.decryption_key.is_some(),
                self.security.trusted_subnet,
            );
        }

        let token = self.shutdown_token.clone();
        let serve = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let reason = wait_for_shutdown(&token).await;
                info!("Shutting down: {reason:?}");
                token.cancel();
            })
            .into_future();
        tokio::pin!(serve);

        let stopped = tokio::select! {
            result = &mut serve => Some(result),
            () = self.shutdown_token.cancelled() => None,
        };
        let deadline = Instant::now() + self.shutdown_timeout;
        let served = match stopped {
            Some(result) => result.map_err(ServerError::Serve),
            None => match tokio::time::timeout_at(deadline, &mut serve).await {
                Ok(result) => result.map_err(ServerError::Serve),
                Err(_) => {
                    error!(
                        "Open connections did not drain within {:?}, dropping them",
                        self.shutdown_timeout
                    );
                    Err(ServerError::ShutdownTimeout(self.shutdown_timeout))
                }
            },
        };

        let closed = self.close(deadline).await;
        served?;
        closed
    }

    async fn close(&self, deadline: Instant) -> Result<(), ServerError> {
        self.shutdown_token.cancel();
        self.storage_token.cancel();
        match tokio::time::timeout_at(deadline, self.storage.close()).await {
            Ok(Ok(())) => {
                info!("Server shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Failed to close storage: {e}");
                Err(e.into())
            }
            Err(_) => {
                error!("Storage did not close within {:?}", self.shutdown_timeout);
                Err(ServerError::ShutdownTimeout(self.shutdown_timeout))
            }
        }
    }
}

/// Resolves on SIGINT, SIGTERM or cancellation of `token`.
pub async fn wait_for_shutdown(token: &CancellationToken) -> ShutdownReason {
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
        () = token.cancelled() => ShutdownReason::Requested,
        reason = terminate => reason,
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => ShutdownReason::UserInterrupt,
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {e}");
                ShutdownReason::FatalError
            }
        },
    }
}
