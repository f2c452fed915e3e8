//! Unix socket listener for the control channel.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::audit::AuditLogger;
use crate::auth::PeerPolicy;
use crate::config::Settings;
use crate::error::{ProtocolErrorKind, TermError};
use crate::table::TermTable;

use super::{handle_connection, ConnectionContext};

/// Connection metrics for monitoring.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    /// Total connections served.
    pub connections_total: AtomicU64,
    /// Connections that ended with an error.
    pub connections_failed: AtomicU64,
    /// Currently active connections.
    pub active_connections: AtomicUsize,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self, success: bool) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.connections_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.connections_failed.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Control socket server.
pub struct ControlListener {
    listener: UnixListener,
    context: Arc<ConnectionContext>,
    metrics: Arc<ConnectionMetrics>,
    connection_semaphore: Arc<Semaphore>,
    max_connections: usize,
}

impl ControlListener {
    /// Create and bind the control socket.
    pub async fn bind(settings: &Settings, table: Arc<TermTable>) -> Result<Self, TermError> {
        let socket_path = &settings.control.path;

        // Remove a stale socket, but never follow a symlink.
        if let Ok(metadata) = std::fs::symlink_metadata(socket_path) {
            if metadata.file_type().is_symlink() {
                return Err(TermError::Socket {
                    message: format!(
                        "Socket path {} is a symlink, refusing to remove it",
                        socket_path.display()
                    ),
                });
            }

            std::fs::remove_file(socket_path).map_err(|e| TermError::Socket {
                message: format!(
                    "Failed to remove existing socket file {}: {}",
                    socket_path.display(),
                    e
                ),
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TermError::Socket {
                message: format!(
                    "Failed to create socket directory {}: {}",
                    parent.display(),
                    e
                ),
            })?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| TermError::Socket {
            message: format!("Failed to bind to socket {}: {}", socket_path.display(), e),
        })?;

        Self::set_socket_permissions(socket_path, &settings.control.permissions)?;

        let audit_logger = if settings.audit.enabled {
            match AuditLogger::new(&settings.audit.log_path) {
                Ok(logger) => {
                    info!(
                        path = %settings.audit.log_path.display(),
                        "Audit logging enabled"
                    );
                    Some(Arc::new(logger))
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %settings.audit.log_path.display(),
                        "Failed to create audit logger, audit logging disabled"
                    );
                    None
                }
            }
        } else {
            info!("Audit logging disabled");
            None
        };

        let context = Arc::new(ConnectionContext {
            table,
            policy: PeerPolicy::new(settings.control.allowed_peer_uids.clone()),
            audit_logger,
            max_line_length: settings.control.max_line_length,
            socket_timeout: settings.control.socket_timeout(),
        });

        let max_connections = settings.control.max_connections;
        info!(
            path = %socket_path.display(),
            max_connections,
            writers = ?settings.control.allowed_peer_uids,
            "Control socket bound"
        );

        Ok(Self {
            listener,
            context,
            metrics: Arc::new(ConnectionMetrics::new()),
            connection_semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        Arc::clone(&self.metrics)
    }

    fn set_socket_permissions(path: &Path, permissions_str: &str) -> Result<(), TermError> {
        let mode = u32::from_str_radix(permissions_str, 8).map_err(|e| TermError::Socket {
            message: format!("Invalid socket permissions '{}': {}", permissions_str, e),
        })?;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            TermError::Socket {
                message: format!(
                    "Failed to set socket permissions on {}: {}",
                    path.display(),
                    e
                ),
            }
        })?;

        Ok(())
    }

    /// Accept connections until `shutdown` is notified.
    ///
    /// Connections already in progress keep running; see [`Self::wait_for_drain`].
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<(), TermError> {
        info!("Control listener running");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        max = self.max_connections,
                                        "Connection limit reached, rejecting connection"
                                    );
                                    continue;
                                }
                            };

                            let context = Arc::clone(&self.context);
                            let metrics = Arc::clone(&self.metrics);

                            metrics.active_connections.fetch_add(1, Ordering::Relaxed);
                            debug!(active = metrics.active(), "New control connection");

                            tokio::spawn(async move {
                                let _permit = permit;
                                let success = match handle_connection(stream, context).await {
                                    Ok(()) => true,
                                    Err(e) => {
                                        if !matches!(
                                            &e,
                                            TermError::Protocol {
                                                kind: ProtocolErrorKind::ConnectionClosed
                                            }
                                        ) {
                                            error!(error = %e, "Control connection error");
                                        }
                                        false
                                    }
                                };

                                metrics.record_connection(success);
                                metrics.active_connections.fetch_sub(1, Ordering::Relaxed);
                                debug!(active = metrics.active(), success, "Control connection closed");
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!("Shutdown requested, stopping control listener");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Wait for all active connections to finish.
    pub async fn wait_for_drain(&self) {
        let poll_interval = std::time::Duration::from_millis(100);

        while self.metrics.active() > 0 {
            debug!(active = self.metrics.active(), "Waiting for connections to drain");
            tokio::time::sleep(poll_interval).await;
        }

        info!("All control connections drained");
    }
}
