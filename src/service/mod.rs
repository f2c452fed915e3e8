//! Process-lifetime wiring.
//!
//! [`TermService::init`] builds the terminal table, starts its expiry task and
//! binds the control socket; [`TermService::shutdown`] tears all of it down
//! again. Nothing here is global: the packet path gets the table through
//! [`TermService::table`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::error::{TermError, TermResult};
use crate::socket::{ConnectionMetrics, ControlListener};
use crate::table::TermTable;

/// A running terminal table with its control endpoint.
pub struct TermService {
    table: Arc<TermTable>,
    listener: Arc<ControlListener>,
    shutdown: Arc<Notify>,
    expiry_task: JoinHandle<()>,
    listener_task: JoinHandle<TermResult<()>>,
    socket_path: PathBuf,
}

impl TermService {
    /// Build the table and start serving the control socket.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn init(settings: &Settings) -> TermResult<Self> {
        let table = Arc::new(TermTable::new(
            settings.table.ttl(),
            settings.table.max_entries,
        )?);
        info!(
            ttl_secs = settings.table.ttl_seconds,
            max_entries = settings.table.max_entries,
            "Terminal table created"
        );

        let shutdown = Arc::new(Notify::new());
        let expiry_task = table.start_expiry_task(Arc::clone(&shutdown));

        let listener = match ControlListener::bind(settings, Arc::clone(&table)).await {
            Ok(listener) => Arc::new(listener),
            Err(e) => {
                expiry_task.abort();
                return Err(e);
            }
        };

        let listener_task = {
            let listener = Arc::clone(&listener);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { listener.run(shutdown).await })
        };

        Ok(Self {
            table,
            listener,
            shutdown,
            expiry_task,
            listener_task,
            socket_path: settings.control.path.clone(),
        })
    }

    /// The table, for the packet path and the authentication backend.
    pub fn table(&self) -> Arc<TermTable> {
        Arc::clone(&self.table)
    }

    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        self.listener.metrics()
    }

    /// Whether the listener task ended on its own (e.g. after an error).
    pub fn is_finished(&self) -> bool {
        self.listener_task.is_finished()
    }

    /// Stop accepting connections, let open ones finish within
    /// `drain_timeout`, stop expiry and drop every terminal.
    pub async fn shutdown(self, drain_timeout: Duration) -> TermResult<()> {
        self.shutdown.notify_waiters();

        let mut listener_task = self.listener_task;
        let listener_result =
            match tokio::time::timeout(Duration::from_secs(1), &mut listener_task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(TermError::Socket {
                    message: format!("Control listener task failed: {}", e),
                }),
                Err(_) => {
                    listener_task.abort();
                    Ok(())
                }
            };

        match tokio::time::timeout(drain_timeout, self.listener.wait_for_drain()).await {
            Ok(()) => info!("Control connections drained"),
            Err(_) => warn!(
                "Shutdown timeout after {}s, some control connections may be terminated",
                drain_timeout.as_secs()
            ),
        }

        self.expiry_task.abort();
        let dropped = self.table.flush();

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!(error = %e, path = %self.socket_path.display(), "Failed to remove control socket");
            }
        }

        info!(dropped, "Terminal service stopped");
        listener_result
    }
}
