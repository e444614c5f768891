//! Graceful shutdown coordination and connection admission.
//!
//! A watch channel broadcasts the shutdown signal; an atomic counter tracks
//! live WebSocket connections against the configured capacity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

use crate::metrics;

/// Shutdown coordinator shared by the listener and every connection.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<ShutdownInner>,
}

struct ShutdownInner {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    active_connections: AtomicU64,
    max_connections: u64,
    drain_notify: Notify,
    next_conn_id: AtomicU64,
}

impl ShutdownCoordinator {
    /// Create a coordinator admitting at most `max_connections` live connections.
    pub fn new(max_connections: usize) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(ShutdownInner {
                shutdown_tx,
                shutdown_rx,
                active_connections: AtomicU64::new(0),
                max_connections: max_connections as u64,
                drain_notify: Notify::new(),
                next_conn_id: AtomicU64::new(1),
            }),
        }
    }

    /// Signal shutdown to all connections.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    /// Check if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown_rx.borrow()
    }

    /// Resolves once shutdown has been signaled.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.inner.shutdown_rx.clone();
        // Err means the sender is gone, which only happens on drop
        let _ = rx.wait_for(|down| *down).await;
    }

    pub fn active_connections(&self) -> u64 {
        self.inner.active_connections.load(Ordering::Relaxed)
    }

    pub fn max_connections(&self) -> u64 {
        self.inner.max_connections
    }

    /// Admit a new connection, or `None` when at capacity or shutting down.
    pub fn try_register(&self) -> Option<ConnectionGuard> {
        if self.is_shutdown() {
            return None;
        }

        let max = self.inner.max_connections;
        let admitted = self.inner.active_connections.fetch_update(
            Ordering::AcqRel,
            Ordering::Relaxed,
            |curr| if curr >= max { None } else { Some(curr + 1) },
        );

        match admitted {
            Ok(prev) => {
                metrics::set_active_connections(prev + 1);
                metrics::record_connection_accepted();
                Some(ConnectionGuard {
                    coordinator: self.clone(),
                    id: self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed),
                })
            }
            Err(_) => {
                metrics::record_connection_rejected();
                None
            }
        }
    }

    /// Wait for all connections to drain.
    pub async fn wait_for_drain(&self) {
        loop {
            // Register interest before the load so a notify in between is not lost
            let notified = self.inner.drain_notify.notified();
            if self.active_connections() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait for drain up to `timeout`. Returns false if connections remained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_for_drain())
            .await
            .is_ok()
    }

    fn unregister_connection(&self) {
        let result = self.inner.active_connections.fetch_update(
            Ordering::AcqRel,
            Ordering::Relaxed,
            |curr| curr.checked_sub(1),
        );

        match result {
            Ok(prev) => {
                let new_count = prev - 1;
                metrics::set_active_connections(new_count);
                if new_count == 0 {
                    self.inner.drain_notify.notify_waiters();
                }
            }
            Err(_) => {
                tracing::error!("Connection released with active_connections already at 0");
                metrics::set_active_connections(0);
            }
        }
    }
}

/// RAII guard for one admitted connection.
pub struct ConnectionGuard {
    coordinator: ShutdownCoordinator,
    id: u64,
}

impl ConnectionGuard {
    /// Connection ID, also used as the relay session ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_shutdown(&self) -> bool {
        self.coordinator.is_shutdown()
    }

    /// Resolves once shutdown has been signaled.
    pub async fn wait_for_shutdown(&self) {
        self.coordinator.wait_for_shutdown().await
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.coordinator.unregister_connection();
    }
}
