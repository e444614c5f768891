//! TCP listener serving the router.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;

use crate::error::{RelayError, Result};
use crate::shutdown::ShutdownCoordinator;

/// Bound HTTP server that stops accepting on shutdown.
pub struct RelayServer {
    listener: TcpListener,
    router: Router,
    shutdown: ShutdownCoordinator,
}

impl RelayServer {
    /// Bind the listen address.
    pub async fn bind(
        addr: SocketAddr,
        router: Router,
        shutdown: ShutdownCoordinator,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Bind(format!("Failed to bind {}: {}", addr, e)))?;

        let local = listener.local_addr()?;
        tracing::info!(
            addr = %local,
            max_connections = shutdown.max_connections(),
            "HTTP listener bound"
        );

        Ok(Self {
            listener,
            router,
            shutdown,
        })
    }

    /// Actual bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until shutdown is signaled.
    pub async fn serve(self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
            .await?;

        tracing::info!("HTTP listener stopped");
        Ok(())
    }
}
