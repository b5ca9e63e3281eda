use super::{connection::ConnectionHandler, ServerConfig};
use crate::store::TransactionCoordinator;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct ImportServer {
    config: ServerConfig,
    coordinator: Arc<TransactionCoordinator>,
}

impl ImportServer {
    pub fn new(config: ServerConfig, coordinator: Arc<TransactionCoordinator>) -> Self {
        ImportServer {
            config,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    /// Bind the listener without accepting yet
    pub async fn bind(self) -> std::io::Result<BoundServer> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        Ok(BoundServer {
            listener,
            config: self.config,
            coordinator: self.coordinator,
        })
    }

    pub async fn run(self, cancel: CancellationToken) -> std::io::Result<()> {
        self.bind().await?.serve(cancel).await
    }
}

/// A server whose listener is bound; `local_addr` is known
pub struct BoundServer {
    listener: TcpListener,
    config: ServerConfig,
    coordinator: Arc<TransactionCoordinator>,
}

impl BoundServer {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `cancel` fires. Each connection gets a child
    /// token, so shutdown aborts every open import.
    pub async fn serve(self, cancel: CancellationToken) -> std::io::Result<()> {
        info!("Import server listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            error!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let handler = ConnectionHandler::new(
                            stream,
                            self.coordinator.clone(),
                            addr.to_string(),
                            self.config.max_frame_bytes,
                        );
                        let child = cancel.child_token();
                        tokio::spawn(async move {
                            handler.run(child).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        info!("Import server stopped");
        Ok(())
    }
}
