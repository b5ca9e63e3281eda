use super::session::Session;
use crate::store::TransactionCoordinator;
use crate::wire::{ServerCodec, ServerMessage};
use futures::SinkExt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Serves one import stream: reads client frames until the `end` frame or
/// until the stream fails, then writes exactly one reply and closes.
pub struct ConnectionHandler {
    stream: TcpStream,
    coordinator: Arc<TransactionCoordinator>,
    client_addr: String,
    max_frame_bytes: usize,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        coordinator: Arc<TransactionCoordinator>,
        client_addr: String,
        max_frame_bytes: usize,
    ) -> Self {
        ConnectionHandler {
            stream,
            coordinator,
            client_addr,
            max_frame_bytes,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("Client connected: {}", self.client_addr);

        let (read_half, write_half) = self.stream.into_split();
        let inbound = FramedRead::new(read_half, ServerCodec::new(self.max_frame_bytes));
        let mut outbound = FramedWrite::new(write_half, ServerCodec::new(self.max_frame_bytes));

        let session = Session::new(self.coordinator, self.client_addr.clone());
        let reply = match session.run(inbound, &cancel).await {
            Ok(response) => ServerMessage::Response(response),
            Err(e) => ServerMessage::Error {
                message: e.to_string(),
            },
        };

        if let Err(e) = outbound.send(reply).await {
            error!("Failed to write response to {}: {}", self.client_addr, e);
        }
        if let Err(e) = outbound.close().await {
            error!("Failed to close connection to {}: {}", self.client_addr, e);
        }
        info!("Client disconnected: {}", self.client_addr);
    }
}
