//! Import client: source document → TCP import stream.

use crate::ingest::{channel, forward, spawn_decoder, ClientConfig, IngestError, ParseError, StreamDecoder};
use crate::wire::{ClientCodec, UpsertResponse};
use std::io::{BufRead, Read};
use std::path::Path;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug)]
pub enum ImportError {
    Connect(std::io::Error),
    Io(std::io::Error),
    Decode(ParseError),
    Cancelled,
    ChannelClosed,
    /// The server rejected the stream or closed it without a response
    Server(String),
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Connect(e) => write!(f, "failed to connect to import server: {}", e),
            ImportError::Io(e) => write!(f, "I/O error: {}", e),
            ImportError::Decode(e) => write!(f, "source document rejected: {}", e),
            ImportError::Cancelled => write!(f, "import cancelled"),
            ImportError::ChannelClosed => write!(f, "sender stopped before the document ended"),
            ImportError::Server(msg) => write!(f, "server error: {}", msg),
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImportError::Connect(e) | ImportError::Io(e) => Some(e),
            ImportError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcome of a completed import
#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    /// Records the decoder handed to the sender
    pub emitted: u64,
    pub sent: u64,
    pub send_failures: u64,
    pub response: UpsertResponse,
}

pub struct ImportClient {
    config: ClientConfig,
}

impl ImportClient {
    pub fn new(config: ClientConfig) -> Self {
        ImportClient { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Import the configured `source_path`
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ImportReport, ImportError> {
        self.import_path(&self.config.source_path, cancel).await
    }

    pub async fn import_path(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<ImportReport, ImportError> {
        let path = path.as_ref();
        let decoder = StreamDecoder::open(path).map_err(|e| {
            error!("Failed to open {}: {}", path.display(), e);
            ImportError::Io(e)
        })?;
        info!("Importing {}", path.display());
        self.import(decoder, cancel).await
    }

    pub async fn import_reader<R>(
        &self,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<ImportReport, ImportError>
    where
        R: Read + Send + 'static,
    {
        self.import(StreamDecoder::from_reader(reader), cancel).await
    }

    /// Stream every record of `decoder` to the server in one transaction.
    pub async fn import<R>(
        &self,
        decoder: StreamDecoder<R>,
        cancel: &CancellationToken,
    ) -> Result<ImportReport, ImportError>
    where
        R: BufRead + Send + 'static,
    {
        let stream = TcpStream::connect(&self.config.server_addr)
            .await
            .map_err(ImportError::Connect)?;
        if let Err(e) = stream.set_nodelay(true) {
            error!("Failed to set TCP_NODELAY: {}", e);
        }
        info!("Connected to {}", self.config.server_addr);

        let (read_half, write_half) = stream.into_split();
        let sink = FramedWrite::new(write_half, ClientCodec::new(self.config.max_frame_bytes));
        let inbound = FramedRead::new(read_half, ClientCodec::new(self.config.max_frame_bytes));

        let session = cancel.child_token();
        let (tx, rx) = channel(self.config.channel_capacity);
        let decoding = spawn_decoder(decoder, tx, session.clone(), self.config.per_record_delay);
        let forwarded = forward(rx, sink, inbound, session).await;

        // A server rejection cancels the session; report the rejection
        // unless the caller cancelled first.
        let rejected = |fallback: ImportError| match &forwarded.server_error {
            Some(message) if !cancel.is_cancelled() => ImportError::Server(message.clone()),
            _ => fallback,
        };
        let emitted = match decoding.await {
            Ok(Ok(emitted)) => emitted,
            Ok(Err(IngestError::Parse(e))) => return Err(ImportError::Decode(e)),
            Ok(Err(IngestError::Cancelled)) => return Err(rejected(ImportError::Cancelled)),
            Ok(Err(IngestError::ChannelClosed)) => {
                return Err(rejected(ImportError::ChannelClosed))
            }
            Err(e) => {
                return Err(ImportError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("decoder task failed: {}", e),
                )))
            }
        };

        if let Some(message) = forwarded.server_error {
            return Err(ImportError::Server(message));
        }
        let response = forwarded.response.ok_or_else(|| {
            ImportError::Server("connection closed without a response".to_string())
        })?;

        info!(
            "Import finished: {} records emitted, {} sent, {} failed on server",
            emitted, forwarded.sent, response.failed_items_number
        );
        Ok(ImportReport {
            emitted,
            sent: forwarded.sent,
            send_failures: forwarded.send_failures,
            response,
        })
    }
}
