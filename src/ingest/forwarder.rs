//! Transport Forwarder
//!
//! Client side of an import stream. Two tasks share one cancellation token:
//!
//! ```text
//! IngestReceiver ──► sender task ──► Sink<ClientMessage>       one upsert per record
//!                    receiver task ◄── Stream<ServerMessage>   final response / error
//! ```
//!
//! When the channel is exhausted the sender writes an `End` frame and closes
//! the sink; the server commits only after `End`. On cancellation it sends a
//! best-effort `Cancel` frame instead. A server `Error`, or a server that goes
//! away without responding, cancels the session so the decoder stops feeding
//! a dead stream.

use super::channel::IngestReceiver;
use crate::wire::{ClientMessage, ServerMessage, UpsertResponse, WireError};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened on both halves of the stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardReport {
    /// Upsert frames handed to the transport
    pub sent: u64,
    /// Records whose frame could not be sent
    pub send_failures: u64,
    /// The sender stopped because of cancellation
    pub cancelled: bool,
    pub response: Option<UpsertResponse>,
    pub server_error: Option<String>,
}

#[derive(Debug, Default)]
struct SenderStats {
    sent: u64,
    send_failures: u64,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct ReceiverOutcome {
    response: Option<UpsertResponse>,
    server_error: Option<String>,
}

/// Forward every record from `records` to `sink` while reading server
/// messages from `inbound`. Returns once both halves are done.
pub async fn forward<Tx, Rx>(
    records: IngestReceiver,
    sink: Tx,
    inbound: Rx,
    cancel: CancellationToken,
) -> ForwardReport
where
    Tx: Sink<ClientMessage> + Unpin + Send + 'static,
    Tx::Error: Display + Send,
    Rx: Stream<Item = Result<ServerMessage, WireError>> + Unpin + Send + 'static,
{
    let sender = tokio::spawn(run_sender(records, sink, cancel.clone()));
    let receiver = tokio::spawn(run_receiver(inbound, cancel));

    let (sent, received) = tokio::join!(sender, receiver);
    let stats = sent.unwrap_or_else(|e| {
        error!("Sender task failed: {}", e);
        SenderStats::default()
    });
    let outcome = received.unwrap_or_else(|e| {
        error!("Receiver task failed: {}", e);
        ReceiverOutcome::default()
    });

    ForwardReport {
        sent: stats.sent,
        send_failures: stats.send_failures,
        cancelled: stats.cancelled,
        response: outcome.response,
        server_error: outcome.server_error,
    }
}

async fn run_sender<Tx>(
    mut records: IngestReceiver,
    mut sink: Tx,
    cancel: CancellationToken,
) -> SenderStats
where
    Tx: Sink<ClientMessage> + Unpin,
    Tx::Error: Display,
{
    let mut stats = SenderStats::default();

    loop {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                stats.cancelled = true;
                break;
            }
            next = records.recv() => match next {
                Some(record) => record,
                None => break,
            },
        };

        let id = record.id.clone();
        debug!("Forwarding record {}", id);
        match sink.send(ClientMessage::upsert_one(record)).await {
            Ok(()) => stats.sent += 1,
            Err(e) => {
                stats.send_failures += 1;
                error!("Error sending record {} to the stream: {}", id, e);
            }
        }
    }

    if stats.cancelled {
        info!("Import cancelled after {} records, notifying server", stats.sent);
        let cancel_frame = ClientMessage::Cancel {
            reason: "import cancelled by client".to_string(),
        };
        if let Err(e) = sink.send(cancel_frame).await {
            warn!("Could not deliver cancel to server: {}", e);
        }
    } else if stats.send_failures > 0 {
        warn!(
            "{} records failed to send, closing stream without an end frame",
            stats.send_failures
        );
    } else {
        info!("All {} records forwarded, ending stream", stats.sent);
        if let Err(e) = sink.send(ClientMessage::End).await {
            error!("Error sending end of stream: {}", e);
        }
    }

    if let Err(e) = sink.close().await {
        error!("Error closing the outbound stream: {}", e);
    }
    stats
}

async fn run_receiver<Rx>(mut inbound: Rx, cancel: CancellationToken) -> ReceiverOutcome
where
    Rx: Stream<Item = Result<ServerMessage, WireError>> + Unpin,
{
    let mut outcome = ReceiverOutcome::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Receiver stopping on cancellation");
                break;
            }
            next = inbound.next() => next,
        };

        match next {
            Some(Ok(ServerMessage::Response(response))) => {
                info!(
                    "Response received from the server: {} (failed items: {})",
                    response.message, response.failed_items_number
                );
                outcome.response = Some(response);
            }
            Some(Ok(ServerMessage::Error { message })) => {
                error!("Server rejected the import: {}", message);
                outcome.server_error = Some(message);
                cancel.cancel();
                break;
            }
            Some(Err(e)) => {
                error!("Error receiving from the server: {}", e);
                outcome.server_error.get_or_insert_with(|| e.to_string());
                cancel.cancel();
                break;
            }
            None if outcome.response.is_none() => {
                error!("Server closed the stream without a response");
                outcome
                    .server_error
                    .get_or_insert_with(|| "connection closed without a response".to_string());
                cancel.cancel();
                break;
            }
            None => {
                debug!("Server closed the stream");
                break;
            }
        }
    }

    outcome
}
