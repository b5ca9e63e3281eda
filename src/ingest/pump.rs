//! Decoder pump: drives a [`StreamDecoder`] into the ingest channel.
//!
//! Decoding is synchronous I/O, so the pump lives on a blocking thread and
//! hands each record across with [`IngestSender::blocking_send`].

use super::channel::{HandoffError, IngestSender};
use super::decoder::{ParseError, StreamDecoder};
use std::io::BufRead;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Why the pump stopped before the end of the document
#[derive(Debug)]
pub enum IngestError {
    Parse(ParseError),
    Cancelled,
    ChannelClosed,
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Parse(e) => write!(f, "decode failed: {}", e),
            IngestError::Cancelled => write!(f, "ingest cancelled"),
            IngestError::ChannelClosed => write!(f, "ingest channel closed by consumer"),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParseError> for IngestError {
    fn from(e: ParseError) -> Self {
        IngestError::Parse(e)
    }
}

impl From<HandoffError> for IngestError {
    fn from(e: HandoffError) -> Self {
        match e {
            HandoffError::Cancelled => IngestError::Cancelled,
            HandoffError::Closed => IngestError::ChannelClosed,
        }
    }
}

/// Emit every record of `decoder` into `sender` in document order.
///
/// Cancellation is checked before each emission and during the optional
/// per-record delay. Returns the number of records emitted.
///
/// Blocks the calling thread on every handoff and delay, so it must run on a
/// blocking thread such as [`spawn_decoder`] provides, never inside an async
/// task.
pub(crate) fn decode_into<R: BufRead>(
    decoder: StreamDecoder<R>,
    sender: &IngestSender,
    cancel: &CancellationToken,
    per_record_delay: Duration,
) -> Result<u64, IngestError> {
    let mut emitted: u64 = 0;

    for item in decoder {
        if cancel.is_cancelled() {
            info!("Ingest cancelled after {} records", emitted);
            return Err(IngestError::Cancelled);
        }

        let record = item.map_err(|e| {
            error!("Error reading source document: {}", e);
            IngestError::Parse(e)
        })?;

        debug!("Record read: {}", record.id);
        sender.blocking_send(record, cancel)?;
        emitted += 1;

        if !per_record_delay.is_zero() && pause(per_record_delay, cancel) {
            info!("Ingest cancelled after {} records", emitted);
            return Err(IngestError::Cancelled);
        }
    }

    info!("Source document exhausted, {} records emitted", emitted);
    Ok(emitted)
}

/// Sleep for `delay`, waking early on cancellation. Returns true if cancelled.
fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle.block_on(async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            }
        }),
        Err(_) => {
            std::thread::sleep(delay);
            cancel.is_cancelled()
        }
    }
}

/// Run `decode_into` on a blocking thread, consuming the sender.
///
/// On any failure `session` is cancelled before the sender is dropped: a
/// closed channel on its own reads as a clean end of input to the consumer.
pub fn spawn_decoder<R>(
    decoder: StreamDecoder<R>,
    sender: IngestSender,
    session: CancellationToken,
    per_record_delay: Duration,
) -> JoinHandle<Result<u64, IngestError>>
where
    R: BufRead + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = decode_into(decoder, &sender, &session, per_record_delay);
        if result.is_err() {
            session.cancel();
        }
        drop(sender);
        result
    })
}
