//! Ingest Channel
//!
//! Handoff between the decoder thread and the network sender task.
//!
//! With capacity 0 (the default) the channel is a rendezvous: `send` returns
//! only once the receiver has taken the record, so the decoder can never run
//! ahead of the socket. A non-zero capacity makes it a bounded FIFO queue of
//! that many records.
//!
//! ```text
//!  decoder ──send──► [ slot ] ──recv──► sender task
//!     ▲                                   │
//!     └────────────── taken ◄─────────────┘   (rendezvous only)
//! ```

use crate::domain::Record;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Rendezvous by default
pub const DEFAULT_CAPACITY: usize = 0;
/// Upper bound on the queue variant
pub const CAPACITY_MAX: usize = 4096;

/// Why a handoff did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffError {
    /// Cancellation fired before the receiver took the record
    Cancelled,
    /// The receiver is gone
    Closed,
}

impl std::fmt::Display for HandoffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandoffError::Cancelled => write!(f, "handoff cancelled"),
            HandoffError::Closed => write!(f, "ingest channel closed"),
        }
    }
}

impl std::error::Error for HandoffError {}

struct Handoff {
    record: Record,
    /// Present in rendezvous mode; fired when the receiver takes the record
    taken: Option<oneshot::Sender<()>>,
}

/// Create an ingest channel. `capacity == 0` is a rendezvous.
pub fn channel(capacity: usize) -> (IngestSender, IngestReceiver) {
    debug_assert!(
        capacity <= CAPACITY_MAX,
        "Invariant: channel capacity {} exceeds max {}",
        capacity,
        CAPACITY_MAX
    );
    let capacity = capacity.min(CAPACITY_MAX);
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        IngestSender {
            tx,
            rendezvous: capacity == 0,
        },
        IngestReceiver { rx },
    )
}

/// Producer half, owned by the decoder
pub struct IngestSender {
    tx: mpsc::Sender<Handoff>,
    rendezvous: bool,
}

impl IngestSender {
    /// Hand one record to the receiver, or give up on cancellation.
    pub async fn send(
        &self,
        record: Record,
        cancel: &CancellationToken,
    ) -> Result<(), HandoffError> {
        let (taken_tx, taken_rx) = if self.rendezvous {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let handoff = async {
            self.tx
                .send(Handoff {
                    record,
                    taken: taken_tx,
                })
                .await
                .map_err(|_| HandoffError::Closed)?;
            if let Some(taken) = taken_rx {
                taken.await.map_err(|_| HandoffError::Closed)?;
            }
            Ok(())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HandoffError::Cancelled),
            result = handoff => result,
        }
    }

    /// Same as [`send`](Self::send) for the decoder's blocking thread.
    /// Must not be called from inside an async task.
    pub fn blocking_send(
        &self,
        record: Record,
        cancel: &CancellationToken,
    ) -> Result<(), HandoffError> {
        futures::executor::block_on(self.send(record, cancel))
    }

    pub fn is_rendezvous(&self) -> bool {
        self.rendezvous
    }
}

/// Consumer half, owned by the network sender
pub struct IngestReceiver {
    rx: mpsc::Receiver<Handoff>,
}

impl IngestReceiver {
    /// Take the next record. `None` once the sender is dropped and drained.
    ///
    /// A rendezvous record whose producer already gave up (cancelled) was
    /// never emitted, so it is skipped.
    pub async fn recv(&mut self) -> Option<Record> {
        loop {
            let handoff = self.rx.recv().await?;
            match handoff.taken {
                Some(taken) => {
                    if taken.send(()).is_ok() {
                        return Some(handoff.record);
                    }
                }
                None => return Some(handoff.record),
            }
        }
    }

    /// Stop accepting new records; already queued ones can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
