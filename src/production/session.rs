//! Import session: one client stream, one write transaction.
//!
//! Every upsert on the stream lands in the same transaction. Only an `End`
//! frame commits it and yields the failed-record count. A receive error, a
//! close without `End`, a client `Cancel` frame or server-side cancellation
//! aborts it.

use crate::store::{StoreError, TransactionCoordinator};
use crate::wire::{ClientMessage, UpsertResponse, WireError};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why a session ended without committing
#[derive(Debug)]
pub enum SessionError {
    /// Starting or committing the transaction failed
    Transaction(StoreError),
    Receive(WireError),
    /// The client abandoned the stream
    ClientCancelled(String),
    Cancelled,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Transaction(e) => write!(f, "{}", e),
            SessionError::Receive(e) => write!(f, "failed to receive records: {}", e),
            SessionError::ClientCancelled(reason) => {
                write!(f, "import cancelled by client: {}", reason)
            }
            SessionError::Cancelled => write!(f, "import cancelled by server"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Transaction(e) => Some(e),
            SessionError::Receive(e) => Some(e),
            _ => None,
        }
    }
}

pub struct Session {
    coordinator: Arc<TransactionCoordinator>,
    peer: String,
}

impl Session {
    pub fn new(coordinator: Arc<TransactionCoordinator>, peer: impl Into<String>) -> Self {
        Session {
            coordinator,
            peer: peer.into(),
        }
    }

    /// Consume `inbound` until the client's `End` frame, then commit.
    ///
    /// Per-record upsert failures are counted, not fatal. Exactly one of
    /// commit or abort ends the transaction on every path.
    pub async fn run<S>(
        &self,
        mut inbound: S,
        cancel: &CancellationToken,
    ) -> Result<UpsertResponse, SessionError>
    where
        S: Stream<Item = Result<ClientMessage, WireError>> + Unpin,
    {
        let txn = self.coordinator.begin(cancel).map_err(|e| {
            error!("Failed to start transaction for {}: {}", self.peer, e);
            match e {
                StoreError::Cancelled => SessionError::Cancelled,
                other => SessionError::Transaction(other),
            }
        })?;
        info!("Import from {} started in transaction {}", self.peer, txn.id());

        let mut received: u64 = 0;
        let mut failed: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Import from {} cancelled after {} records", self.peer, received);
                    txn.abort();
                    return Err(SessionError::Cancelled);
                }
                next = inbound.next() => next,
            };

            match next {
                Some(Ok(ClientMessage::End)) => break,
                None => {
                    error!(
                        "Stream from {} closed after {} records without an end frame",
                        self.peer, received
                    );
                    txn.abort();
                    return Err(SessionError::Receive(WireError::MissingEnd));
                }
                Some(Ok(ClientMessage::Upsert(request))) => {
                    for record in request.into_records() {
                        received += 1;
                        let id = record.id.clone();
                        match txn.upsert(record, cancel) {
                            Ok(outcome) => debug!("Record {} {:?}", id, outcome.applied),
                            Err(StoreError::Cancelled) => {
                                warn!("Import from {} cancelled after {} records", self.peer, received);
                                txn.abort();
                                return Err(SessionError::Cancelled);
                            }
                            Err(e) => {
                                failed += 1;
                                error!("Failed to save record {}: {}", id, e);
                            }
                        }
                    }
                }
                Some(Ok(ClientMessage::Cancel { reason })) => {
                    warn!("Client {} cancelled the import: {}", self.peer, reason);
                    txn.abort();
                    return Err(SessionError::ClientCancelled(reason));
                }
                Some(Err(e)) => {
                    error!("Failed to receive records from {}: {}", self.peer, e);
                    txn.abort();
                    return Err(SessionError::Receive(e));
                }
            }
        }

        let summary = txn.commit(cancel).map_err(|e| {
            error!("Failed to commit import from {}: {}", self.peer, e);
            match e {
                StoreError::Cancelled => SessionError::Cancelled,
                other => SessionError::Transaction(other),
            }
        })?;

        info!(
            "Import from {} committed: {} received, {} written, {} failed",
            self.peer, received, summary.records_written, failed
        );
        Ok(UpsertResponse::from_failed_count(failed))
    }
}
