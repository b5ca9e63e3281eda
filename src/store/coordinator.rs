//! Transaction Coordinator
//!
//! Owns the committed [`KeyedStore`] and at most one open write transaction.
//! Writes go to a private overlay that only becomes visible on commit; abort
//! discards it. Commit and abort are idempotent in the sense that exactly one
//! of them ends any given transaction.
//!
//! ```text
//!   NoTransaction ──start──► OpenWrite ──commit──► NoTransaction
//!                               │
//!                               └──abort───► NoTransaction
//! ```
//!
//! Sessions use the scoped [`WriteTransaction`] guard from [`begin`]; dropping
//! the guard without committing aborts its transaction.
//!
//! [`begin`]: TransactionCoordinator::begin

use super::error::StoreError;
use super::keyed_store::KeyedStore;
use crate::domain::Record;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NoTransaction,
    OpenWrite(TransactionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Inserted,
    Replaced,
}

/// Result of a single upsert inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// The record this write replaced, as seen by the transaction
    pub previous: Option<Record>,
    pub applied: WriteKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    pub id: TransactionId,
    pub records_written: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub started: u64,
    pub committed: u64,
    pub aborted: u64,
    pub records_committed: u64,
}

struct OpenTransaction {
    id: TransactionId,
    writes: AHashMap<String, Record>,
}

struct CoordinatorState {
    store: KeyedStore,
    open: Option<OpenTransaction>,
    next_id: u64,
    stats: CoordinatorStats,
}

impl CoordinatorState {
    /// The open transaction, if it matches `expected` (any when `None`)
    fn open_mut(
        &mut self,
        expected: Option<TransactionId>,
    ) -> Result<(&KeyedStore, &mut OpenTransaction), StoreError> {
        let CoordinatorState { store, open, .. } = self;
        match open {
            Some(txn) if expected.map_or(true, |id| id == txn.id) => Ok((&*store, txn)),
            _ => Err(StoreError::TransactionRequired),
        }
    }

    fn take_open(&mut self, expected: Option<TransactionId>) -> Option<OpenTransaction> {
        match &self.open {
            Some(txn) if expected.map_or(true, |id| id == txn.id) => self.open.take(),
            _ => None,
        }
    }

    /// TigerStyle: Verify all invariants hold
    ///
    /// # Invariants
    /// - Every finished transaction was started: committed + aborted + open == started
    /// - Overlay entries are keyed by their record id
    /// - The open transaction id was issued by this coordinator
    #[cfg(debug_assertions)]
    fn verify_invariants(&self) {
        let open = u64::from(self.open.is_some());
        debug_assert_eq!(
            self.stats.committed + self.stats.aborted + open,
            self.stats.started,
            "Invariant violated: every transaction ends exactly once"
        );
        if let Some(txn) = &self.open {
            debug_assert!(
                txn.id.0 <= self.next_id,
                "Invariant violated: open transaction {} was never issued",
                txn.id
            );
            for (key, record) in &txn.writes {
                debug_assert_eq!(
                    key, &record.id,
                    "Invariant violated: overlay key '{}' holds record '{}'",
                    key, record.id
                );
            }
        }
        self.store.verify_invariants();
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

/// Single-writer coordinator over the committed store
pub struct TransactionCoordinator {
    state: Mutex<CoordinatorState>,
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self::with_store(KeyedStore::new())
    }

    /// Start from an existing committed table
    pub fn with_store(store: KeyedStore) -> Self {
        TransactionCoordinator {
            state: Mutex::new(CoordinatorState {
                store,
                open: None,
                next_id: 0,
                stats: CoordinatorStats::default(),
            }),
        }
    }

    pub fn state(&self) -> TransactionState {
        match &self.state.lock().open {
            Some(txn) => TransactionState::OpenWrite(txn.id),
            None => TransactionState::NoTransaction,
        }
    }

    pub fn has_open_transaction(&self) -> bool {
        self.state.lock().open.is_some()
    }

    /// Open the single write transaction.
    pub fn start_transaction(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TransactionId, StoreError> {
        check_cancel(cancel)?;
        let mut state = self.state.lock();
        if state.open.is_some() {
            return Err(StoreError::TransactionAlreadyExists);
        }

        state.next_id += 1;
        let id = TransactionId(state.next_id);
        state.open = Some(OpenTransaction {
            id,
            writes: AHashMap::new(),
        });
        state.stats.started += 1;

        #[cfg(debug_assertions)]
        state.verify_invariants();

        debug!("Transaction {} started", id);
        Ok(id)
    }

    /// Read a record as the open transaction sees it: its own writes first,
    /// then the committed table.
    pub fn get_by_id(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Record>, StoreError> {
        self.get_in(None, id, cancel)
    }

    /// Insert or fully replace the record keyed by `record.id` inside the
    /// open transaction.
    pub fn upsert(
        &self,
        record: Record,
        cancel: &CancellationToken,
    ) -> Result<UpsertOutcome, StoreError> {
        self.upsert_in(None, record, cancel)
    }

    /// Publish the open transaction's writes.
    ///
    /// Cancellation is only honoured before the commit starts; once applied
    /// the writes are never half-visible.
    pub fn commit(&self, cancel: &CancellationToken) -> Result<CommitSummary, StoreError> {
        self.commit_in(None, cancel)
    }

    /// Discard the open transaction. Returns its id, `None` if nothing was open.
    pub fn abort(&self) -> Option<TransactionId> {
        self.abort_in(None)
    }

    /// Open a write transaction bound to a scoped guard.
    pub fn begin(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<WriteTransaction, StoreError> {
        let id = self.start_transaction(cancel)?;
        Ok(WriteTransaction {
            coordinator: Arc::clone(self),
            id,
            finished: false,
        })
    }

    /// Committed view of one record, ignoring any pending writes
    pub fn read_committed(&self, id: &str) -> Option<Record> {
        self.state.lock().store.get(id).cloned()
    }

    pub fn committed_len(&self) -> usize {
        self.state.lock().store.len()
    }

    /// Copy of the committed table
    pub fn snapshot(&self) -> KeyedStore {
        self.state.lock().store.clone()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.state.lock().stats
    }

    fn get_in(
        &self,
        expected: Option<TransactionId>,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Record>, StoreError> {
        check_cancel(cancel)?;
        let mut state = self.state.lock();
        let (store, txn) = state.open_mut(expected)?;
        Ok(txn.writes.get(id).or_else(|| store.get(id)).cloned())
    }

    fn upsert_in(
        &self,
        expected: Option<TransactionId>,
        record: Record,
        cancel: &CancellationToken,
    ) -> Result<UpsertOutcome, StoreError> {
        check_cancel(cancel)?;
        let mut state = self.state.lock();
        let (store, txn) = state.open_mut(expected)?;

        record.validate().map_err(|e| StoreError::InvalidRecord {
            id: record.id.clone(),
            reason: e.to_string(),
        })?;

        let previous = txn
            .writes
            .get(&record.id)
            .or_else(|| store.get(&record.id))
            .cloned();
        let applied = if previous.is_some() {
            WriteKind::Replaced
        } else {
            WriteKind::Inserted
        };
        debug!("Transaction {} {:?} record {}", txn.id, applied, record.id);
        txn.writes.insert(record.id.clone(), record);

        Ok(UpsertOutcome { previous, applied })
    }

    fn commit_in(
        &self,
        expected: Option<TransactionId>,
        cancel: &CancellationToken,
    ) -> Result<CommitSummary, StoreError> {
        check_cancel(cancel)?;
        let mut state = self.state.lock();
        let txn = state
            .take_open(expected)
            .ok_or(StoreError::TransactionRequired)?;

        let records_written = txn.writes.len();
        for (_, record) in txn.writes {
            state.store.replace(record);
        }
        state.stats.committed += 1;
        state.stats.records_committed += records_written as u64;

        #[cfg(debug_assertions)]
        state.verify_invariants();

        info!(
            "Transaction {} committed {} records ({} total)",
            txn.id,
            records_written,
            state.store.len()
        );
        Ok(CommitSummary {
            id: txn.id,
            records_written,
        })
    }

    fn abort_in(&self, expected: Option<TransactionId>) -> Option<TransactionId> {
        let mut state = self.state.lock();
        let txn = state.take_open(expected)?;
        state.stats.aborted += 1;

        #[cfg(debug_assertions)]
        state.verify_invariants();

        info!(
            "Transaction {} aborted, {} pending writes discarded",
            txn.id,
            txn.writes.len()
        );
        Some(txn.id)
    }
}

/// Scoped write transaction. Ends in exactly one commit or abort; dropping it
/// unfinished aborts.
pub struct WriteTransaction {
    coordinator: Arc<TransactionCoordinator>,
    id: TransactionId,
    finished: bool,
}

impl WriteTransaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn get_by_id(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Record>, StoreError> {
        self.coordinator.get_in(Some(self.id), id, cancel)
    }

    pub fn upsert(
        &self,
        record: Record,
        cancel: &CancellationToken,
    ) -> Result<UpsertOutcome, StoreError> {
        self.coordinator.upsert_in(Some(self.id), record, cancel)
    }

    /// On error the guard is dropped, which aborts the transaction.
    pub fn commit(mut self, cancel: &CancellationToken) -> Result<CommitSummary, StoreError> {
        let summary = self.coordinator.commit_in(Some(self.id), cancel)?;
        self.finished = true;
        Ok(summary)
    }

    pub fn abort(mut self) {
        self.coordinator.abort_in(Some(self.id));
        self.finished = true;
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if !self.finished && self.coordinator.abort_in(Some(self.id)).is_some() {
            warn!("Transaction {} dropped without commit, aborted", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecordFields;

    fn record(id: &str, name: &str) -> Record {
        Record::new(id, RecordFields::named(name))
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn test_single_writer() {
        let coordinator = TransactionCoordinator::new();
        let cancel = token();
        let id = coordinator.start_transaction(&cancel).unwrap();
        assert_eq!(coordinator.state(), TransactionState::OpenWrite(id));
        assert_eq!(
            coordinator.start_transaction(&cancel),
            Err(StoreError::TransactionAlreadyExists)
        );

        coordinator.abort();
        assert_eq!(coordinator.state(), TransactionState::NoTransaction);
        assert!(coordinator.start_transaction(&cancel).is_ok());
    }

    #[test]
    fn test_operations_require_transaction() {
        let coordinator = TransactionCoordinator::new();
        let cancel = token();
        assert_eq!(
            coordinator.get_by_id("A", &cancel),
            Err(StoreError::TransactionRequired)
        );
        assert_eq!(
            coordinator.upsert(record("A", "X"), &cancel),
            Err(StoreError::TransactionRequired)
        );
        assert_eq!(coordinator.commit(&cancel), Err(StoreError::TransactionRequired));
        assert_eq!(coordinator.abort(), None);
    }

    #[test]
    fn test_writes_invisible_until_commit() {
        let coordinator = TransactionCoordinator::new();
        let cancel = token();
        coordinator.start_transaction(&cancel).unwrap();

        let outcome = coordinator.upsert(record("A", "X"), &cancel).unwrap();
        assert_eq!(outcome.applied, WriteKind::Inserted);
        assert!(outcome.previous.is_none());

        assert_eq!(
            coordinator.get_by_id("A", &cancel).unwrap().unwrap().name(),
            "X",
            "a transaction reads its own writes"
        );
        assert!(coordinator.read_committed("A").is_none());
        assert_eq!(coordinator.committed_len(), 0);

        let summary = coordinator.commit(&cancel).unwrap();
        assert_eq!(summary.records_written, 1);
        assert_eq!(coordinator.read_committed("A").unwrap().name(), "X");
    }

    #[test]
    fn test_abort_discards_writes() {
        let coordinator = TransactionCoordinator::new();
        let cancel = token();
        coordinator.start_transaction(&cancel).unwrap();
        coordinator.upsert(record("A", "X"), &cancel).unwrap();
        coordinator.upsert(record("B", "Y"), &cancel).unwrap();
        coordinator.abort();

        assert_eq!(coordinator.committed_len(), 0);
        let stats = coordinator.stats();
        assert_eq!(stats.aborted, 1);
        assert_eq!(stats.committed, 0);
    }

    #[test]
    fn test_replace_is_full_and_reports_previous() {
        let coordinator = TransactionCoordinator::new();
        let cancel = token();

        let mut fields = RecordFields::named("Old");
        fields.city = Some("Ajman".into());
        coordinator.start_transaction(&cancel).unwrap();
        coordinator.upsert(Record::new("A", fields), &cancel).unwrap();
        coordinator.commit(&cancel).unwrap();

        coordinator.start_transaction(&cancel).unwrap();
        let outcome = coordinator.upsert(record("A", "New"), &cancel).unwrap();
        assert_eq!(outcome.applied, WriteKind::Replaced);
        assert_eq!(outcome.previous.unwrap().name(), "Old");
        coordinator.commit(&cancel).unwrap();

        let stored = coordinator.read_committed("A").unwrap();
        assert_eq!(stored.name(), "New");
        assert!(stored.fields.city.is_none());
    }

    #[test]
    fn test_invalid_record_keeps_transaction_open() {
        let coordinator = TransactionCoordinator::new();
        let cancel = token();
        coordinator.start_transaction(&cancel).unwrap();

        let err = coordinator.upsert(record("A", ""), &cancel).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { ref id, .. } if id == "A"));
        assert!(coordinator.has_open_transaction());

        coordinator.upsert(record("B", "Y"), &cancel).unwrap();
        assert_eq!(coordinator.commit(&cancel).unwrap().records_written, 1);
    }

    #[test]
    fn test_cancelled_operations() {
        let coordinator = TransactionCoordinator::new();
        let live = token();
        let cancelled = token();
        cancelled.cancel();

        assert_eq!(
            coordinator.start_transaction(&cancelled),
            Err(StoreError::Cancelled)
        );
        coordinator.start_transaction(&live).unwrap();
        assert_eq!(
            coordinator.upsert(record("A", "X"), &cancelled),
            Err(StoreError::Cancelled)
        );
        assert_eq!(coordinator.commit(&cancelled), Err(StoreError::Cancelled));
        assert!(coordinator.has_open_transaction(), "cancelled commit leaves the transaction open");
    }

    #[test]
    fn test_guard_drop_aborts() {
        let coordinator = Arc::new(TransactionCoordinator::new());
        let cancel = token();
        {
            let txn = coordinator.begin(&cancel).unwrap();
            txn.upsert(record("A", "X"), &cancel).unwrap();
        }
        assert!(!coordinator.has_open_transaction());
        assert_eq!(coordinator.committed_len(), 0);
        assert_eq!(coordinator.stats().aborted, 1);
    }

    #[test]
    fn test_guard_commit_then_drop_is_noop() {
        let coordinator = Arc::new(TransactionCoordinator::new());
        let cancel = token();
        let txn = coordinator.begin(&cancel).unwrap();
        txn.upsert(record("A", "X"), &cancel).unwrap();
        txn.commit(&cancel).unwrap();

        let stats = coordinator.stats();
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.aborted, 0);
        assert_eq!(stats.records_committed, 1);
    }

    #[test]
    fn test_failed_guard_commit_aborts() {
        let coordinator = Arc::new(TransactionCoordinator::new());
        let live = token();
        let cancelled = token();
        cancelled.cancel();

        let txn = coordinator.begin(&live).unwrap();
        txn.upsert(record("A", "X"), &live).unwrap();
        assert_eq!(txn.commit(&cancelled), Err(StoreError::Cancelled));

        assert!(!coordinator.has_open_transaction());
        assert_eq!(coordinator.committed_len(), 0);
    }

    #[test]
    fn test_stale_guard_cannot_touch_newer_transaction() {
        let coordinator = Arc::new(TransactionCoordinator::new());
        let cancel = token();
        let stale = coordinator.begin(&cancel).unwrap();
        coordinator.abort();

        let current = coordinator.start_transaction(&cancel).unwrap();
        assert_eq!(
            stale.upsert(record("A", "X"), &cancel),
            Err(StoreError::TransactionRequired)
        );
        drop(stale);
        assert_eq!(coordinator.state(), TransactionState::OpenWrite(current));
    }

    #[test]
    fn test_concurrent_begin_admits_one_writer() {
        let coordinator = Arc::new(TransactionCoordinator::new());
        let barrier = std::sync::Barrier::new(8);

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let coordinator = &coordinator;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        coordinator.start_transaction(&token()).is_ok() as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 1);
    }
}
