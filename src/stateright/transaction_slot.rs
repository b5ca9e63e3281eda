//! Stateright Model for the single-writer import transaction
//!
//! Exhaustively verifies, over every interleaving of concurrent sessions:
//! - SINGLE_WRITER: at most one session holds the open transaction
//! - ABORTED_INVISIBLE: every committed row was written by a committed session
//! - COMMIT_PUBLISHES_ALL: after commit each key the session wrote holds its
//!   value, or that of a session that committed later
//!
//! Mirrors `store::TransactionCoordinator`: start, upsert, commit, abort.

use stateright::{Model, Property};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Open,
    /// Start failed with TransactionAlreadyExists
    Rejected,
    Committed,
    Aborted,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotState {
    /// Session holding the open transaction
    pub slot: Option<usize>,
    pub phases: Vec<Phase>,
    /// Keys each session wrote in its transaction (kept after it ends)
    pub writes: Vec<BTreeSet<u8>>,
    /// Committed table: key -> session whose write is visible
    pub committed: BTreeMap<u8, usize>,
    /// Commit order, per session
    pub commit_seq: Vec<Option<u32>>,
    pub next_seq: u32,
}

impl SlotState {
    pub fn new(sessions: usize) -> Self {
        SlotState {
            slot: None,
            phases: vec![Phase::Idle; sessions],
            writes: vec![BTreeSet::new(); sessions],
            committed: BTreeMap::new(),
            commit_seq: vec![None; sessions],
            next_seq: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlotAction {
    Start(usize),
    Upsert(usize, u8),
    Commit(usize),
    Abort(usize),
}

pub struct TransactionSlotModel {
    pub sessions: usize,
    pub keys: Vec<u8>,
}

impl TransactionSlotModel {
    pub fn new() -> Self {
        TransactionSlotModel {
            sessions: 3,
            keys: vec![1, 2],
        }
    }
}

impl Default for TransactionSlotModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for TransactionSlotModel {
    type State = SlotState;
    type Action = SlotAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![SlotState::new(self.sessions)]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for s in 0..self.sessions {
            match state.phases[s] {
                Phase::Idle | Phase::Rejected => actions.push(SlotAction::Start(s)),
                Phase::Open => {
                    for &key in &self.keys {
                        if !state.writes[s].contains(&key) {
                            actions.push(SlotAction::Upsert(s, key));
                        }
                    }
                    actions.push(SlotAction::Commit(s));
                    actions.push(SlotAction::Abort(s));
                }
                Phase::Committed | Phase::Aborted => {}
            }
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();

        match action {
            SlotAction::Start(s) => {
                if next.slot.is_some() {
                    next.phases[s] = Phase::Rejected;
                } else {
                    next.slot = Some(s);
                    next.phases[s] = Phase::Open;
                }
            }
            SlotAction::Upsert(s, key) => {
                if next.slot != Some(s) {
                    return None;
                }
                next.writes[s].insert(key);
            }
            SlotAction::Commit(s) => {
                if next.slot != Some(s) {
                    return None;
                }
                for &key in &next.writes[s] {
                    next.committed.insert(key, s);
                }
                next.commit_seq[s] = Some(next.next_seq);
                next.next_seq += 1;
                next.phases[s] = Phase::Committed;
                next.slot = None;
            }
            SlotAction::Abort(s) => {
                if next.slot != Some(s) {
                    return None;
                }
                next.phases[s] = Phase::Aborted;
                next.slot = None;
            }
        }

        if next == *state {
            return None;
        }
        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            // INVARIANT 1: At most one open transaction, and it is the slot holder
            Property::always("single_writer", |_model: &TransactionSlotModel, state: &SlotState| {
                let open: Vec<usize> = state
                    .phases
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| **p == Phase::Open)
                    .map(|(s, _)| s)
                    .collect();
                match state.slot {
                    Some(s) => open == vec![s],
                    None => open.is_empty(),
                }
            }),

            // INVARIANT 2: Only committed sessions are visible
            Property::always("aborted_invisible", |_model: &TransactionSlotModel, state: &SlotState| {
                state
                    .committed
                    .values()
                    .all(|&writer| state.phases[writer] == Phase::Committed)
            }),

            // INVARIANT 3: Commit publishes every write of the session
            Property::always("commit_publishes_all", |_model: &TransactionSlotModel, state: &SlotState| {
                (0..state.phases.len()).all(|s| {
                    let Some(seq) = state.commit_seq[s] else {
                        return true;
                    };
                    state.writes[s].iter().all(|key| match state.committed.get(key) {
                        Some(&writer) => state.commit_seq[writer].map_or(false, |w| w >= seq),
                        None => false,
                    })
                })
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_start_rejected() {
        let model = TransactionSlotModel::new();
        let state = SlotState::new(2);
        let state = model.next_state(&state, SlotAction::Start(0)).unwrap();
        let state = model.next_state(&state, SlotAction::Start(1)).unwrap();
        assert_eq!(state.slot, Some(0));
        assert_eq!(state.phases[1], Phase::Rejected);
    }

    #[test]
    fn test_abort_publishes_nothing() {
        let model = TransactionSlotModel::new();
        let state = SlotState::new(2);
        let state = model.next_state(&state, SlotAction::Start(0)).unwrap();
        let state = model.next_state(&state, SlotAction::Upsert(0, 1)).unwrap();
        let state = model.next_state(&state, SlotAction::Abort(0)).unwrap();
        assert!(state.committed.is_empty());
        assert_eq!(state.slot, None);
    }

    #[test]
    fn test_non_holder_cannot_commit() {
        let model = TransactionSlotModel::new();
        let state = SlotState::new(2);
        let state = model.next_state(&state, SlotAction::Start(0)).unwrap();
        assert!(model.next_state(&state, SlotAction::Commit(1)).is_none());
    }

    #[test]
    #[ignore] // Run with: cargo test stateright_transaction_slot -- --ignored --nocapture
    fn stateright_transaction_slot_model_check() {
        use stateright::Checker;

        let model = TransactionSlotModel::new();
        let checker = model.checker().spawn_bfs().join();

        println!("States explored: {}", checker.unique_state_count());

        checker.assert_properties();

        println!("Model check passed! All transaction slot invariants hold.");
    }
}
