//! History replay engine.
//!
//! Operation logs are stored flat, undo/redo markers included, exactly as
//! users issued them. Rebuilding both the board and the undo stack after a
//! reload means re-simulating the markers against the stack instead of
//! applying every operation forward.

use crate::apply::apply_operation;
use crate::board::BoardState;
use crate::history::{Activity, History};
use crate::operation::{Operation, Payload};
use crate::sync::OperationRow;

/// Result of replaying an operation log.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    /// Board after the last operation.
    pub state: BoardState,
    /// Full history with its index.
    pub history: History,
}

impl ReplayOutcome {
    pub fn final_index(&self) -> usize {
        self.history.index()
    }

    /// Check that the outcome is usable as a board and undo stack.
    ///
    /// The index must point into the stack, the board must equal the
    /// snapshot under it, and no snapshot may hold two objects with one id
    /// (a stroke and an image sharing an id cannot be addressed).
    pub fn verify(&self) -> bool {
        let entries = self.history.entries();
        if self.history.index() >= entries.len() {
            return false;
        }
        if !self.history.board().same_content(&self.state) {
            return false;
        }
        match entries.iter().position(|entry| !entry.board.has_unique_ids()) {
            Some(at) => {
                log::warn!("Snapshot {} holds duplicate object ids", at);
                false
            }
            None => true,
        }
    }
}

/// Activity metadata for a committed operation, None when nothing is visible.
pub fn derive_activity(operation: &Operation, before: &BoardState, after: &BoardState) -> Option<Activity> {
    let bounds = operation.activity_bounds(before, after);
    (!bounds.is_degenerate()).then_some(Activity {
        kind: operation.kind(),
        bounds,
        timestamp: operation.timestamp,
    })
}

/// Replay `operations` in order on top of `initial`.
///
/// Pure: the same input always yields the same outcome.
pub fn replay(operations: &[Operation], initial: BoardState) -> ReplayOutcome {
    let mut history = History::new(initial);

    for operation in operations {
        match operation.payload {
            Payload::Undo => {
                if history.undo().is_none() {
                    log::debug!("Replay: undo at start of history ignored");
                }
            }
            Payload::Redo => {
                if history.redo().is_none() {
                    log::debug!("Replay: redo at end of history ignored");
                }
            }
            _ => {
                let before = history.board();
                let after = apply_operation(before, operation);
                let activity = derive_activity(operation, before, &after);
                history.push(after, activity);
            }
        }
    }

    ReplayOutcome {
        state: history.board().clone(),
        history,
    }
}

/// Decode persisted rows and replay them, skipping malformed rows.
pub fn replay_rows(rows: &[OperationRow], initial: BoardState) -> ReplayOutcome {
    let operations: Vec<Operation> = rows
        .iter()
        .filter_map(|row| match Operation::from_row(row) {
            Ok(op) => Some(op),
            Err(e) => {
                log::warn!("Skipping malformed row {}: {}", row.object_id, e);
                None
            }
        })
        .collect();
    log::debug!("Replaying {} of {} rows", operations.len(), rows.len());
    replay(&operations, initial)
}
