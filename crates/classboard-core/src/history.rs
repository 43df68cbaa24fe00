//! Linear undo/redo history of board snapshots.
//!
//! The history is a flat list of snapshots with a current index. Undo and
//! redo only move the index; committing a new snapshot after an undo
//! discards the redo-able future first.

use crate::board::BoardState;
use crate::operation::{Bounds, OperationKind};
use serde::{Deserialize, Serialize};

/// Default number of snapshots kept by a live session.
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// What produced a snapshot; lets the UI jump to the last change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub kind: OperationKind,
    pub bounds: Bounds,
    pub timestamp: u64,
}

/// Immutable capture of the board at one history step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub board: BoardState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
}

/// Snapshot stack plus current index.
///
/// Invariants: never empty, and `index < entries.len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    entries: Vec<HistorySnapshot>,
    index: usize,
    /// Maximum number of snapshots kept (None = unbounded).
    cap: Option<usize>,
}

impl History {
    /// Unbounded history seeded with one snapshot.
    pub fn new(initial: BoardState) -> Self {
        Self {
            entries: vec![HistorySnapshot {
                board: initial,
                activity: None,
            }],
            index: 0,
            cap: None,
        }
    }

    /// Bounded history; the oldest snapshots are pruned past `cap`.
    pub fn with_cap(initial: BoardState, cap: usize) -> Self {
        let mut history = Self::new(initial);
        history.cap = Some(cap.max(1));
        history
    }

    /// Change the cap, pruning immediately if needed.
    pub fn set_cap(&mut self, cap: Option<usize>) {
        self.cap = cap.map(|c| c.max(1));
        self.prune();
    }

    pub fn cap(&self) -> Option<usize> {
        self.cap
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; a history holds at least its seed snapshot.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistorySnapshot] {
        &self.entries
    }

    /// Snapshot at the current index.
    pub fn current(&self) -> &HistorySnapshot {
        &self.entries[self.index]
    }

    /// Board at the current index.
    pub fn board(&self) -> &BoardState {
        &self.current().board
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    /// Step back. Returns the restored board, or None at the start.
    pub fn undo(&mut self) -> Option<&BoardState> {
        if !self.can_undo() {
            return None;
        }
        self.index -= 1;
        Some(self.board())
    }

    /// Step forward. Returns the restored board, or None at the end.
    pub fn redo(&mut self) -> Option<&BoardState> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        Some(self.board())
    }

    /// Commit a new snapshot after the current index.
    pub fn push(&mut self, board: BoardState, activity: Option<Activity>) {
        self.entries.truncate(self.index + 1);
        self.entries.push(HistorySnapshot { board, activity });
        self.index = self.entries.len() - 1;
        self.prune();
    }

    /// Replace the board at the current index without adding a step.
    ///
    /// Used for local-only changes such as selection.
    pub fn replace_current(&mut self, board: BoardState) {
        self.entries[self.index].board = board;
    }

    /// Most recent visible activity at or before the current index.
    pub fn last_activity(&self) -> Option<&Activity> {
        self.entries[..=self.index]
            .iter()
            .rev()
            .filter_map(|s| s.activity.as_ref())
            .find(|a| !a.bounds.is_degenerate())
    }

    fn prune(&mut self) {
        let Some(cap) = self.cap else {
            return;
        };
        if self.entries.len() <= cap {
            return;
        }
        let excess = self.entries.len() - cap;
        // Never prune past the current index.
        let excess = excess.min(self.index);
        self.entries.drain(..excess);
        self.index -= excess;
    }
}
