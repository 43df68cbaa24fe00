//! State providers: where a session keeps its board and history.

use crate::board::{BoardState, Selection};
use crate::history::{Activity, History};

/// Capability interface every state provider satisfies.
///
/// A session is constructed with exactly one provider and calls these
/// methods unconditionally.
pub trait StateProvider {
    /// Board visible to the user (always the snapshot under the history index).
    fn board(&self) -> &BoardState;

    /// Undo/redo history.
    fn history(&self) -> &History;

    /// Commit a new board as the next history step.
    fn commit(&mut self, board: BoardState, activity: Option<Activity>);

    /// Step back; false at the start of history.
    fn undo(&mut self) -> bool;

    /// Step forward; false at the end of history.
    fn redo(&mut self) -> bool;

    /// Change the selection without adding a history step.
    fn set_selection(&mut self, selection: Selection);

    /// Replace the whole history (after a load-time replay).
    fn restore(&mut self, history: History);
}

/// In-memory provider with an optionally bounded rolling history.
#[derive(Debug, Clone)]
pub struct LocalStore {
    history: History,
}

impl LocalStore {
    /// Create an empty store. `cap` bounds the number of kept snapshots.
    pub fn new(cap: Option<usize>) -> Self {
        let mut history = History::new(BoardState::new());
        history.set_cap(cap);
        Self { history }
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new(Some(crate::history::DEFAULT_HISTORY_CAP))
    }
}

impl StateProvider for LocalStore {
    fn board(&self) -> &BoardState {
        self.history.board()
    }

    fn history(&self) -> &History {
        &self.history
    }

    fn commit(&mut self, board: BoardState, activity: Option<Activity>) {
        self.history.push(board, activity);
    }

    fn undo(&mut self) -> bool {
        self.history.undo().is_some()
    }

    fn redo(&mut self) -> bool {
        self.history.redo().is_some()
    }

    fn set_selection(&mut self, selection: Selection) {
        let mut board = self.history.board().clone();
        board.selection = selection;
        self.history.replace_current(board);
    }

    fn restore(&mut self, mut history: History) {
        history.set_cap(self.history.cap());
        self.history = history;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::Stroke;

    #[test]
    fn test_commit_then_undo_redo() {
        let mut store = LocalStore::new(None);
        let mut board = BoardState::new();
        board.upsert_line(Stroke::from_points(vec![0.0, 0.0]).with_id("a"));
        store.commit(board, None);

        assert_eq!(store.board().lines.len(), 1);
        assert!(store.undo());
        assert!(store.board().is_empty());
        assert!(!store.undo());
        assert!(store.redo());
        assert!(!store.redo());
        assert_eq!(store.board().lines.len(), 1);
    }

    #[test]
    fn test_restore_applies_store_cap() {
        let mut store = LocalStore::new(Some(2));
        let mut history = History::new(BoardState::new());
        for i in 0..5 {
            let mut board = history.board().clone();
            board.upsert_line(Stroke::from_points(vec![0.0, 0.0]).with_id(i.to_string()));
            history.push(board, None);
        }
        store.restore(history);
        assert_eq!(store.history().len(), 2);
        assert_eq!(store.board().lines.len(), 5);
    }

    #[test]
    fn test_selection_does_not_add_history() {
        let mut store = LocalStore::default();
        let mut board = BoardState::new();
        board.upsert_line(Stroke::from_points(vec![0.0, 0.0]).with_id("a"));
        store.commit(board, None);

        store.set_selection(Selection {
            line_ids: vec!["a".to_string()],
            image_ids: vec![],
        });
        assert_eq!(store.history().len(), 2);
        assert!(store.board().selection.contains("a"));
    }
}
