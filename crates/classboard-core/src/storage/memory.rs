//! In-memory operation store.

use super::{BoxFuture, OperationStore, StorageError, StorageResult};
use crate::sync::OperationRow;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory store for tests and ephemeral relays.
#[derive(Default)]
pub struct MemoryStore {
    boards: RwLock<HashMap<String, Vec<OperationRow>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}

impl OperationStore for MemoryStore {
    fn append(&self, board_id: &str, row: &OperationRow) -> BoxFuture<'_, StorageResult<()>> {
        let board_id = board_id.to_string();
        let row = row.clone();
        Box::pin(async move {
            let mut boards = self.boards.write().map_err(lock_error)?;
            boards.entry(board_id).or_default().push(row);
            Ok(())
        })
    }

    fn load(&self, board_id: &str) -> BoxFuture<'_, StorageResult<Vec<OperationRow>>> {
        let board_id = board_id.to_string();
        Box::pin(async move {
            let boards = self.boards.read().map_err(lock_error)?;
            boards
                .get(&board_id)
                .cloned()
                .ok_or(StorageError::NotFound(board_id))
        })
    }

    fn delete(&self, board_id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let board_id = board_id.to_string();
        Box::pin(async move {
            let mut boards = self.boards.write().map_err(lock_error)?;
            boards.remove(&board_id);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let boards = self.boards.read().map_err(lock_error)?;
            Ok(boards.keys().cloned().collect())
        })
    }

    fn exists(&self, board_id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let board_id = board_id.to_string();
        Box::pin(async move {
            let boards = self.boards.read().map_err(lock_error)?;
            Ok(boards.contains_key(&board_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_util::{block_on, row};

    #[test]
    fn test_append_and_load_keeps_order() {
        let store = MemoryStore::new();
        let first = row("b1", "a");
        let second = row("b1", "b");

        block_on(store.append("b1", &first)).unwrap();
        block_on(store.append("b1", &second)).unwrap();

        let loaded = block_on(store.load("b1")).unwrap();
        assert_eq!(loaded, vec![first, second]);
    }

    #[test]
    fn test_not_found() {
        let store = MemoryStore::new();
        let result = block_on(store.load("nonexistent"));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_boards_are_isolated() {
        let store = MemoryStore::new();
        block_on(store.append("b1", &row("b1", "a"))).unwrap();
        block_on(store.append("b2", &row("b2", "x"))).unwrap();

        assert_eq!(block_on(store.load("b1")).unwrap().len(), 1);
        let mut list = block_on(store.list()).unwrap();
        list.sort();
        assert_eq!(list, vec!["b1".to_string(), "b2".to_string()]);
    }

    #[test]
    fn test_delete() {
        let store = MemoryStore::new();
        block_on(store.append("b1", &row("b1", "a"))).unwrap();
        assert!(block_on(store.exists("b1")).unwrap());
        block_on(store.delete("b1")).unwrap();
        assert!(!block_on(store.exists("b1")).unwrap());
    }
}
