//! Operation log persistence.
//!
//! A board's log is an append-only sequence of [`OperationRow`]s in insert
//! order. Readers replay it; nothing is ever rewritten in place.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

pub use crate::error::{StorageError, StorageResult};
use crate::sync::OperationRow;
use std::future::Future;
use std::pin::Pin;

/// Boxed future for async operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for operation log backends.
///
/// Implementations must be Send + Sync so one store can serve every
/// connection of the relay.
pub trait OperationStore: Send + Sync {
    /// Append a row to a board's log, creating the board if needed.
    fn append(&self, board_id: &str, row: &OperationRow) -> BoxFuture<'_, StorageResult<()>>;

    /// Load a board's full log, oldest row first.
    fn load(&self, board_id: &str) -> BoxFuture<'_, StorageResult<Vec<OperationRow>>>;

    /// Delete a board's log.
    fn delete(&self, board_id: &str) -> BoxFuture<'_, StorageResult<()>>;

    /// List all board ids with a log.
    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>>;

    /// Check if a board has a log.
    fn exists(&self, board_id: &str) -> BoxFuture<'_, StorageResult<bool>>;
}
