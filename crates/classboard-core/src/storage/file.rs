//! File-based operation store.

use super::{BoxFuture, OperationStore, StorageError, StorageResult};
use crate::sync::OperationRow;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOG_EXTENSION: &str = "jsonl";

/// Stores each board's log as a JSON-lines file, one row per line.
pub struct FileStore {
    /// Base directory for board logs.
    base_path: PathBuf,
}

impl FileStore {
    /// Create a new file store with the given base directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub fn new(base_path: PathBuf) -> StorageResult<Self> {
        if !base_path.exists() {
            fs::create_dir_all(&base_path)
                .map_err(|e| StorageError::Io(format!("Failed to create storage directory: {}", e)))?;
        }
        Ok(Self { base_path })
    }

    /// Get the file path for a board id.
    fn log_path(&self, board_id: &str) -> PathBuf {
        let safe_id: String = board_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_path.join(format!("{}.{}", safe_id, LOG_EXTENSION))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// Parse a log file, skipping lines that don't decode.
fn parse_log(path: &Path, text: &str) -> Vec<OperationRow> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str(line) {
            Ok(row) => Some(row),
            Err(e) => {
                log::warn!("Skipping corrupt row {}:{}: {}", path.display(), n + 1, e);
                None
            }
        })
        .collect()
}

impl OperationStore for FileStore {
    fn append(&self, board_id: &str, row: &OperationRow) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.log_path(board_id);
        let line = match serde_json::to_string(row) {
            Ok(line) => line,
            Err(e) => return Box::pin(async move { Err(StorageError::Serialization(e.to_string())) }),
        };

        Box::pin(async move {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| StorageError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
            writeln!(file, "{}", line)
                .map_err(|e| StorageError::Io(format!("Failed to write {}: {}", path.display(), e)))
        })
    }

    fn load(&self, board_id: &str) -> BoxFuture<'_, StorageResult<Vec<OperationRow>>> {
        let path = self.log_path(board_id);
        let board_id = board_id.to_string();

        Box::pin(async move {
            if !path.exists() {
                return Err(StorageError::NotFound(board_id));
            }
            let text = fs::read_to_string(&path)
                .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
            Ok(parse_log(&path, &text))
        })
    }

    fn delete(&self, board_id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.log_path(board_id);

        Box::pin(async move {
            if path.exists() {
                fs::remove_file(&path)
                    .map_err(|e| StorageError::Io(format!("Failed to delete {}: {}", path.display(), e)))?;
            }
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        let base = self.base_path.clone();

        Box::pin(async move {
            if !base.exists() {
                return Ok(vec![]);
            }
            let entries =
                fs::read_dir(&base).map_err(|e| StorageError::Io(format!("Failed to read directory: {}", e)))?;

            let ids = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == LOG_EXTENSION))
                .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
                .collect();
            Ok(ids)
        })
    }

    fn exists(&self, board_id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let path = self.log_path(board_id);
        Box::pin(async move { Ok(path.exists()) })
    }
}
