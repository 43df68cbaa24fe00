//! Shared relay state: per-board broadcast channels over the operation log.

use classboard_core::{Operation, OperationRow, OperationStore, ServerMessage, StorageError};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

/// Default broadcast buffer per board.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid row: {0}")]
    InvalidRow(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What the relay knows about a board's persisted log.
#[derive(Default)]
struct LogIndex {
    /// Number of rows appended so far; the next row gets `len + 1`.
    len: u64,
    /// Ids of appended rows, for dropping re-sent inserts.
    row_ids: HashSet<String>,
}

impl LogIndex {
    fn from_rows(rows: &[OperationRow]) -> Self {
        Self {
            len: rows.len() as u64,
            row_ids: rows.iter().map(|row| row.id.clone()).filter(|id| !id.is_empty()).collect(),
        }
    }
}

/// Outcome of a successful insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// Appended and broadcast at this log position.
    Appended { seq: u64 },
    /// A row with the same id is already in the log; nothing was broadcast.
    Duplicate,
}

/// Board state
struct Board {
    /// INSERT events for this board
    tx: broadcast::Sender<ServerMessage>,
    /// Subscribed connection ids
    subscribers: HashSet<String>,
    /// Held while appending and broadcasting, so subscribers see log order.
    /// Loaded from the store on the first write.
    log: Arc<Mutex<Option<LogIndex>>>,
}

impl Board {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            subscribers: HashSet::new(),
            log: Arc::new(Mutex::new(None)),
        }
    }

    fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && Arc::strong_count(&self.log) == 1
    }
}

/// Shared application state
pub struct AppState {
    boards: DashMap<String, Board>,
    store: Arc<dyn OperationStore>,
    channel_capacity: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn OperationStore>, channel_capacity: usize) -> Self {
        Self {
            boards: DashMap::new(),
            store,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Add a connection to a board's subscribers.
    pub fn subscribe(&self, board_id: &str, conn_id: &str) -> broadcast::Receiver<ServerMessage> {
        let mut board = self
            .boards
            .entry(board_id.to_string())
            .or_insert_with(|| Board::new(self.channel_capacity));
        board.subscribers.insert(conn_id.to_string());
        board.tx.subscribe()
    }

    /// Remove a connection; boards without subscribers or pending writes are dropped.
    pub fn unsubscribe(&self, board_id: &str, conn_id: &str) {
        self.boards.remove_if_mut(board_id, |_, board| {
            board.subscribers.remove(conn_id);
            board.is_idle()
        });
    }

    pub fn subscriber_count(&self, board_id: &str) -> usize {
        self.boards.get(board_id).map_or(0, |b| b.subscribers.len())
    }

    /// Validate, append and broadcast one row.
    ///
    /// The relay assigns the row's log sequence. A row whose id is already
    /// in the log is acknowledged without being appended again.
    pub async fn insert(&self, mut row: OperationRow) -> Result<Inserted, RelayError> {
        if row.board_id.is_empty() {
            return Err(RelayError::InvalidRow("missing board_id".to_string()));
        }
        Operation::from_row(&row).map_err(|e| RelayError::InvalidRow(e.to_string()))?;
        if row.id.is_empty() {
            row.id = Uuid::new_v4().to_string();
        }

        let board_id = row.board_id.clone();
        let log = {
            let board = self
                .boards
                .entry(board_id.clone())
                .or_insert_with(|| Board::new(self.channel_capacity));
            board.log.clone()
        };

        let result = {
            let mut index = log.lock().await;
            self.append_and_broadcast(&mut index, row).await
        };
        drop(log);
        self.boards.remove_if(&board_id, |_, board| board.is_idle());
        result
    }

    async fn append_and_broadcast(
        &self,
        index: &mut Option<LogIndex>,
        mut row: OperationRow,
    ) -> Result<Inserted, RelayError> {
        if index.is_none() {
            let rows = self.select(&row.board_id).await?;
            *index = Some(LogIndex::from_rows(&rows));
        }
        let index = index.get_or_insert_with(LogIndex::default);
        if index.row_ids.contains(&row.id) {
            info!("Row {} already in the log of {}, not appending", row.id, row.board_id);
            return Ok(Inserted::Duplicate);
        }

        row.seq = index.len + 1;
        self.store.append(&row.board_id, &row).await?;
        index.len = row.seq;
        index.row_ids.insert(row.id.clone());

        let seq = row.seq;
        let tx = self.boards.get(&row.board_id).map(|b| b.tx.clone());
        if let Some(tx) = tx {
            let delivered = tx.send(ServerMessage::Insert { row }).unwrap_or(0);
            debug!("Broadcast insert {} to {} subscribers", seq, delivered);
        }
        Ok(Inserted::Appended { seq })
    }

    /// Full log of a board, oldest first; unknown boards have an empty log.
    ///
    /// Rows carry their 1-based position as `seq`.
    pub async fn select(&self, board_id: &str) -> Result<Vec<OperationRow>, StorageError> {
        let mut rows = match self.store.load(board_id).await {
            Ok(rows) => rows,
            Err(StorageError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        for (position, row) in rows.iter_mut().enumerate() {
            row.seq = position as u64 + 1;
        }
        Ok(rows)
    }
}
