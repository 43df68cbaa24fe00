//! Classboard Core Library
//!
//! Operation log, replay and sync logic for the collaborative classroom
//! whiteboard. Local edits become [`Operation`]s, remote operations are
//! applied through the same reducer, and a persisted log replays into both
//! the board and its undo/redo history.

pub mod apply;
pub mod board;
pub mod config;
pub mod error;
pub mod history;
pub mod operation;
pub mod replay;
pub mod session;
pub mod shapes;
pub mod storage;
pub mod store;
pub mod sync;

pub use apply::apply_operation;
pub use board::{BoardState, Selection};
pub use config::{BackoffConfig, SessionConfig, env_parse};
pub use error::{StorageError, StorageResult, SyncError};
pub use history::{Activity, History, HistorySnapshot};
pub use operation::{Bounds, Operation, OperationKind, Payload, calculate_bounds};
pub use replay::{ReplayOutcome, replay, replay_rows};
pub use session::BoardSession;
pub use shapes::{Image, ImageFormat, ImagePatch, ObjectId, Stroke, StrokePatch, StrokeTool};
pub use storage::{FileStore, MemoryStore, OperationStore};
pub use store::{LocalStore, StateProvider};
pub use sync::{
    ClientMessage, ConnectionStatus, NativeSocket, OperationRow, RealtimeSocket, ServerMessage, SyncTransport,
    Transport, TransportEvent,
};
