//! Realtime sync with the relay.
//!
//! Operations travel as [`OperationRow`]s over a JSON WebSocket protocol.
//! [`SyncTransport`] owns reconnects, the outbound queue and echo filtering;
//! the socket itself sits behind [`RealtimeSocket`] so the state machine can
//! be driven by a scripted socket in tests.

mod native;
mod transport;

pub use native::NativeSocket;
pub use transport::SyncTransport;

use crate::error::SyncError;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Persisted/wire form of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRow {
    /// Unique row id, chosen by the sending client. Re-sent rows keep it.
    #[serde(default)]
    pub id: String,
    /// Position in the board's log (1-based), assigned by the relay.
    /// Zero until the row has been appended.
    #[serde(default)]
    pub seq: u64,
    pub action_type: String,
    pub board_id: String,
    /// Payload fields of the operation, without the type tag.
    pub object_data: serde_json::Value,
    pub object_id: String,
    pub session_id: String,
    /// Sender id of the client that issued the operation.
    pub user_id: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Listen for inserts on a board.
    Subscribe { channel: String, board_id: String },
    /// Append a row; acknowledged with `inserted` carrying the same ref.
    Insert {
        #[serde(rename = "ref")]
        reference: u64,
        row: OperationRow,
    },
    /// Fetch the board's full log.
    Select { board_id: String },
    Unsubscribe { channel: String },
}

/// Messages received from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed { channel: String },
    /// INSERT event for a subscribed board.
    Insert { row: OperationRow },
    /// Ack for a client insert.
    Inserted {
        #[serde(rename = "ref")]
        reference: u64,
    },
    /// Response to `select`, oldest row first.
    Rows { board_id: String, rows: Vec<OperationRow> },
    /// A client insert that will never be accepted; resending won't help.
    Rejected {
        #[serde(rename = "ref")]
        reference: u64,
        message: String,
    },
    Error { message: String },
}

/// Low-level socket events.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Opened,
    Text(String),
    Closed,
    Error(String),
}

/// Minimal text socket the transport drives.
pub trait RealtimeSocket {
    /// Start connecting. Completion is reported by [`SocketEvent::Opened`].
    fn connect(&mut self, url: &str) -> Result<(), SyncError>;

    fn send_text(&mut self, text: &str) -> Result<(), SyncError>;

    /// Drain pending events (non-blocking).
    fn poll(&mut self) -> Vec<SocketEvent>;

    fn close(&mut self);
}

/// Connection state shown by the UI badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Subscribed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Subscribed)
    }
}

/// What a transport poll surfaces to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Remote operation from another sender.
    Operation(Operation),
    /// Full board log, answering [`Transport::request_history`].
    History(Vec<OperationRow>),
    StatusChanged(ConnectionStatus),
}

/// The transport surface a session needs.
pub trait Transport {
    /// Publish an operation. None when nothing will be sent (receive-only).
    fn send(&mut self, operation: &Operation) -> Option<OperationRow>;

    fn poll(&mut self, now: Instant) -> Vec<TransportEvent>;

    fn request_history(&mut self);

    fn status(&self) -> ConnectionStatus;

    fn is_receive_only(&self) -> bool;
}


#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> OperationRow {
        OperationRow {
            id: "r1".to_string(),
            seq: 0,
            action_type: "undo".to_string(),
            board_id: "b".to_string(),
            object_data: serde_json::json!({}),
            object_id: "o".to_string(),
            session_id: "s".to_string(),
            user_id: "u".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_client_message_serialize() {
        let msg = ClientMessage::Insert { reference: 7, row: row() };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "insert");
        assert_eq!(json["ref"], 7);
        assert_eq!(json["row"]["action_type"], "undo");
    }

    #[test]
    fn test_server_message_deserialize() {
        let json = r#"{"type":"inserted","ref":3}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg, ServerMessage::Inserted { reference: 3 });

        let json = r#"{"type":"subscribed","channel":"board:b:u"}"#;
        match serde_json::from_str::<ServerMessage>(json).unwrap() {
            ServerMessage::Subscribed { channel } => assert_eq!(channel, "board:b:u"),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_status_badge() {
        assert!(!ConnectionStatus::Disconnected.is_connected());
        assert!(!ConnectionStatus::Connecting.is_connected());
        assert!(ConnectionStatus::Subscribed.is_connected());
    }
}
