//! Connection state machine: subscribe, queue, ack, reconnect.

use super::{
    ClientMessage, ConnectionStatus, OperationRow, RealtimeSocket, ServerMessage, SocketEvent, Transport,
    TransportEvent,
};
use crate::config::SessionConfig;
use crate::error::SyncError;
use crate::operation::Operation;
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

/// Reliable operation transport over a [`RealtimeSocket`].
///
/// Rows are never dropped: they wait in the queue while disconnected, stay
/// in flight until the relay acknowledges them, and go back to the front of
/// the queue when the connection drops before the ack.
pub struct SyncTransport<S: RealtimeSocket> {
    config: SessionConfig,
    socket: S,
    status: ConnectionStatus,
    queue: VecDeque<OperationRow>,
    /// Sent but unacknowledged rows, keyed by insert ref (send order).
    in_flight: BTreeMap<u64, OperationRow>,
    next_ref: u64,
    attempt: u32,
    retry_at: Option<Instant>,
    history_wanted: bool,
    /// A subscription succeeded before; later ones refetch the log.
    has_subscribed: bool,
    /// Highest log sequence delivered to the session.
    last_seq: u64,
    /// Set by [`SyncTransport::disconnect`]; stops reconnects.
    stopped: bool,
    events: Vec<TransportEvent>,
}

impl<S: RealtimeSocket> SyncTransport<S> {
    /// Open the socket and start subscribing.
    pub fn connect(config: SessionConfig, socket: S) -> Self {
        Self::connect_at(config, socket, Instant::now())
    }

    /// Like [`SyncTransport::connect`] with an explicit clock.
    pub fn connect_at(config: SessionConfig, socket: S, now: Instant) -> Self {
        let mut transport = Self {
            config,
            socket,
            status: ConnectionStatus::Disconnected,
            queue: VecDeque::new(),
            in_flight: BTreeMap::new(),
            next_ref: 0,
            attempt: 0,
            retry_at: None,
            history_wanted: false,
            has_subscribed: false,
            last_seq: 0,
            stopped: false,
            events: Vec::new(),
        };
        transport.open(now);
        transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    /// Rows queued or awaiting an ack.
    pub fn pending_count(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }

    /// Highest log sequence seen, from history or live inserts.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// When the next reconnect attempt is due.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Publish an operation; queued while not subscribed.
    pub fn send(&mut self, operation: &Operation) -> Option<OperationRow> {
        if self.config.receive_only {
            log::debug!("Receive-only transport, not sending {}", operation.kind());
            return None;
        }
        let row = match operation.to_row(&self.config.board_id, &self.config.session_id) {
            Ok(row) => row,
            Err(e) => {
                log::error!("Failed to encode {} operation: {}", operation.kind(), e);
                return None;
            }
        };

        if self.status.is_connected() && self.queue.is_empty() {
            if let Err(e) = self.transmit_row(row.clone()) {
                log::warn!("Send failed, row queued for retry: {}", e);
                self.handle_disconnect(Instant::now());
            }
        } else {
            log::debug!("Not subscribed, queueing {} row", row.action_type);
            self.queue.push_back(row.clone());
        }
        Some(row)
    }

    /// Ask the relay for the board's full log.
    pub fn request_history(&mut self) {
        self.history_wanted = true;
        if self.status.is_connected() {
            self.send_select(Instant::now());
        }
    }

    /// Drive the connection. Returns events for the session.
    pub fn poll(&mut self, now: Instant) -> Vec<TransportEvent> {
        for event in self.socket.poll() {
            match event {
                SocketEvent::Opened => self.subscribe(now),
                SocketEvent::Text(text) => self.handle_message(&text, now),
                SocketEvent::Error(message) => {
                    log::warn!("Socket error: {}", message);
                    if self.status != ConnectionStatus::Disconnected {
                        self.handle_disconnect(now);
                    }
                }
                SocketEvent::Closed => {
                    if self.status != ConnectionStatus::Disconnected {
                        self.handle_disconnect(now);
                    }
                }
            }
        }

        if self.status == ConnectionStatus::Disconnected
            && !self.stopped
            && self.retry_at.is_some_and(|at| now >= at)
        {
            self.retry_at = None;
            log::info!("Reconnecting (attempt {})", self.attempt);
            self.open(now);
        }

        std::mem::take(&mut self.events)
    }

    /// Close the connection for good. Queued rows are kept.
    pub fn disconnect(&mut self) {
        if self.status.is_connected() {
            let message = ClientMessage::Unsubscribe {
                channel: self.config.channel_name(),
            };
            if let Err(e) = self.transmit(&message) {
                log::debug!("Unsubscribe not delivered: {}", e);
            }
        }
        self.stopped = true;
        self.handle_disconnect(Instant::now());
    }

    fn open(&mut self, now: Instant) {
        self.set_status(ConnectionStatus::Connecting);
        match self.socket.connect(&self.config.endpoint) {
            Ok(()) => {}
            Err(SyncError::InvalidUrl(reason)) => {
                log::error!("Not connecting, endpoint is unusable: {}", reason);
                self.stopped = true;
                self.handle_disconnect(now);
            }
            Err(e) => {
                log::warn!("Connect to {} failed: {}", self.config.endpoint, e);
                self.handle_disconnect(now);
            }
        }
    }

    fn subscribe(&mut self, now: Instant) {
        let message = ClientMessage::Subscribe {
            channel: self.config.channel_name(),
            board_id: self.config.board_id.clone(),
        };
        if let Err(e) = self.transmit(&message) {
            log::warn!("Subscribe failed: {}", e);
            self.handle_disconnect(now);
        }
    }

    fn handle_message(&mut self, text: &str, now: Instant) {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Failed to parse server message: {}", e);
                return;
            }
        };

        match message {
            ServerMessage::Subscribed { channel } => {
                log::info!("Subscribed to {}", channel);
                self.attempt = 0;
                self.set_status(ConnectionStatus::Subscribed);
                if self.has_subscribed {
                    // Inserts made while we were away were never broadcast to us.
                    self.history_wanted = true;
                }
                self.has_subscribed = true;
                self.flush(now);
                if self.history_wanted {
                    self.send_select(now);
                }
            }
            ServerMessage::Insert { row } => self.receive_row(row),
            ServerMessage::Inserted { reference } => {
                if self.in_flight.remove(&reference).is_none() {
                    log::debug!("Ack for unknown ref {}", reference);
                }
            }
            ServerMessage::Rows { board_id, rows } => {
                if board_id == self.config.board_id {
                    log::debug!("Received {} history rows", rows.len());
                    // The log is authoritative, even if it restarted below what we saw.
                    self.last_seq = rows.iter().map(|row| row.seq).max().unwrap_or(0);
                    self.events.push(TransportEvent::History(rows));
                }
            }
            ServerMessage::Rejected { reference, message } => match self.in_flight.remove(&reference) {
                Some(row) => log::error!("Relay rejected {} row {}, dropping it: {}", row.action_type, row.id, message),
                None => log::debug!("Rejection for unknown ref {}: {}", reference, message),
            },
            ServerMessage::Error { message } => log::warn!("Relay error: {}", message),
        }
    }

    fn receive_row(&mut self, row: OperationRow) {
        if row.board_id != self.config.board_id {
            log::debug!("Ignoring row for board {}", row.board_id);
            return;
        }
        if row.seq != 0 {
            if row.seq <= self.last_seq {
                log::debug!("Skipping row {} at seq {}, already applied", row.id, row.seq);
                return;
            }
            self.last_seq = row.seq;
        }
        if row.user_id == self.config.sender_id {
            return;
        }
        match Operation::from_row(&row) {
            Ok(operation) => self.events.push(TransportEvent::Operation(operation)),
            Err(e) => log::warn!("Dropping malformed remote row {}: {}", row.object_id, e),
        }
    }

    fn send_select(&mut self, now: Instant) {
        let message = ClientMessage::Select {
            board_id: self.config.board_id.clone(),
        };
        match self.transmit(&message) {
            Ok(()) => self.history_wanted = false,
            Err(e) => {
                log::warn!("History request failed: {}", e);
                self.handle_disconnect(now);
            }
        }
    }

    fn flush(&mut self, now: Instant) {
        while self.status.is_connected() {
            let Some(row) = self.queue.pop_front() else {
                return;
            };
            if let Err(e) = self.transmit_row(row) {
                log::warn!("Flush interrupted: {}", e);
                self.handle_disconnect(now);
            }
        }
    }

    fn transmit_row(&mut self, row: OperationRow) -> Result<(), SyncError> {
        let reference = self.next_ref;
        self.next_ref += 1;
        let message = ClientMessage::Insert {
            reference,
            row: row.clone(),
        };
        match self.transmit(&message) {
            Ok(()) => {
                self.in_flight.insert(reference, row);
                Ok(())
            }
            Err(e) => {
                self.queue.push_front(row);
                Err(e)
            }
        }
    }

    fn transmit(&mut self, message: &ClientMessage) -> Result<(), SyncError> {
        let text = serde_json::to_string(message)?;
        self.socket.send_text(&text)
    }

    fn handle_disconnect(&mut self, now: Instant) {
        self.socket.close();
        self.set_status(ConnectionStatus::Disconnected);

        let unacked = std::mem::take(&mut self.in_flight);
        for row in unacked.into_values().rev() {
            self.queue.push_front(row);
        }

        if self.stopped {
            self.retry_at = None;
            return;
        }
        let delay = self.config.backoff.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.retry_at = Some(now + delay);
        log::info!("Disconnected; retrying in {:?} ({} rows pending)", delay, self.pending_count());
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            self.status = status;
            self.events.push(TransportEvent::StatusChanged(status));
        }
    }
}

impl<S: RealtimeSocket> Transport for SyncTransport<S> {
    fn send(&mut self, operation: &Operation) -> Option<OperationRow> {
        SyncTransport::send(self, operation)
    }

    fn poll(&mut self, now: Instant) -> Vec<TransportEvent> {
        SyncTransport::poll(self, now)
    }

    fn request_history(&mut self) {
        SyncTransport::request_history(self)
    }

    fn status(&self) -> ConnectionStatus {
        self.status
    }

    fn is_receive_only(&self) -> bool {
        self.config.receive_only
    }
}
