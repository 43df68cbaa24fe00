//! Blocking `tungstenite` socket on a background thread.

use super::{RealtimeSocket, SocketEvent};
use crate::error::SyncError;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{Message, connect};
use url::Url;

/// Commands sent to the socket thread.
enum SocketCommand {
    Send(String),
    Close,
}

/// WebSocket client for native platforms.
///
/// The socket thread never touches board state; it only forwards text
/// frames through channels.
#[derive(Default)]
pub struct NativeSocket {
    cmd_tx: Option<Sender<SocketCommand>>,
    event_rx: Option<Receiver<SocketEvent>>,
    _thread: Option<JoinHandle<()>>,
}

impl NativeSocket {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(url: &str) -> Result<(), SyncError> {
        let parsed = Url::parse(url).map_err(|e| SyncError::InvalidUrl(format!("{}: {}", url, e)))?;
        match parsed.scheme() {
            "ws" => Ok(()),
            "wss" => Err(SyncError::InvalidUrl(format!("{}: TLS endpoints are not supported", url))),
            scheme => Err(SyncError::InvalidUrl(format!("unsupported scheme {}", scheme))),
        }
    }

    fn run(url: String, cmd_rx: Receiver<SocketCommand>, event_tx: Sender<SocketEvent>) {
        log::info!("Socket thread: connecting to {}", url);

        let (mut socket, response) = match connect(url.as_str()) {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("Socket connection failed: {}", e);
                let _ = event_tx.send(SocketEvent::Error(format!("Connection failed: {}", e)));
                let _ = event_tx.send(SocketEvent::Closed);
                return;
            }
        };
        log::info!("Socket connected, status: {}", response.status());
        let _ = event_tx.send(SocketEvent::Opened);

        // Short read timeout so the loop can service outbound commands.
        match socket.get_mut() {
            tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
                let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
                let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
            }
            #[allow(unreachable_patterns)]
            _ => log::debug!("Non-plain stream, using default timeouts"),
        }

        loop {
            match cmd_rx.try_recv() {
                Ok(SocketCommand::Send(text)) => {
                    if let Err(e) = socket.send(Message::Text(text)) {
                        log::error!("Socket send error: {}", e);
                        let _ = event_tx.send(SocketEvent::Error(e.to_string()));
                        break;
                    }
                }
                Ok(SocketCommand::Close) => {
                    log::info!("Socket close requested");
                    let _ = socket.close(None);
                    break;
                }
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(Message::Text(text)) => {
                    let _ = event_tx.send(SocketEvent::Text(text));
                }
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("Socket received close frame");
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    log::error!("Socket read error: {}", e);
                    let _ = event_tx.send(SocketEvent::Error(e.to_string()));
                    break;
                }
            }
        }

        log::info!("Socket thread exiting");
        let _ = event_tx.send(SocketEvent::Closed);
    }
}

impl RealtimeSocket for NativeSocket {
    fn connect(&mut self, url: &str) -> Result<(), SyncError> {
        if self.cmd_tx.is_some() {
            return Err(SyncError::Socket("already connected".to_string()));
        }
        Self::validate(url)?;

        let (cmd_tx, cmd_rx) = channel::<SocketCommand>();
        let (event_tx, event_rx) = channel::<SocketEvent>();
        let url = url.to_string();
        let handle = thread::spawn(move || Self::run(url, cmd_rx, event_tx));

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<(), SyncError> {
        let tx = self.cmd_tx.as_ref().ok_or(SyncError::NotConnected)?;
        tx.send(SocketCommand::Send(text.to_string()))
            .map_err(|e| SyncError::Socket(format!("send failed: {}", e)))
    }

    fn poll(&mut self) -> Vec<SocketEvent> {
        let Some(rx) = self.event_rx.as_ref() else {
            return Vec::new();
        };
        let events: Vec<SocketEvent> = rx.try_iter().collect();
        if events.iter().any(|e| matches!(e, SocketEvent::Closed)) {
            // Thread is gone; allow a fresh connect.
            self.cmd_tx = None;
            self.event_rx = None;
            self._thread = None;
        }
        events
    }

    fn close(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(SocketCommand::Close);
        }
        self.event_rx = None;
        self._thread = None;
    }
}

impl Drop for NativeSocket {
    fn drop(&mut self) {
        self.close();
    }
}
