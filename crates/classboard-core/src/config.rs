//! Session configuration.
//!
//! Board, session and sender ids are supplied by the embedding application
//! (they come from the surrounding auth/roster layer). Everything else has a
//! default and can be overridden from `CLASSBOARD_*` environment variables.

use crate::history::DEFAULT_HISTORY_CAP;
use std::time::Duration;
use uuid::Uuid;

/// Default relay endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:3030/ws";

const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1_000;
const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Parse an environment variable, falling back to `default` when missing or invalid.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Reconnect backoff: `initial * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(DEFAULT_BACKOFF_INITIAL_MS),
            max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

impl BackoffConfig {
    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Everything a board session needs at construction time.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// WebSocket endpoint of the realtime relay.
    pub endpoint: String,
    /// Board whose operations this session reads and writes.
    pub board_id: String,
    /// Classroom session the board belongs to.
    pub session_id: String,
    /// Identity of this client; stamped on every sent operation.
    pub sender_id: String,
    /// Observer connections never write.
    pub receive_only: bool,
    /// Snapshots kept in the live history (None = unbounded).
    pub history_cap: Option<usize>,
    pub backoff: BackoffConfig,
}

impl SessionConfig {
    /// Config with a fresh random sender id and default settings.
    pub fn new(board_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            board_id: board_id.into(),
            session_id: session_id.into(),
            sender_id: Uuid::new_v4().to_string(),
            receive_only: false,
            history_cap: Some(DEFAULT_HISTORY_CAP),
            backoff: BackoffConfig::default(),
        }
    }

    /// Load overrides from the environment on top of [`SessionConfig::new`].
    pub fn from_env(board_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let mut config = Self::new(board_id, session_id);
        config.endpoint = env_parse("CLASSBOARD_ENDPOINT", config.endpoint);
        config.sender_id = env_parse("CLASSBOARD_SENDER_ID", config.sender_id);
        config.receive_only = env_parse("CLASSBOARD_RECEIVE_ONLY", config.receive_only);
        let cap: usize = env_parse("CLASSBOARD_HISTORY_CAP", DEFAULT_HISTORY_CAP);
        config.history_cap = (cap > 0).then_some(cap);
        config.backoff = BackoffConfig {
            initial: Duration::from_millis(env_parse(
                "CLASSBOARD_BACKOFF_INITIAL_MS",
                DEFAULT_BACKOFF_INITIAL_MS,
            )),
            max: Duration::from_millis(env_parse("CLASSBOARD_BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS)),
        };
        config
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_sender_id(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    pub fn receive_only(mut self, receive_only: bool) -> Self {
        self.receive_only = receive_only;
        self
    }

    pub fn with_history_cap(mut self, cap: Option<usize>) -> Self {
        self.history_cap = cap;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Deterministic channel name, so a remount reuses the same channel.
    pub fn channel_name(&self) -> String {
        format!("board:{}:{}", self.board_id, self.sender_id)
    }
}
