use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::models::{Position, Signal};

/// What a streaming session is doing between candles
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamPhase {
    Seeking,
    Holding,
}

/// IDLE → STARTING → STREAMING(seeking | holding) → STOPPING → IDLE
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Starting,
    Streaming(StreamPhase),
    Stopping,
}

impl SessionState {
    pub fn is_running(self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Streaming(_))
    }
}

/// Point-in-time view of a session, safe to hand to any reader
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionStatus {
    pub symbol: String,
    pub running: bool,
    pub state: SessionState,
    pub holding_position: bool,
    pub position: Option<Position>,
    pub last_signal: Option<Signal>,
    pub status_message: String,
    /// Operator alert, e.g. an entry left without its bracket
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionStatus {
    pub fn idle(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            running: false,
            state: SessionState::Idle,
            holding_position: false,
            position: None,
            last_signal: None,
            status_message: "Idle".to_string(),
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Set the state and the fields derived from it
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.running = state.is_running();
        if !matches!(state, SessionState::Streaming(_)) {
            self.holding_position = false;
            self.position = None;
        }
    }

    /// Streaming snapshot for the current position (holding when present)
    pub fn set_position(&mut self, position: Option<&Position>) {
        let phase = if position.is_some() {
            StreamPhase::Holding
        } else {
            StreamPhase::Seeking
        };
        self.state = SessionState::Streaming(phase);
        self.running = true;
        self.holding_position = position.is_some();
        self.position = position.cloned();
    }
}

/// Single-writer publisher of `SessionStatus` snapshots
///
/// Every update builds a complete new snapshot and swaps it in, so readers
/// never observe a half-applied change.
#[derive(Clone)]
pub struct StatusHandle {
    tx: Arc<watch::Sender<SessionStatus>>,
}

impl StatusHandle {
    pub fn new(initial: SessionStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> SessionStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.tx.subscribe()
    }

    /// Build the next snapshot from the current one and publish it
    pub fn update<F>(&self, f: F) -> SessionStatus
    where
        F: FnOnce(&mut SessionStatus),
    {
        let mut next = self.current();
        f(&mut next);
        next.updated_at = Utc::now();
        self.tx.send_replace(next.clone());
        next
    }

    /// Atomically move IDLE → STARTING; false if the session is not idle
    pub(crate) fn try_begin_start(&self) -> bool {
        self.tx.send_if_modified(|status| {
            if status.state != SessionState::Idle {
                return false;
            }
            status.set_state(SessionState::Starting);
            status.last_signal = None;
            status.last_error = None;
            status.status_message = "Starting".to_string();
            status.updated_at = Utc::now();
            true
        })
    }
}
