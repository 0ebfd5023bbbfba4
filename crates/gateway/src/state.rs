use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::error::TransitionError;

/// Lifecycle of a gateway session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session
    Disconnected,
    /// Transport open, handshake in progress
    Connecting,
    /// Handshake acknowledged, requests accepted
    Connected,
    /// Orderly shutdown in progress
    Disconnecting,
    /// Handshake failed or the session was lost
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Caller asked for a session
    Connect,
    /// Gateway acknowledged the handshake
    HandshakeAck,
    /// Handshake refused, rejected or timed out
    Fail,
    /// Caller asked to close the session
    Disconnect,
    /// Transport fully closed
    Closed,
    /// Transport died underneath an established session
    ConnectionLost,
    /// Failure handled, ready for a new attempt
    Reset,
}

impl std::fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionEvent::Connect => write!(f, "connect"),
            ConnectionEvent::HandshakeAck => write!(f, "handshake_ack"),
            ConnectionEvent::Fail => write!(f, "fail"),
            ConnectionEvent::Disconnect => write!(f, "disconnect"),
            ConnectionEvent::Closed => write!(f, "closed"),
            ConnectionEvent::ConnectionLost => write!(f, "connection_lost"),
            ConnectionEvent::Reset => write!(f, "reset"),
        }
    }
}

/// Apply an event to the current state, returning the new state.
///
/// Pure function; every pair not listed is rejected.
pub fn apply_event(
    current: ConnectionState,
    event: &ConnectionEvent,
) -> Result<ConnectionState, TransitionError> {
    use ConnectionEvent as E;
    use ConnectionState as S;

    match (current, event) {
        (S::Disconnected, E::Connect) => Ok(S::Connecting),
        (S::Connecting, E::HandshakeAck) => Ok(S::Connected),
        (S::Connecting, E::Fail) => Ok(S::Failed),
        (S::Connected, E::Disconnect) => Ok(S::Disconnecting),
        (S::Disconnecting, E::Closed) => Ok(S::Disconnected),
        (S::Connected, E::ConnectionLost) => Ok(S::Failed),
        (S::Failed, E::Reset) => Ok(S::Disconnected),
        (from, event) => Err(TransitionError::InvalidTransition {
            from,
            event: *event,
        }),
    }
}

/// Shared, observable connection state.
///
/// Writes go through [`apply_event`]; readers either poll [`StateCell::get`]
/// or subscribe to the watch channel.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ConnectionState>,
    transitions: AtomicU64,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            tx,
            transitions: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Number of transitions applied since creation.
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::SeqCst)
    }

    /// Apply `event` atomically with respect to other writers.
    pub fn apply(&self, event: ConnectionEvent) -> Result<ConnectionState, TransitionError> {
        let mut outcome = Err(TransitionError::InvalidTransition {
            from: ConnectionState::Disconnected,
            event,
        });
        self.tx.send_if_modified(|state| {
            outcome = apply_event(*state, &event);
            match &outcome {
                Ok(next) => {
                    debug!(from = %state, to = %next, event = %event, "connection state transition");
                    *state = *next;
                    self.transitions.fetch_add(1, Ordering::SeqCst);
                    true
                }
                Err(_) => false,
            }
        });
        outcome
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
