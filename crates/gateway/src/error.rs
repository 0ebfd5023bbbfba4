use std::time::Duration;

use thiserror::Error;

use crate::state::{ConnectionEvent, ConnectionState};

/// Errors establishing or holding a gateway session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("connection refused by {addr}: {reason}")]
    Refused { addr: String, reason: String },

    #[error("gateway at {addr} did not complete the handshake within {timeout_secs}s")]
    HandshakeTimeout { addr: String, timeout_secs: u64 },

    #[error("client id {client_id} is already in use on the gateway")]
    ClientIdInUse { client_id: i32 },

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("not connected (state: {0})")]
    NotConnected(ConnectionState),

    #[error("connection lost: {0}")]
    Lost(String),

    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    InvalidState(#[from] TransitionError),

    #[error("io error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ConnectionError {
    /// Whether a fresh connection attempt may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectionError::Refused { .. }
                | ConnectionError::HandshakeTimeout { .. }
                | ConnectionError::Io(_)
                | ConnectionError::Lost(_)
        )
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        ConnectionError::Io(err.to_string())
    }
}

/// Rejected state machine transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {from} via {event}")]
    InvalidTransition {
        from: ConnectionState,
        event: ConnectionEvent,
    },
}

/// How a single historical data request failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("gateway rejected request (code {code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("correlation id {0} is already pending")]
    DuplicateId(i64),
}

/// Malformed or oversized wire frames.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("unexpected end of message while reading {0}")]
    Truncated(&'static str),

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WireError> for ConnectionError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => ConnectionError::Io(e.to_string()),
            other => ConnectionError::Protocol(other.to_string()),
        }
    }
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnvVar { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
