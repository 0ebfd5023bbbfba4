//! ibhist-gateway: session management for the IB TWS / Gateway API
//!
//! A [`GatewayConnection`] owns one session task that consumes gateway
//! events in arrival order and routes them through the [`Correlator`] to
//! the request that asked for them.

pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod sim;
pub mod state;
pub mod tcp;
pub mod transport;
pub mod wire;

pub use config::{Backoff, GatewayConfig};
pub use connection::{GatewayConnection, PendingRequest};
pub use correlator::{Completed, CorrelationId, Correlator, Resolution};
pub use error::{ConfigError, ConnectionError, RequestError, TransitionError, WireError};
pub use sim::{HandshakeBehavior, HistoryBehavior, SimGateway};
pub use state::{apply_event, ConnectionEvent, ConnectionState};
pub use tcp::TcpTransport;
pub use transport::{Link, Transport};
