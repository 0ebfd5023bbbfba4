use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::GatewayConfig;
use crate::error::ConnectionError;
use crate::wire::{ClientMessage, GatewayEvent};

/// Capacity of the per-link channels.
pub const LINK_CHANNEL_CAPACITY: usize = 100;

/// An open pipe to a gateway.
///
/// Dropping `outbound` closes the link; `inbound` ending means the gateway
/// side is gone.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<GatewayEvent>,
}

/// A way to reach a gateway (TCP to TWS / IB Gateway, or in-process).
///
/// `open` only establishes the pipe and negotiates the protocol version; the
/// START_API handshake runs over the returned link.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, config: &GatewayConfig) -> Result<Link, ConnectionError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
