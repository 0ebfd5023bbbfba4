use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::GatewayConfig;
use crate::error::ConnectionError;
use crate::transport::{Link, Transport, LINK_CHANNEL_CAPACITY};
use crate::wire::{self, ClientMessage, GatewayEvent, ServerMessage, MIN_CLIENT_VERSION};

/// TCP transport to a running TWS or IB Gateway
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self, config: &GatewayConfig) -> Result<Link, ConnectionError> {
        let addr = config.addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| ConnectionError::Refused {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        let (mut read, mut write) = stream.into_split();
        wire::write_client_hello(&mut write).await?;

        let hello = wire::read_frame(&mut read)
            .await?
            .ok_or_else(|| ConnectionError::Refused {
                addr: addr.clone(),
                reason: "closed during version negotiation".to_string(),
            })?;
        let (server_version, connection_time) = wire::decode_server_hello(&hello)?;
        if server_version < MIN_CLIENT_VERSION {
            return Err(ConnectionError::HandshakeRejected(format!(
                "server version {} is older than the minimum {}",
                server_version, MIN_CLIENT_VERSION
            )));
        }
        info!(
            addr = %addr,
            server_version,
            connection_time = %connection_time,
            "negotiated gateway protocol version"
        );

        Ok(spawn_link(read, write))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Run the frame reader and writer for an established byte stream.
pub(crate) fn spawn_link<R, W>(mut read: R, mut write: W) -> Link
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (in_tx, in_rx) = mpsc::channel::<GatewayEvent>(LINK_CHANNEL_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(LINK_CHANNEL_CAPACITY);

    // Spawn reader task
    tokio::spawn(async move {
        loop {
            let frame = match wire::read_frame(&mut read).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("gateway closed the stream");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read frame from gateway");
                    break;
                }
            };
            let message = match ServerMessage::decode(&frame) {
                Ok(Some(message)) => message,
                Ok(None) => {
                    let fields = wire::split_fields(&frame);
                    trace!(msg_id = ?fields.first(), "skipping unhandled message");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "dropping malformed message");
                    continue;
                }
            };
            for event in message.into_events() {
                if in_tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    });

    // Spawn writer task
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(e) = wire::write_frame(&mut write, &message.encode()).await {
                warn!(error = %e, "failed to write frame to gateway");
                return;
            }
        }
        let _ = write.shutdown().await;
    });

    Link {
        outbound: out_tx,
        inbound: in_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{read_frame, write_frame};

    #[tokio::test]
    async fn test_link_decodes_frames_and_encodes_messages() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(client);
        let mut link = spawn_link(read, write);

        write_frame(&mut server, &ServerMessage::NextValidId(42).encode())
            .await
            .unwrap();
        // unknown message ids are skipped without closing the link
        write_frame(&mut server, b"49\x001\x00x\x00").await.unwrap();
        write_frame(&mut server, &ServerMessage::ManagedAccounts("DU123".into()).encode())
            .await
            .unwrap();

        assert_eq!(link.inbound.recv().await, Some(GatewayEvent::NextValidId(42)));
        assert_eq!(
            link.inbound.recv().await,
            Some(GatewayEvent::ManagedAccounts("DU123".into()))
        );

        link.outbound
            .send(ClientMessage::StartApi { client_id: 9 })
            .await
            .unwrap();
        let frame = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(
            ClientMessage::decode(&frame).unwrap(),
            Some(ClientMessage::StartApi { client_id: 9 })
        );

        drop(server);
        assert_eq!(link.inbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_refused_when_nothing_listens() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = GatewayConfig::new("127.0.0.1", port, 1);
        let err = TcpTransport::new().open(&config).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Refused { .. }), "{:?}", err);
    }
}
