//! Gateway connection: one asynchronous session per instance.
//!
//! The session task owns the transport link and the [`Correlator`]. Callers
//! talk to it through an unbounded command channel and receive results on
//! per-request oneshot channels, so the correlator is never shared.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ibhist_model::HistoricalDataRequest;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::GatewayConfig;
use crate::correlator::{CorrelationId, Correlator, Resolution};
use crate::error::{ConnectionError, RequestError};
use crate::state::{ConnectionEvent, ConnectionState, StateCell};
use crate::tcp::TcpTransport;
use crate::transport::{Link, Transport};
use crate::wire::{self, ClientMessage, GatewayEvent, CLIENT_ID_IN_USE, NO_REQUEST};

enum Command {
    Submit {
        id: CorrelationId,
        request: HistoricalDataRequest,
        timeout: Duration,
        waiter: oneshot::Sender<Resolution>,
    },
    Cancel {
        id: CorrelationId,
    },
    Shutdown {
        done: Option<oneshot::Sender<()>>,
    },
}

struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// A stateful connection to one gateway, identified by host, port and
/// client id.
pub struct GatewayConnection {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    state: Arc<StateCell>,
    session: Mutex<Option<SessionHandle>>,
    next_id: AtomicI64,
}

impl GatewayConnection {
    pub fn new(config: GatewayConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            state: Arc::new(StateCell::new()),
            session: Mutex::new(None),
            next_id: AtomicI64::new(1),
        }
    }

    /// Connection over TCP to TWS / IB Gateway
    pub fn tcp(config: GatewayConfig) -> Self {
        Self::new(config, Arc::new(TcpTransport::new()))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Number of state transitions since creation.
    pub fn transition_count(&self) -> u64 {
        self.state.transitions()
    }

    pub fn next_correlation_id(&self) -> CorrelationId {
        CorrelationId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Open a session and complete the handshake. No-op while connected.
    ///
    /// Failed attempts are retried `connect_retries` times with exponential
    /// backoff; a client id conflict is returned immediately.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut session = self.session.lock().await;

        if let Some(handle) = session.take() {
            if self.state.get().is_connected() && !handle.commands.is_closed() {
                *session = Some(handle);
                return Ok(());
            }
            // previous session ended on its own; let it finish its transitions
            let _ = handle.task.await;
        }
        if self.state.get() == ConnectionState::Failed {
            self.state.apply(ConnectionEvent::Reset)?;
        }

        let backoff = self.config.backoff();
        let mut attempt: u32 = 0;
        loop {
            self.state.apply(ConnectionEvent::Connect)?;
            let mut attempt_guard = TransitionGuard::new(&self.state, ConnectionEvent::Fail);
            debug!(
                addr = %self.config.addr(),
                client_id = self.config.client_id,
                transport = self.transport.name(),
                attempt,
                "connecting to gateway"
            );

            let err = match tokio::time::timeout(self.config.connect_timeout(), self.handshake())
                .await
            {
                Ok(Ok((link, next_valid_id))) => {
                    attempt_guard.disarm();
                    self.state.apply(ConnectionEvent::HandshakeAck)?;
                    info!(
                        addr = %self.config.addr(),
                        client_id = self.config.client_id,
                        next_valid_id,
                        "connected to gateway"
                    );
                    *session = Some(self.spawn_session(link));
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_) => ConnectionError::HandshakeTimeout {
                    addr: self.config.addr(),
                    timeout_secs: self.config.connect_timeout_secs,
                },
            };

            attempt_guard.disarm();
            self.state.apply(ConnectionEvent::Fail)?;
            if !err.is_retryable() || attempt >= self.config.connect_retries {
                warn!(error = %err, attempts = attempt + 1, "gateway connection failed");
                return Err(err);
            }
            self.state.apply(ConnectionEvent::Reset)?;

            let delay = backoff.delay(attempt);
            attempt += 1;
            warn!(
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                attempt,
                "gateway connection attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn handshake(&self) -> Result<(Link, i64), ConnectionError> {
        let mut link = self.transport.open(&self.config).await?;
        let client_id = self.config.client_id;

        link.outbound
            .send(ClientMessage::StartApi { client_id })
            .await
            .map_err(|_| ConnectionError::Lost("link closed before START_API".to_string()))?;

        loop {
            match link.inbound.recv().await {
                Some(GatewayEvent::NextValidId(id)) => return Ok((link, id)),
                Some(GatewayEvent::ManagedAccounts(accounts)) => {
                    debug!(accounts = %accounts, "managed accounts");
                }
                Some(GatewayEvent::Error { code, .. }) if code == CLIENT_ID_IN_USE => {
                    return Err(ConnectionError::ClientIdInUse { client_id });
                }
                Some(GatewayEvent::Error { code, message, .. }) if wire::is_informational(code) => {
                    debug!(code, message = %message, "gateway notice during handshake");
                }
                Some(GatewayEvent::Error { code, message, .. }) => {
                    return Err(ConnectionError::HandshakeRejected(format!(
                        "{}: {}",
                        code, message
                    )));
                }
                Some(other) => trace!(event = ?other, "ignoring event during handshake"),
                None => {
                    return Err(ConnectionError::Refused {
                        addr: self.config.addr(),
                        reason: "gateway closed the connection during the handshake".to_string(),
                    })
                }
            }
        }
    }

    fn spawn_session(&self, link: Link) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let session = Session {
            link,
            commands: commands_rx,
            correlator: Correlator::new(),
            state: Arc::clone(&self.state),
        };
        SessionHandle {
            commands: commands_tx,
            task: tokio::spawn(session.run()),
        }
    }

    /// Register `request` under `id` and send it to the gateway.
    pub async fn submit(
        &self,
        id: CorrelationId,
        request: &HistoricalDataRequest,
        timeout: Duration,
    ) -> Result<PendingRequest, ConnectionError> {
        let session = self.session.lock().await;
        let state = self.state.get();
        let handle = match session.as_ref() {
            Some(handle) if state.is_connected() => handle,
            _ => return Err(ConnectionError::NotConnected(state)),
        };

        let (waiter, rx) = oneshot::channel();
        handle
            .commands
            .send(Command::Submit {
                id,
                request: request.clone(),
                timeout,
                waiter,
            })
            .map_err(|_| ConnectionError::Lost("session ended".to_string()))?;

        Ok(PendingRequest {
            id,
            rx,
            commands: handle.commands.clone(),
            finished: false,
        })
    }

    /// Best-effort cancel; unknown or already resolved ids are ignored.
    pub async fn cancel(&self, id: CorrelationId) {
        let session = self.session.lock().await;
        if let Some(handle) = session.as_ref() {
            let _ = handle.commands.send(Command::Cancel { id });
        }
    }

    /// Close the session. Outstanding requests fail with
    /// [`ConnectionError::Closed`]. No-op when not connected.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let mut session = self.session.lock().await;
        let Some(handle) = session.take() else {
            return Ok(());
        };

        if !self.state.get().is_connected() {
            let _ = handle.task.await;
            return Ok(());
        }

        self.state.apply(ConnectionEvent::Disconnect)?;
        let mut closing = TransitionGuard::new(&self.state, ConnectionEvent::Closed);
        let (done_tx, done_rx) = oneshot::channel();
        let _ = handle.commands.send(Command::Shutdown {
            done: Some(done_tx),
        });
        let _ = done_rx.await;
        let _ = handle.task.await;
        closing.disarm();
        self.state.apply(ConnectionEvent::Closed)?;
        info!(addr = %self.config.addr(), "disconnected from gateway");
        Ok(())
    }
}

impl Drop for GatewayConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.session.get_mut().take() {
            let _ = handle.commands.send(Command::Shutdown { done: None });
        }
    }
}

/// Applies `event` when dropped while armed.
///
/// Held across the awaits of `connect` and `disconnect` so a caller that
/// drops either future (for example through `tokio::time::timeout`) cannot
/// leave the state in `Connecting` or `Disconnecting`.
struct TransitionGuard<'a> {
    state: &'a StateCell,
    event: ConnectionEvent,
    armed: bool,
}

impl<'a> TransitionGuard<'a> {
    fn new(state: &'a StateCell, event: ConnectionEvent) -> Self {
        Self {
            state,
            event,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(event = %self.event, state = %self.state.get(), "connection call dropped mid-transition");
            let _ = self.state.apply(self.event);
        }
    }
}

/// A submitted request awaiting its resolution.
///
/// Dropping it before it resolves cancels the request.
pub struct PendingRequest {
    id: CorrelationId,
    rx: oneshot::Receiver<Resolution>,
    commands: mpsc::UnboundedSender<Command>,
    finished: bool,
}

impl PendingRequest {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub async fn wait(mut self) -> Resolution {
        let resolution = (&mut self.rx).await.unwrap_or_else(|_| {
            Err(RequestError::Connection(ConnectionError::Lost(
                "session ended before the request resolved".to_string(),
            )))
        });
        self.finished = true;
        resolution
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.commands.send(Command::Cancel { id: self.id });
        }
    }
}

enum Exit {
    Shutdown(Option<oneshot::Sender<()>>),
    Dropped,
    Lost(String),
}

struct Session {
    link: Link,
    commands: mpsc::UnboundedReceiver<Command>,
    correlator: Correlator,
    state: Arc<StateCell>,
}

impl Session {
    async fn run(mut self) {
        let exit = 'session: loop {
            let deadline = self.correlator.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Submit { id, request, timeout, waiter }) => {
                        if !self.correlator.register(id, request.clone(), timeout, waiter) {
                            continue;
                        }
                        debug!(req_id = %id, request = %request, "submitting historical data request");
                        let message = ClientMessage::RequestHistoricalData { req_id: id.0, request };
                        if self.link.outbound.send(message).await.is_err() {
                            break 'session Exit::Lost("outbound link closed".to_string());
                        }
                    }
                    Some(Command::Cancel { id }) => {
                        if self.correlator.cancel(id) {
                            debug!(req_id = %id, "cancelling historical data request");
                            let message = ClientMessage::CancelHistoricalData { req_id: id.0 };
                            if self.link.outbound.send(message).await.is_err() {
                                break 'session Exit::Lost("outbound link closed".to_string());
                            }
                        }
                    }
                    Some(Command::Shutdown { done: Some(done) }) => break 'session Exit::Shutdown(Some(done)),
                    Some(Command::Shutdown { done: None }) | None => break 'session Exit::Dropped,
                },
                event = self.link.inbound.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break 'session Exit::Lost("gateway closed the connection".to_string()),
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    for id in self.correlator.expire(Instant::now()) {
                        let message = ClientMessage::CancelHistoricalData { req_id: id.0 };
                        if self.link.outbound.send(message).await.is_err() {
                            break 'session Exit::Lost("outbound link closed".to_string());
                        }
                    }
                }
            }
        };

        let err = match exit {
            Exit::Shutdown(done) => {
                let failed = self.correlator.fail_all(&ConnectionError::Closed);
                debug!(failed, "session shut down");
                self.finish(&ConnectionError::Closed);
                // close the transport before reporting back
                drop(self.link);
                if let Some(done) = done {
                    let _ = done.send(());
                }
                return;
            }
            Exit::Dropped => {
                let _ = self.state.apply(ConnectionEvent::Disconnect);
                self.correlator.fail_all(&ConnectionError::Closed);
                self.finish(&ConnectionError::Closed);
                let _ = self.state.apply(ConnectionEvent::Closed);
                debug!("connection dropped, session shut down");
                return;
            }
            Exit::Lost(reason) => ConnectionError::Lost(reason),
        };

        // A concurrent disconnect may already have moved the state on.
        let lost = self.state.apply(ConnectionEvent::ConnectionLost).is_ok();
        let failed = self.correlator.fail_all(&err);
        self.finish(&err);
        warn!(error = %err, failed_requests = failed, "gateway connection lost");
        if lost {
            let _ = self.state.apply(ConnectionEvent::Reset);
        }
    }

    /// Fail submissions still queued behind the exit.
    fn finish(&mut self, err: &ConnectionError) {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Submit { waiter, .. } = command {
                let _ = waiter.send(Err(RequestError::Connection(err.clone())));
            }
        }
    }

    fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Bar { req_id, bar } => {
                self.correlator.on_bar(CorrelationId(req_id), bar);
            }
            GatewayEvent::DataEnd { req_id, start, end } => {
                self.correlator.on_end(CorrelationId(req_id), &start, &end);
            }
            GatewayEvent::Error {
                req_id,
                code,
                message,
            } => {
                if req_id == NO_REQUEST {
                    if wire::is_informational(code) {
                        info!(code, message = %message, "gateway notice");
                    } else {
                        warn!(code, message = %message, "gateway error");
                    }
                } else {
                    self.correlator.on_error(CorrelationId(req_id), code, &message);
                }
            }
            GatewayEvent::NextValidId(id) => trace!(next_valid_id = id, "next valid id"),
            GatewayEvent::ManagedAccounts(accounts) => {
                trace!(accounts = %accounts, "managed accounts")
            }
        }
    }
}
