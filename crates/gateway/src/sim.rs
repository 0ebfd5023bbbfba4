//! Simulated gateway.
//!
//! Speaks the same message set as TWS / IB Gateway, either in-process as a
//! [`Transport`] or over TCP via [`SimGateway::serve`]. Behaviour is
//! configured through the shared [`SimGatewayState`], which also records what
//! clients sent so tests can assert on it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use ibhist_model::{Bar, BarSize, HistoricalDataRequest};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{ConnectionError, WireError};
use crate::transport::{Link, Transport, LINK_CHANNEL_CAPACITY};
use crate::wire::{
    self, ClientMessage, GatewayEvent, ServerMessage, CLIENT_ID_IN_USE, MAX_CLIENT_VERSION,
    NO_REQUEST,
};

/// Protocol version the simulated gateway negotiates down to.
pub const SIM_SERVER_VERSION: u32 = MAX_CLIENT_VERSION;

/// How the gateway answers START_API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeBehavior {
    /// Send managed accounts and the next valid id.
    Ack,
    /// Accept the connection and never answer.
    Ignore,
    /// Refuse the connection outright.
    Refuse,
}

/// How the gateway answers a historical data request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryBehavior {
    /// Stream synthetic bars followed by the end marker.
    Respond,
    /// Answer with an error message for the request.
    Reject { code: i32, message: String },
    /// Never answer.
    Silent,
    /// Stream this many bars, then drop the whole connection.
    DropConnection { after_bars: usize },
}

/// A request as the gateway received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub client_id: Option<i32>,
    pub req_id: i64,
    pub request: HistoricalDataRequest,
}

/// Internal state for SimGateway, protected by a Mutex.
#[derive(Debug)]
pub struct SimGatewayState {
    pub handshake: HandshakeBehavior,
    /// Default behaviour for historical data requests.
    pub history: HistoryBehavior,
    /// Per-symbol overrides of `history`.
    pub symbol_overrides: HashMap<String, HistoryBehavior>,
    /// Last session of generated data unless the request names an end.
    pub end_date: NaiveDate,
    pub accounts: String,
    /// Client ids with a live acknowledged session.
    pub live_clients: HashSet<i32>,
    /// Log of historical data requests (for assertions).
    pub requests: Vec<RecordedRequest>,
    /// Log of cancel calls (request ids).
    pub cancels: Vec<i64>,
    /// Connections opened so far.
    pub connections: usize,
}

impl Default for SimGatewayState {
    fn default() -> Self {
        Self {
            handshake: HandshakeBehavior::Ack,
            history: HistoryBehavior::Respond,
            symbol_overrides: HashMap::new(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 19).unwrap_or_default(),
            accounts: "DU1234567".to_string(),
            live_clients: HashSet::new(),
            requests: Vec::new(),
            cancels: Vec::new(),
            connections: 0,
        }
    }
}

impl SimGatewayState {
    fn behavior_for(&self, symbol: &str) -> HistoryBehavior {
        self.symbol_overrides
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| self.history.clone())
    }
}

/// A simulated gateway.
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SimGateway {
    pub state: Arc<Mutex<SimGatewayState>>,
}

impl SimGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_handshake(&self, behavior: HandshakeBehavior) {
        self.state.lock().await.handshake = behavior;
    }

    pub async fn set_history(&self, behavior: HistoryBehavior) {
        self.state.lock().await.history = behavior;
    }

    pub async fn set_symbol_behavior(&self, symbol: &str, behavior: HistoryBehavior) {
        self.state
            .lock()
            .await
            .symbol_overrides
            .insert(symbol.to_ascii_uppercase(), behavior);
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn cancels(&self) -> Vec<i64> {
        self.state.lock().await.cancels.clone()
    }

    pub async fn live_clients(&self) -> HashSet<i32> {
        self.state.lock().await.live_clients.clone()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections
    }

    /// Accept TCP clients until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(peer = %peer, "simulated gateway accepted connection");
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                if let Err(e) = serve_tcp(state, stream).await {
                    warn!(peer = %peer, error = %e, "simulated gateway connection failed");
                }
            });
        }
    }
}

#[async_trait]
impl Transport for SimGateway {
    async fn open(&self, config: &GatewayConfig) -> Result<Link, ConnectionError> {
        {
            let mut state = self.state.lock().await;
            state.connections += 1;
            if state.handshake == HandshakeBehavior::Refuse {
                return Err(ConnectionError::Refused {
                    addr: config.addr(),
                    reason: "simulated gateway refused the connection".to_string(),
                });
            }
        }

        let (out_tx, out_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        tokio::spawn(run_session(Arc::clone(&self.state), out_rx, in_tx));
        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    fn name(&self) -> &'static str {
        "sim"
    }
}

async fn serve_tcp(state: Arc<Mutex<SimGatewayState>>, stream: TcpStream) -> Result<(), WireError> {
    stream.set_nodelay(true)?;
    let (mut read, mut write) = stream.into_split();

    let (_min, max) = wire::read_client_hello(&mut read).await?;
    {
        let mut state = state.lock().await;
        state.connections += 1;
        if state.handshake == HandshakeBehavior::Refuse {
            return Ok(());
        }
    }
    let version = max.min(SIM_SERVER_VERSION);
    wire::write_frame(&mut write, &wire::encode_server_hello(version, "20240119 09:00:00 EST"))
        .await?;

    let (client_tx, client_rx) = mpsc::channel::<ClientMessage>(LINK_CHANNEL_CAPACITY);
    let (event_tx, mut event_rx) = mpsc::channel::<GatewayEvent>(LINK_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        while let Ok(Some(frame)) = wire::read_frame(&mut read).await {
            match ClientMessage::decode(&frame) {
                Ok(Some(message)) => {
                    if client_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "simulated gateway dropped malformed frame"),
            }
        }
    });

    // Bars go out in one HISTORICAL_DATA message per request, like the real
    // gateway does.
    let writer = tokio::spawn(async move {
        let mut buffered: HashMap<i64, Vec<Bar>> = HashMap::new();
        while let Some(event) = event_rx.recv().await {
            let message = match event {
                GatewayEvent::Bar { req_id, bar } => {
                    buffered.entry(req_id).or_default().push(bar);
                    continue;
                }
                GatewayEvent::DataEnd { req_id, start, end } => ServerMessage::HistoricalData {
                    req_id,
                    start,
                    end,
                    bars: buffered.remove(&req_id).unwrap_or_default(),
                },
                GatewayEvent::NextValidId(id) => ServerMessage::NextValidId(id),
                GatewayEvent::ManagedAccounts(accounts) => ServerMessage::ManagedAccounts(accounts),
                GatewayEvent::Error {
                    req_id,
                    code,
                    message,
                } => ServerMessage::Error {
                    req_id,
                    code,
                    message,
                },
            };
            if wire::write_frame(&mut write, &message.encode()).await.is_err() {
                break;
            }
        }
    });

    run_session(state, client_rx, event_tx).await;
    let _ = writer.await;
    Ok(())
}

struct Stream {
    req_id: i64,
    bars: VecDeque<Bar>,
    start: String,
    end: String,
    drop_after: Option<usize>,
    sent: usize,
}

/// One client session: answers the handshake and streams bars for every
/// active request round-robin, one event at a time.
async fn run_session(
    state: Arc<Mutex<SimGatewayState>>,
    mut rx: mpsc::Receiver<ClientMessage>,
    tx: mpsc::Sender<GatewayEvent>,
) {
    let mut client_id: Option<i32> = None;
    let mut streams: VecDeque<Stream> = VecDeque::new();

    'session: loop {
        tokio::select! {
            biased;

            message = rx.recv() => {
                let Some(message) = message else {
                    debug!(client_id = ?client_id, "client closed the connection");
                    break 'session;
                };
                let mut state = state.lock().await;
                match message {
                    ClientMessage::StartApi { client_id: id } => match state.handshake.clone() {
                        HandshakeBehavior::Ack if state.live_clients.contains(&id) => {
                            info!(client_id = id, "rejecting duplicate client id");
                            let _ = tx
                                .send(GatewayEvent::Error {
                                    req_id: NO_REQUEST,
                                    code: CLIENT_ID_IN_USE,
                                    message: "Unable to connect as the client id is already in use. Retry with a unique client id.".to_string(),
                                })
                                .await;
                            break 'session;
                        }
                        HandshakeBehavior::Ack => {
                            state.live_clients.insert(id);
                            client_id = Some(id);
                            let accounts = state.accounts.clone();
                            drop(state);
                            if tx.send(GatewayEvent::ManagedAccounts(accounts)).await.is_err()
                                || tx.send(GatewayEvent::NextValidId(1)).await.is_err()
                            {
                                break 'session;
                            }
                        }
                        HandshakeBehavior::Ignore | HandshakeBehavior::Refuse => {
                            debug!(client_id = id, "ignoring START_API");
                        }
                    },
                    ClientMessage::RequestHistoricalData { req_id, request } => {
                        let behavior = state.behavior_for(request.symbol());
                        state.requests.push(RecordedRequest {
                            client_id,
                            req_id,
                            request: request.clone(),
                        });
                        let end_date = state.end_date;
                        drop(state);
                        debug!(req_id, request = %request, behavior = ?behavior, "historical data request");

                        match behavior {
                            HistoryBehavior::Respond | HistoryBehavior::DropConnection { .. } => {
                                let bars = synthetic_bars(&request, end_date);
                                let (start, end) = span_of(&bars);
                                let drop_after = match behavior {
                                    HistoryBehavior::DropConnection { after_bars } => Some(after_bars),
                                    _ => None,
                                };
                                streams.push_back(Stream {
                                    req_id,
                                    bars: bars.into(),
                                    start,
                                    end,
                                    drop_after,
                                    sent: 0,
                                });
                            }
                            HistoryBehavior::Reject { code, message } => {
                                if tx.send(GatewayEvent::Error { req_id, code, message }).await.is_err() {
                                    break 'session;
                                }
                            }
                            HistoryBehavior::Silent => {}
                        }
                    }
                    ClientMessage::CancelHistoricalData { req_id } => {
                        state.cancels.push(req_id);
                        streams.retain(|s| s.req_id != req_id);
                        debug!(req_id, "historical data request cancelled");
                    }
                }
            }

            permit = tx.reserve(), if !streams.is_empty() => {
                let Ok(permit) = permit else {
                    break 'session;
                };
                let Some(mut stream) = streams.pop_front() else {
                    continue;
                };
                if let Some(limit) = stream.drop_after {
                    if stream.sent >= limit || stream.bars.is_empty() {
                        info!(req_id = stream.req_id, bars_sent = stream.sent, "dropping connection");
                        break 'session;
                    }
                }
                match stream.bars.pop_front() {
                    Some(bar) => {
                        permit.send(GatewayEvent::Bar { req_id: stream.req_id, bar });
                        stream.sent += 1;
                        streams.push_back(stream);
                    }
                    None => permit.send(GatewayEvent::DataEnd {
                        req_id: stream.req_id,
                        start: stream.start,
                        end: stream.end,
                    }),
                }
            }
        }
    }

    if let Some(id) = client_id {
        state.lock().await.live_clients.remove(&id);
    }
}

/// Session hours in seconds after midnight.
fn session_hours(use_rth: bool) -> (u32, u32) {
    if use_rth {
        (9 * 3_600 + 30 * 60, 16 * 3_600)
    } else {
        (4 * 3_600, 20 * 3_600)
    }
}

/// The `count` weekdays ending at `end` (inclusive), oldest first.
fn trading_days(end: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(count);
    let mut day = end;
    while days.len() < count {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(day);
        }
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    days.reverse();
    days
}

fn symbol_seed(symbol: &str) -> u64 {
    symbol
        .bytes()
        .fold(17u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Deterministic bars for `request`, ascending by time.
///
/// Intraday bars cover the regular session (09:30-16:00) on weekdays, or
/// 04:00-20:00 when `use_rth` is off; one trading day at 5-minute bars gives
/// 78 bars. Daily and longer bars are stamped with a date only.
pub fn synthetic_bars(request: &HistoricalDataRequest, default_end: NaiveDate) -> Vec<Bar> {
    let end = request
        .end_date_time()
        .and_then(|s| s.get(..8))
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y%m%d").ok())
        .unwrap_or(default_end);
    let days = trading_days(end, request.duration().trading_days() as usize);

    let mut stamps: Vec<String> = Vec::new();
    let bar_size = request.bar_size();
    if bar_size.is_daily_or_longer() {
        let step = match bar_size {
            BarSize::Week1 => 5,
            BarSize::Month1 => 21,
            _ => 1,
        };
        stamps.extend(days.iter().step_by(step).map(|d| d.format("%Y%m%d").to_string()));
    } else {
        let (open, close) = session_hours(request.use_rth());
        let width = bar_size.seconds() as u32;
        for day in &days {
            let date = day.format("%Y%m%d");
            let mut t = open;
            while t < close {
                stamps.push(format!(
                    "{} {:02}:{:02}:{:02}",
                    date,
                    t / 3_600,
                    (t % 3_600) / 60,
                    t % 60
                ));
                t += width;
            }
        }
    }

    let seed = symbol_seed(request.symbol());
    let base = 20.0 + (seed % 480) as f64;
    let price = |i: usize| base * (1.0 + 0.02 * (i as f64 / 9.0).sin() + 0.0005 * (i % 13) as f64);
    let trade_based = request.data_type().is_trade_based();

    stamps
        .into_iter()
        .enumerate()
        .map(|(i, time)| {
            let open = round2(price(i));
            let close = round2(price(i + 1));
            let high = round2(open.max(close) + 0.05);
            let low = round2(open.min(close) - 0.05);
            if trade_based {
                let volume = 100 * (5 + ((seed + i as u64) % 40) as i64);
                let wap = round2((open + high + low + close) / 4.0);
                Bar::new(time, open, high, low, close, volume).with_trade_stats(wap, 5 + (i % 40) as i64)
            } else {
                Bar::new(time, open, high, low, close, -1)
            }
        })
        .collect()
}

fn span_of(bars: &[Bar]) -> (String, String) {
    match (bars.first(), bars.last()) {
        (Some(first), Some(last)) => (first.time.clone(), last.time.clone()),
        _ => (String::new(), String::new()),
    }
}
