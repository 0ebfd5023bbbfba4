//! IB API wire codec.
//!
//! After the `API\0` prefix and version negotiation every message is a frame:
//! a 4-byte big-endian length followed by NUL-terminated text fields, the
//! first of which is the message id.

use std::fmt::Display;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use ibhist_model::{AssetType, Bar, HistoricalDataRequest};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;

pub const API_PREFIX: &[u8] = b"API\0";
pub const MIN_CLIENT_VERSION: u32 = 100;
pub const MAX_CLIENT_VERSION: u32 = 176;
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// outgoing
pub const REQ_HISTORICAL_DATA: i32 = 20;
pub const CANCEL_HISTORICAL_DATA: i32 = 25;
pub const START_API: i32 = 71;

// incoming
pub const ERR_MSG: i32 = 4;
pub const NEXT_VALID_ID: i32 = 9;
pub const MANAGED_ACCTS: i32 = 15;
pub const HISTORICAL_DATA: i32 = 17;
pub const HISTORICAL_DATA_END: i32 = 108;

/// Error code the gateway sends when the client id is taken.
pub const CLIENT_ID_IN_USE: i32 = 326;
/// Error code for a request the gateway stopped serving (timeout, pacing).
pub const QUERY_CANCELLED: i32 = 366;
/// Error code for an unknown or unsupported instrument.
pub const NO_SECURITY_DEFINITION: i32 = 200;
/// Error code for a historical data query that produced nothing.
pub const HISTORICAL_DATA_ERROR: i32 = 162;

/// Status notices (market data farm connected, connectivity restored, ...)
/// that never fail a request.
pub fn is_informational(code: i32) -> bool {
    matches!(code, 2100..=2199 | 1100..=1102)
}

/// Request id the gateway uses for errors that belong to no request.
pub const NO_REQUEST: i64 = -1;

/// What a transport delivers to the session, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    NextValidId(i64),
    ManagedAccounts(String),
    Bar { req_id: i64, bar: Bar },
    DataEnd { req_id: i64, start: String, end: String },
    Error { req_id: i64, code: i32, message: String },
}

/// What the session sends to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    StartApi { client_id: i32 },
    RequestHistoricalData { req_id: i64, request: HistoricalDataRequest },
    CancelHistoricalData { req_id: i64 },
}

/// Incoming message as framed on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    NextValidId(i64),
    ManagedAccounts(String),
    Error { req_id: i64, code: i32, message: String },
    HistoricalData { req_id: i64, start: String, end: String, bars: Vec<Bar> },
    HistoricalDataEnd { req_id: i64, start: String, end: String },
}

struct FieldWriter {
    buf: BytesMut,
}

impl FieldWriter {
    fn new(msg_id: i32) -> Self {
        let mut writer = Self {
            buf: BytesMut::with_capacity(128),
        };
        writer.push(msg_id);
        writer
    }

    fn push(&mut self, value: impl Display) -> &mut Self {
        self.buf.put_slice(value.to_string().as_bytes());
        self.buf.put_u8(0);
        self
    }

    fn push_opt<T: Display>(&mut self, value: Option<T>) -> &mut Self {
        match value {
            Some(v) => self.push(v),
            None => self.push(""),
        }
    }

    fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

struct FieldReader<'a> {
    fields: std::slice::Iter<'a, String>,
}

impl<'a> FieldReader<'a> {
    fn new(fields: &'a [String]) -> Self {
        Self {
            fields: fields.iter(),
        }
    }

    fn str(&mut self, field: &'static str) -> Result<&'a str, WireError> {
        self.fields
            .next()
            .map(String::as_str)
            .ok_or(WireError::Truncated(field))
    }

    fn parse<T: FromStr>(&mut self, field: &'static str) -> Result<T, WireError> {
        let raw = self.str(field)?;
        raw.trim().parse().map_err(|_| WireError::InvalidField {
            field,
            value: raw.to_string(),
        })
    }

    /// Empty string means "unset".
    fn opt<T: FromStr>(&mut self, field: &'static str) -> Result<Option<T>, WireError> {
        let raw = self.str(field)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        raw.trim().parse().map(Some).map_err(|_| WireError::InvalidField {
            field,
            value: raw.to_string(),
        })
    }

    fn skip(&mut self, field: &'static str) -> Result<(), WireError> {
        self.str(field).map(|_| ())
    }

    /// Volumes arrive as integers from older servers and decimals from newer ones.
    fn volume(&mut self) -> Result<i64, WireError> {
        let raw = self.str("volume")?.trim();
        raw.parse::<i64>()
            .or_else(|_| raw.parse::<f64>().map(|v| v.round() as i64))
            .map_err(|_| WireError::InvalidField {
                field: "volume",
                value: raw.to_string(),
            })
    }
}

/// Split a frame payload into its NUL-terminated fields.
pub fn split_fields(payload: &[u8]) -> Vec<String> {
    let payload = payload.strip_suffix(&[0]).unwrap_or(payload);
    if payload.is_empty() {
        return Vec::new();
    }
    payload
        .split(|b| *b == 0)
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

impl ClientMessage {
    pub fn encode(&self) -> Bytes {
        match self {
            ClientMessage::StartApi { client_id } => {
                let mut w = FieldWriter::new(START_API);
                w.push(2).push(client_id).push("");
                w.finish()
            }
            ClientMessage::CancelHistoricalData { req_id } => {
                let mut w = FieldWriter::new(CANCEL_HISTORICAL_DATA);
                w.push(1).push(req_id);
                w.finish()
            }
            ClientMessage::RequestHistoricalData { req_id, request } => {
                let derivative = request.asset_type().is_derivative();
                let mut w = FieldWriter::new(REQ_HISTORICAL_DATA);
                w.push(req_id)
                    .push(0) // conId
                    .push(request.symbol())
                    .push(request.asset_type())
                    .push_opt(request.expiry())
                    .push(request.strike().unwrap_or(0.0))
                    .push_opt(request.right())
                    .push("") // multiplier
                    .push(request.exchange())
                    .push("") // primaryExchange
                    .push(request.currency())
                    .push("") // localSymbol
                    .push("") // tradingClass
                    .push(flag(derivative))
                    .push(request.end_date_time().unwrap_or(""))
                    .push(request.bar_size())
                    .push(request.duration())
                    .push(flag(request.use_rth()))
                    .push(request.data_type())
                    .push(1) // formatDate: yyyyMMdd HH:mm:ss
                    .push(0) // keepUpToDate
                    .push("");
                w.finish()
            }
        }
    }

    /// Decode a client frame. Unknown message ids yield `Ok(None)`.
    pub fn decode(payload: &[u8]) -> Result<Option<Self>, WireError> {
        let fields = split_fields(payload);
        let mut r = FieldReader::new(&fields);
        let msg_id: i32 = r.parse("message id")?;

        let message = match msg_id {
            START_API => {
                r.skip("version")?;
                ClientMessage::StartApi {
                    client_id: r.parse("client id")?,
                }
            }
            CANCEL_HISTORICAL_DATA => {
                r.skip("version")?;
                ClientMessage::CancelHistoricalData {
                    req_id: r.parse("request id")?,
                }
            }
            REQ_HISTORICAL_DATA => {
                let req_id = r.parse("request id")?;
                r.skip("contract id")?;
                let symbol = r.str("symbol")?;
                let asset_type: AssetType = r.parse("security type")?;
                let expiry = r.str("expiry")?;
                let strike: f64 = r.parse("strike")?;
                let right = r.str("right")?;
                r.skip("multiplier")?;
                let exchange = r.str("exchange")?;
                r.skip("primary exchange")?;
                let currency = r.str("currency")?;
                r.skip("local symbol")?;
                r.skip("trading class")?;
                r.skip("include expired")?;
                let end = r.str("end date time")?;
                let bar_size = r.parse("bar size")?;
                let duration = r.parse("duration")?;
                let use_rth: u8 = r.parse("use rth")?;
                let data_type = r.parse("what to show")?;

                let mut builder = HistoricalDataRequest::builder(symbol)
                    .asset_type(asset_type)
                    .exchange(exchange)
                    .currency(currency)
                    .bar_size(bar_size)
                    .duration(duration)
                    .data_type(data_type)
                    .use_rth(use_rth != 0);
                if !end.is_empty() {
                    builder = builder.end_date_time(end);
                }
                if !expiry.is_empty() {
                    builder = builder.expiry(expiry);
                }
                if strike > 0.0 {
                    builder = builder.strike(strike);
                }
                if !right.is_empty() {
                    builder = builder.right(right.parse().map_err(|_| WireError::InvalidField {
                        field: "right",
                        value: right.to_string(),
                    })?);
                }
                let request = builder.build().map_err(|e| WireError::InvalidField {
                    field: "historical data request",
                    value: e.to_string(),
                })?;
                ClientMessage::RequestHistoricalData { req_id, request }
            }
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Bytes {
        match self {
            ServerMessage::NextValidId(id) => {
                let mut w = FieldWriter::new(NEXT_VALID_ID);
                w.push(1).push(id);
                w.finish()
            }
            ServerMessage::ManagedAccounts(accounts) => {
                let mut w = FieldWriter::new(MANAGED_ACCTS);
                w.push(1).push(accounts);
                w.finish()
            }
            ServerMessage::Error {
                req_id,
                code,
                message,
            } => {
                let mut w = FieldWriter::new(ERR_MSG);
                w.push(2).push(req_id).push(code).push(message);
                w.finish()
            }
            ServerMessage::HistoricalData {
                req_id,
                start,
                end,
                bars,
            } => {
                let mut w = FieldWriter::new(HISTORICAL_DATA);
                w.push(req_id).push(start).push(end).push(bars.len());
                for bar in bars {
                    w.push(&bar.time)
                        .push(bar.open)
                        .push(bar.high)
                        .push(bar.low)
                        .push(bar.close)
                        .push(bar.volume)
                        .push(bar.wap.unwrap_or(-1.0))
                        .push(bar.bar_count.unwrap_or(-1));
                }
                w.finish()
            }
            ServerMessage::HistoricalDataEnd { req_id, start, end } => {
                let mut w = FieldWriter::new(HISTORICAL_DATA_END);
                w.push(req_id).push(start).push(end);
                w.finish()
            }
        }
    }

    /// Decode a server frame. Unknown message ids yield `Ok(None)`.
    pub fn decode(payload: &[u8]) -> Result<Option<Self>, WireError> {
        let fields = split_fields(payload);
        let mut r = FieldReader::new(&fields);
        let msg_id: i32 = r.parse("message id")?;

        let message = match msg_id {
            NEXT_VALID_ID => {
                r.skip("version")?;
                ServerMessage::NextValidId(r.parse("order id")?)
            }
            MANAGED_ACCTS => {
                r.skip("version")?;
                ServerMessage::ManagedAccounts(r.str("accounts")?.to_string())
            }
            ERR_MSG => {
                r.skip("version")?;
                ServerMessage::Error {
                    req_id: r.parse("request id")?,
                    code: r.parse("error code")?,
                    message: r.str("error message")?.to_string(),
                }
            }
            HISTORICAL_DATA => {
                let req_id = r.parse("request id")?;
                let start = r.str("start date")?.to_string();
                let end = r.str("end date")?.to_string();
                let count: usize = r.parse("bar count")?;
                let mut bars = Vec::with_capacity(count.min(10_000));
                for _ in 0..count {
                    let time = r.str("bar date")?;
                    let open = r.parse("open")?;
                    let high = r.parse("high")?;
                    let low = r.parse("low")?;
                    let close = r.parse("close")?;
                    let volume = r.volume()?;
                    let wap: Option<f64> = r.opt("wap")?;
                    let bar_count: Option<i64> = r.opt("bar count")?;
                    bars.push(
                        Bar::new(time, open, high, low, close, volume)
                            .with_trade_stats(wap.unwrap_or(-1.0), bar_count.unwrap_or(-1)),
                    );
                }
                ServerMessage::HistoricalData {
                    req_id,
                    start,
                    end,
                    bars,
                }
            }
            HISTORICAL_DATA_END => ServerMessage::HistoricalDataEnd {
                req_id: r.parse("request id")?,
                start: r.str("start date")?.to_string(),
                end: r.str("end date")?.to_string(),
            },
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// Flatten into the per-bar event stream the session consumes.
    ///
    /// A complete `HISTORICAL_DATA` message is followed by its own end marker.
    pub fn into_events(self) -> Vec<GatewayEvent> {
        match self {
            ServerMessage::NextValidId(id) => vec![GatewayEvent::NextValidId(id)],
            ServerMessage::ManagedAccounts(accounts) => {
                vec![GatewayEvent::ManagedAccounts(accounts)]
            }
            ServerMessage::Error {
                req_id,
                code,
                message,
            } => vec![GatewayEvent::Error {
                req_id,
                code,
                message,
            }],
            ServerMessage::HistoricalData {
                req_id,
                start,
                end,
                bars,
            } => {
                let mut events: Vec<GatewayEvent> = bars
                    .into_iter()
                    .map(|bar| GatewayEvent::Bar { req_id, bar })
                    .collect();
                events.push(GatewayEvent::DataEnd { req_id, start, end });
                events
            }
            ServerMessage::HistoricalDataEnd { req_id, start, end } => {
                vec![GatewayEvent::DataEnd { req_id, start, end }]
            }
        }
    }
}

/// Read one frame. `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf.freeze()))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(payload.len()));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Client side of version negotiation: `API\0` plus the supported range.
pub async fn write_client_hello<W>(writer: &mut W) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(API_PREFIX).await?;
    let range = format!("v{}..{}", MIN_CLIENT_VERSION, MAX_CLIENT_VERSION);
    write_frame(writer, range.as_bytes()).await
}

/// Server side of version negotiation. Returns the client's `(min, max)`.
pub async fn read_client_hello<R>(reader: &mut R) -> Result<(u32, u32), WireError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    if prefix != API_PREFIX {
        return Err(WireError::InvalidField {
            field: "api prefix",
            value: String::from_utf8_lossy(&prefix).into_owned(),
        });
    }
    let frame = read_frame(reader)
        .await?
        .ok_or(WireError::Truncated("version range"))?;
    let text = String::from_utf8_lossy(&frame).into_owned();
    let invalid = || WireError::InvalidField {
        field: "version range",
        value: text.clone(),
    };
    let (min, max) = text
        .strip_prefix('v')
        .and_then(|range| range.split_once(".."))
        .ok_or_else(invalid)?;
    let min = min.parse().map_err(|_| invalid())?;
    let max = max.parse().map_err(|_| invalid())?;
    Ok((min, max))
}

pub fn encode_server_hello(server_version: u32, connection_time: &str) -> Bytes {
    let mut buf = BytesMut::new();
    for field in [server_version.to_string().as_str(), connection_time] {
        buf.put_slice(field.as_bytes());
        buf.put_u8(0);
    }
    buf.freeze()
}

/// Parse the server's reply to the client hello: `(server_version, connection_time)`.
pub fn decode_server_hello(payload: &[u8]) -> Result<(u32, String), WireError> {
    let fields = split_fields(payload);
    let mut r = FieldReader::new(&fields);
    let version = r.parse("server version")?;
    let time = r.str("connection time").unwrap_or_default().to_string();
    Ok((version, time))
}
