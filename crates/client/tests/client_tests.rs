//! Integration tests for HistoricalDataClient against the simulated gateway.
//!
//! Covers the end-to-end fetch path, validation before I/O, per-request
//! timeouts, connection loss, processor selection, scoped sessions, CSV
//! output and the blocking facade.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ibhist::{
    BarProcessor, BlockingClient, ConnectionState, DataType, Error, ErrorKind, GatewayConfig,
    HistoricalDataClient, HistoricalDataRequest, ProcessorRegistry, RequestParams, Row,
    TradesProcessor, Value,
};
use ibhist_gateway::sim::synthetic_bars;
use ibhist_gateway::{ConnectionError, HandshakeBehavior, HistoryBehavior, SimGateway};
use ibhist_model::{Bar, BarSize, HistoryDuration};

fn client(sim: &SimGateway) -> HistoricalDataClient {
    HistoricalDataClient::with_transport(GatewayConfig::default(), Arc::new(sim.clone())).unwrap()
}

fn client_with_registry(sim: &SimGateway, registry: Arc<ProcessorRegistry>) -> HistoricalDataClient {
    HistoricalDataClient::builder(GatewayConfig::default())
        .transport(Arc::new(sim.clone()))
        .registry(registry)
        .build()
        .unwrap()
}

fn aapl() -> HistoricalDataRequest {
    HistoricalDataRequest::builder("AAPL")
        .duration(HistoryDuration::Day1)
        .bar_size(BarSize::Min5)
        .data_type(DataType::Trades)
        .build()
        .unwrap()
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Tags every row with a fixed label.
struct Tagging(&'static str, DataType);

impl BarProcessor for Tagging {
    fn data_type(&self) -> DataType {
        self.1
    }

    fn columns(&self) -> Vec<String> {
        vec!["date".to_string(), "tag".to_string()]
    }

    fn process(&self, bars: &[Bar]) -> Vec<Row> {
        bars.iter()
            .map(|b| Row::new().with("date", b.time.as_str()).with("tag", self.0))
            .collect()
    }
}

// =============================================================================
// Fetching
// =============================================================================

#[tokio::test]
async fn test_one_day_of_five_minute_trades() {
    let sim = SimGateway::new();
    let client = client(&sim);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let response = client.get_historical_data(&aapl()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    assert_eq!(response.rows.len(), 78);
    assert_eq!(response.meta.row_count, 78);
    assert_eq!(response.columns, TradesProcessor.columns());

    let dates: Vec<String> = response
        .rows
        .iter()
        .map(|r| r.get("date").unwrap().to_string())
        .collect();
    assert!(dates.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(dates[0], "20240119 09:30:00");
    assert_eq!(dates[77], "20240119 15:55:00");
    assert_eq!(response.meta.start.as_deref(), Some("20240119 09:30:00"));

    for row in &response.rows {
        let low = row.get("low").and_then(Value::as_f64).unwrap();
        let high = row.get("high").and_then(Value::as_f64).unwrap();
        assert!(low <= high);
    }
}

#[tokio::test]
async fn test_fetch_validates_before_connecting() {
    let sim = SimGateway::new();
    let client = client(&sim);

    let params = RequestParams {
        asset_type: Some("OPT".into()),
        strike: Some("185".into()),
        right: Some("C".into()),
        ..RequestParams::new("AAPL")
    };
    let err = client.fetch(&params).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("expiry"), "{}", err);

    assert_eq!(client.transition_count(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(sim.connection_count().await, 0);
}

#[tokio::test]
async fn test_fetch_from_raw_params() {
    let sim = SimGateway::new();
    let client = client(&sim);

    let params = RequestParams {
        duration: Some("1 W".into()),
        bar_size: Some("1 day".into()),
        ..RequestParams::new("msft")
    };
    let response = client.fetch(&params).await.unwrap();
    assert_eq!(response.request.symbol(), "MSFT");
    assert_eq!(response.rows.len(), 5);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_session() {
    let sim = SimGateway::new();
    let client = client(&sim);
    let msft = HistoricalDataRequest::builder("MSFT").build().unwrap();

    let aapl = aapl();
    let (a, m) = tokio::join!(
        client.get_historical_data(&aapl),
        client.get_historical_data(&msft)
    );
    let (a, m) = (a.unwrap(), m.unwrap());

    let end = sim.state.lock().await.end_date;
    let closes = |bars: Vec<Bar>| -> Vec<Value> { bars.iter().map(|b| Value::Float(b.close)).collect() };
    let got = |rows: &[Row]| -> Vec<Value> { rows.iter().map(|r| r.get("close").cloned().unwrap()).collect() };
    assert_eq!(got(&a.rows), closes(synthetic_bars(&aapl, end)));
    assert_eq!(got(&m.rows), closes(synthetic_bars(&msft, end)));
    assert_eq!(sim.connection_count().await, 1);
}

#[tokio::test]
async fn test_gateway_rejection_is_a_data_request_error() {
    let sim = SimGateway::new();
    sim.set_symbol_behavior(
        "NOPE",
        HistoryBehavior::Reject {
            code: 200,
            message: "No security definition has been found for the request".into(),
        },
    )
    .await;
    let client = client(&sim);

    let request = HistoricalDataRequest::builder("NOPE").build().unwrap();
    let err = client.get_historical_data(&request).await.unwrap_err();
    assert!(matches!(err, Error::DataRequest { code: Some(200), .. }), "{:?}", err);
    assert_eq!(client.state(), ConnectionState::Connected);
}

// =============================================================================
// Timeouts and connection loss
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_silent_gateway_times_out() {
    let sim = SimGateway::new();
    sim.set_history(HistoryBehavior::Silent).await;
    let client = client(&sim);

    let err = client
        .get_historical_data_with_timeout(&aapl(), Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Timeout { timeout } if timeout == Duration::from_secs(10)),
        "{:?}",
        err
    );
    assert_eq!(err.to_string(), "request timed out after 10s");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(client.state(), ConnectionState::Connected);

    eventually(|| {
        let sim = sim.clone();
        async move { sim.cancels().await.len() == 1 }
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_request_abandoned_during_handshake_can_be_retried() {
    let sim = SimGateway::new();
    sim.set_handshake(HandshakeBehavior::Ignore).await;
    let client = client(&sim);
    let aapl = aapl();

    let abandoned =
        tokio::time::timeout(Duration::from_secs(1), client.get_historical_data(&aapl)).await;
    assert!(abandoned.is_err());
    assert_eq!(client.state(), ConnectionState::Failed);

    sim.set_handshake(HandshakeBehavior::Ack).await;
    let response = client.get_historical_data(&aapl).await.unwrap();
    assert_eq!(response.rows.len(), 78);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connection_drop_fails_outstanding_requests() {
    let sim = SimGateway::new();
    sim.set_symbol_behavior("AAPL", HistoryBehavior::Silent).await;
    sim.set_symbol_behavior("MSFT", HistoryBehavior::DropConnection { after_bars: 3 })
        .await;
    let client = client(&sim);
    let msft = HistoricalDataRequest::builder("MSFT").build().unwrap();

    let aapl = aapl();
    let (a, m) = tokio::join!(
        client.get_historical_data(&aapl),
        client.get_historical_data(&msft)
    );
    for result in [a, m] {
        assert!(
            matches!(result, Err(Error::Connection(ConnectionError::Lost(_)))),
            "{:?}",
            result.map(|r| r.rows.len())
        );
    }

    let mut states = client.watch_state();
    states
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();

    // the next request reconnects
    let ibm = HistoricalDataRequest::builder("IBM").build().unwrap();
    let response = client.get_historical_data(&ibm).await.unwrap();
    assert_eq!(response.rows.len(), 78);
    assert_eq!(sim.connection_count().await, 2);
}

// =============================================================================
// Processors
// =============================================================================

#[tokio::test]
async fn test_last_registered_processor_shapes_response() {
    let sim = SimGateway::new();
    let client = client_with_registry(&sim, Arc::new(ProcessorRegistry::with_defaults()));

    client.register_processor(DataType::Trades, Arc::new(Tagging("first", DataType::Trades)));
    client.register_processor(DataType::Trades, Arc::new(Tagging("second", DataType::Trades)));

    let response = client.get_historical_data(&aapl()).await.unwrap();
    assert_eq!(response.columns, vec!["date", "tag"]);
    assert!(response
        .rows
        .iter()
        .all(|r| r.get("tag") == Some(&Value::from("second"))));
}

#[tokio::test]
async fn test_unregistered_data_type_passes_bars_through() {
    let sim = SimGateway::new();
    let client = client_with_registry(&sim, Arc::new(ProcessorRegistry::new()));

    let request = HistoricalDataRequest::builder("AAPL")
        .data_type(DataType::Bid)
        .build()
        .unwrap();
    let response = client.get_historical_data(&request).await.unwrap();

    let bars = synthetic_bars(&request, sim.state.lock().await.end_date);
    assert_eq!(response.rows.len(), bars.len());
    assert_eq!(
        response.columns,
        vec!["date", "open", "high", "low", "close", "volume", "wap", "bar_count"]
    );
    for (row, bar) in response.rows.iter().zip(&bars) {
        assert_eq!(row.get("open"), Some(&Value::Float(bar.open)));
        assert_eq!(row.get("volume"), Some(&Value::Int(bar.volume)));
    }
}

#[tokio::test]
async fn test_global_registration_reaches_default_clients() {
    let sim = SimGateway::new();
    let client = client(&sim);

    ibhist::register_processor(
        DataType::AdjustedLast,
        Arc::new(Tagging("global", DataType::AdjustedLast)),
    );

    let request = HistoricalDataRequest::builder("AAPL")
        .duration(HistoryDuration::Week1)
        .bar_size(BarSize::Day1)
        .data_type(DataType::AdjustedLast)
        .build()
        .unwrap();
    let response = client.get_historical_data(&request).await.unwrap();
    assert_eq!(response.rows.len(), 5);
    assert_eq!(response.rows[0].get("tag"), Some(&Value::from("global")));
}

// =============================================================================
// Scoped sessions and output
// =============================================================================

#[tokio::test]
async fn test_scoped_disconnects_after_success_and_error() {
    let sim = SimGateway::new();
    sim.set_symbol_behavior(
        "NOPE",
        HistoryBehavior::Reject {
            code: 162,
            message: "HMDS query returned no data".into(),
        },
    )
    .await;
    let client = client(&sim);

    let request = aapl();
    let rows = client
        .scoped(move |c| {
            Box::pin(async move { Ok(c.get_historical_data(&request).await?.rows.len()) })
        })
        .await
        .unwrap();
    assert_eq!(rows, 78);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let nope = HistoricalDataRequest::builder("NOPE").build().unwrap();
    let err = client
        .scoped(move |c| Box::pin(async move { c.get_historical_data(&nope).await }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataRequest);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    eventually(|| {
        let sim = sim.clone();
        async move { sim.live_clients().await.is_empty() }
    })
    .await;
}

#[tokio::test]
async fn test_table_csv_output() {
    let sim = SimGateway::new();
    let client = client(&sim);

    let table = client.get_historical_data_as_table(&aapl()).await.unwrap();
    assert_eq!(table.len(), 78);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aapl.csv");
    table.save_csv(&path).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 79);
    assert_eq!(lines[0], "date,open,high,low,close,volume,wap,bar_count");
    assert!(lines[1].starts_with("20240119 09:30:00,"));
}

#[test]
fn test_blocking_client() {
    let sim = SimGateway::new();
    let client =
        BlockingClient::with_transport(GatewayConfig::default(), Arc::new(sim.clone())).unwrap();

    let response = client.get_historical_data(&aapl()).unwrap();
    assert_eq!(response.rows.len(), 78);
    assert_eq!(client.state(), ConnectionState::Connected);

    let count = client
        .scoped(|c| Ok(c.get_historical_data_as_table(&aapl())?.len()))
        .unwrap();
    assert_eq!(count, 78);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
