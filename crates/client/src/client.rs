//! The async client facade.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use ibhist_gateway::{
    ConnectionState, GatewayConfig, GatewayConnection, TcpTransport, Transport,
};
use ibhist_model::{DataType, HistoricalDataRequest, RequestParams};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::processor::BarProcessor;
use crate::registry::ProcessorRegistry;
use crate::response::HistoricalDataResponse;
use crate::table::Table;

/// Historical bars over one gateway session.
///
/// The session is opened lazily by the first request and reopened after a
/// lost connection. Any number of requests may be in flight at once.
pub struct HistoricalDataClient {
    connection: GatewayConnection,
    registry: Arc<ProcessorRegistry>,
    request_timeout: Duration,
}

impl HistoricalDataClient {
    /// Client for a TWS / IB Gateway reachable over TCP.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn with_transport(config: GatewayConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::builder(config).transport(transport).build()
    }

    pub fn builder(config: GatewayConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            registry: None,
            request_timeout: None,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        self.connection.config()
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Number of connection state transitions so far.
    pub fn transition_count(&self) -> u64 {
        self.connection.transition_count()
    }

    pub async fn connect(&self) -> Result<()> {
        Ok(self.connection.connect().await?)
    }

    pub async fn disconnect(&self) -> Result<()> {
        Ok(self.connection.disconnect().await?)
    }

    /// Register `processor` on this client's registry. With the default
    /// registry this affects every client in the process.
    pub fn register_processor(
        &self,
        data_type: DataType,
        processor: Arc<dyn BarProcessor>,
    ) -> Option<Arc<dyn BarProcessor>> {
        self.registry.register(data_type, processor)
    }

    pub async fn get_historical_data(
        &self,
        request: &HistoricalDataRequest,
    ) -> Result<HistoricalDataResponse> {
        self.get_historical_data_with_timeout(request, self.request_timeout)
            .await
    }

    pub async fn get_historical_data_with_timeout(
        &self,
        request: &HistoricalDataRequest,
        timeout: Duration,
    ) -> Result<HistoricalDataResponse> {
        let processor = self.registry.get(request.data_type());

        self.connection.connect().await?;
        let id = self.connection.next_correlation_id();
        info!(id = %id, request = %request, "requesting historical data");

        let pending = self.connection.submit(id, request, timeout).await?;
        let completed = match pending.wait().await {
            Ok(completed) => completed,
            Err(e) => {
                warn!(id = %id, request = %request, error = %e, "historical data request failed");
                return Err(e.into());
            }
        };

        let response = HistoricalDataResponse::from_completed(completed, processor.as_ref());
        info!(
            id = %id,
            rows = response.meta.row_count,
            processor = response.meta.processor,
            "historical data received"
        );
        Ok(response)
    }

    /// Validate raw parameters and fetch. Invalid parameters fail before any
    /// connection attempt.
    pub async fn fetch(&self, params: &RequestParams) -> Result<HistoricalDataResponse> {
        let request = HistoricalDataRequest::validate(params)?;
        self.get_historical_data(&request).await
    }

    pub async fn get_historical_data_as_table(
        &self,
        request: &HistoricalDataRequest,
    ) -> Result<Table> {
        Ok(self.get_historical_data(request).await?.to_table())
    }

    /// Connect, run `f`, then disconnect whether `f` succeeded or not.
    ///
    /// ```ignore
    /// let rows = client
    ///     .scoped(move |c| Box::pin(async move { c.get_historical_data(&request).await }))
    ///     .await?;
    /// ```
    pub async fn scoped<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c Self) -> BoxFuture<'c, Result<T>>,
    {
        let result = match self.connect().await {
            Ok(()) => f(self).await,
            Err(e) => Err(e),
        };
        let closed = self.disconnect().await;
        let value = result?;
        closed?;
        Ok(value)
    }
}

pub struct ClientBuilder {
    config: GatewayConfig,
    transport: Option<Arc<dyn Transport>>,
    registry: Option<Arc<ProcessorRegistry>>,
    request_timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a private registry instead of [`ProcessorRegistry::global`].
    pub fn registry(mut self, registry: Arc<ProcessorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Default per-request timeout; overrides `request_timeout_secs`.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<HistoricalDataClient> {
        self.config.validate()?;
        if self.request_timeout == Some(Duration::ZERO) {
            return Err(Error::Config(ibhist_gateway::ConfigError::Invalid(
                "request timeout must be positive".to_string(),
            )));
        }

        let request_timeout = self
            .request_timeout
            .unwrap_or_else(|| self.config.request_timeout());
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TcpTransport::new()) as Arc<dyn Transport>);
        let registry = self.registry.unwrap_or_else(ProcessorRegistry::global);

        Ok(HistoricalDataClient {
            connection: GatewayConnection::new(self.config, transport),
            registry,
            request_timeout,
        })
    }
}
