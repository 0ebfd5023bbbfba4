//! Synchronous wrapper around [`HistoricalDataClient`].

use std::sync::Arc;
use std::time::Duration;

use ibhist_gateway::{ConnectionError, ConnectionState, GatewayConfig, Transport};
use ibhist_model::{DataType, HistoricalDataRequest, RequestParams};
use tokio::runtime::{Handle, Runtime};

use crate::client::HistoricalDataClient;
use crate::error::Result;
use crate::processor::BarProcessor;
use crate::response::HistoricalDataResponse;
use crate::table::Table;

/// Blocking client backed by its own tokio runtime.
///
/// Must not be used from inside an async context.
pub struct BlockingClient {
    inner: HistoricalDataClient,
    runtime: Runtime,
}

impl BlockingClient {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Self::from_client(HistoricalDataClient::new(config)?)
    }

    pub fn with_transport(config: GatewayConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::from_client(HistoricalDataClient::with_transport(config, transport)?)
    }

    pub fn from_client(inner: HistoricalDataClient) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ibhist-blocking")
            .enable_all()
            .build()
            .map_err(ConnectionError::from)?;
        Ok(Self { inner, runtime })
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn connect(&self) -> Result<()> {
        self.runtime.block_on(self.inner.connect())
    }

    pub fn disconnect(&self) -> Result<()> {
        self.runtime.block_on(self.inner.disconnect())
    }

    pub fn register_processor(
        &self,
        data_type: DataType,
        processor: Arc<dyn BarProcessor>,
    ) -> Option<Arc<dyn BarProcessor>> {
        self.inner.register_processor(data_type, processor)
    }

    pub fn get_historical_data(
        &self,
        request: &HistoricalDataRequest,
    ) -> Result<HistoricalDataResponse> {
        self.runtime.block_on(self.inner.get_historical_data(request))
    }

    pub fn get_historical_data_with_timeout(
        &self,
        request: &HistoricalDataRequest,
        timeout: Duration,
    ) -> Result<HistoricalDataResponse> {
        self.runtime
            .block_on(self.inner.get_historical_data_with_timeout(request, timeout))
    }

    pub fn fetch(&self, params: &RequestParams) -> Result<HistoricalDataResponse> {
        self.runtime.block_on(self.inner.fetch(params))
    }

    pub fn get_historical_data_as_table(&self, request: &HistoricalDataRequest) -> Result<Table> {
        self.runtime
            .block_on(self.inner.get_historical_data_as_table(request))
    }

    /// Connect, run `f`, then disconnect whether `f` succeeded or not.
    pub fn scoped<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        let result = self.connect().and_then(|()| f(self));
        let closed = self.disconnect();
        let value = result?;
        closed?;
        Ok(value)
    }
}

impl Drop for BlockingClient {
    fn drop(&mut self) {
        // block_on panics inside a runtime; the session is then closed by
        // dropping the connection instead.
        if Handle::try_current().is_err() {
            let _ = self.runtime.block_on(self.inner.disconnect());
        }
    }
}
