//! ibhist: historical bar data from Interactive Brokers TWS / IB Gateway
//!
//! ```ignore
//! let client = HistoricalDataClient::new(GatewayConfig::from_env()?)?;
//! let request = HistoricalDataRequest::builder("AAPL")
//!     .duration(HistoryDuration::Day1)
//!     .bar_size(BarSize::Min5)
//!     .build()?;
//! let response = client.get_historical_data(&request).await?;
//! response.to_table().save_csv(Path::new("aapl.csv"))?;
//! ```
//!
//! Rows are shaped by the [`BarProcessor`] registered for the request's data
//! type; see [`register_processor`].

pub mod blocking;
pub mod client;
pub mod error;
pub mod processor;
pub mod registry;
pub mod response;
pub mod row;
pub mod table;

use std::sync::Arc;

pub use blocking::BlockingClient;
pub use client::{ClientBuilder, HistoricalDataClient};
pub use error::{Error, ErrorKind, Result};
pub use processor::{
    BarProcessor, BidAskProcessor, MidpointProcessor, PassThroughProcessor, TradesProcessor,
};
pub use registry::ProcessorRegistry;
pub use response::{HistoricalDataResponse, ResponseMeta};
pub use row::{Row, Value};
pub use table::Table;

pub use ibhist_gateway::{ConnectionState, GatewayConfig};
pub use ibhist_model::{
    AssetType, Bar, BarSize, DataType, HistoricalDataRequest, HistoryDuration, RequestParams,
    Right, ValidationError,
};

/// Register `processor` for `data_type` on the process-wide registry.
///
/// Affects every client built without a private registry, including
/// clients created earlier. Returns the processor it replaced.
pub fn register_processor(
    data_type: DataType,
    processor: Arc<dyn BarProcessor>,
) -> Option<Arc<dyn BarProcessor>> {
    ProcessorRegistry::global().register(data_type, processor)
}
