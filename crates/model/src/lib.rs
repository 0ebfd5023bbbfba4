//! ibhist-model: request and bar types for historical data retrieval
//!
//! Everything here is pure: building a request never touches the network,
//! so validation failures are reported before any connection exists.

pub mod bar;
pub mod compat;
pub mod enums;
pub mod error;
pub mod request;

pub use bar::Bar;
pub use compat::{check_compatibility, MAX_BARS_PER_REQUEST};
pub use enums::{AssetType, BarSize, DataType, HistoryDuration, Right};
pub use error::ValidationError;
pub use request::{HistoricalDataRequest, RequestBuilder, RequestParams};
