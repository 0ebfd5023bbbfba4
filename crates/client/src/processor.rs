//! Bar processors: shape raw bars into output rows for one data type.
//!
//! Processors are pure over the bar slice. The registry hands out one
//! `Arc<dyn BarProcessor>` per response so a response is never shaped by
//! two processors.

use ibhist_model::{Bar, DataType};

use crate::row::Row;

pub trait BarProcessor: Send + Sync {
    /// Data type this processor shapes.
    fn data_type(&self) -> DataType;

    /// Output column names, in row order.
    fn columns(&self) -> Vec<String>;

    fn process(&self, bars: &[Bar]) -> Vec<Row>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

const RAW_COLUMNS: [&str; 8] = [
    "date", "open", "high", "low", "close", "volume", "wap", "bar_count",
];

fn raw_row(bar: &Bar) -> Row {
    Row::new()
        .with("date", bar.time.as_str())
        .with("open", bar.open)
        .with("high", bar.high)
        .with("low", bar.low)
        .with("close", bar.close)
        .with("volume", bar.volume)
        .with("wap", bar.wap)
        .with("bar_count", bar.bar_count)
}

fn owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

/// TRADES bars: OHLC plus volume, VWAP and trade count.
#[derive(Debug, Default, Clone, Copy)]
pub struct TradesProcessor;

impl BarProcessor for TradesProcessor {
    fn data_type(&self) -> DataType {
        DataType::Trades
    }

    fn columns(&self) -> Vec<String> {
        owned(&RAW_COLUMNS)
    }

    fn process(&self, bars: &[Bar]) -> Vec<Row> {
        bars.iter().map(raw_row).collect()
    }
}

/// BID_ASK bars. The gateway packs the quote statistics into the OHLC
/// slots: open is the average bid, high the max ask, low the min bid and
/// close the average ask.
///
/// Columns are named after that packing, not `bid_price` / `ask_price` /
/// `bid_size` / `ask_size`. BID_ASK bars carry no sizes; code expecting
/// the quote-style layout should register its own processor for
/// [`DataType::BidAsk`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BidAskProcessor;

impl BarProcessor for BidAskProcessor {
    fn data_type(&self) -> DataType {
        DataType::BidAsk
    }

    fn columns(&self) -> Vec<String> {
        owned(&["date", "avg_bid", "max_ask", "min_bid", "avg_ask"])
    }

    fn process(&self, bars: &[Bar]) -> Vec<Row> {
        bars.iter()
            .map(|bar| {
                Row::new()
                    .with("date", bar.time.as_str())
                    .with("avg_bid", bar.open)
                    .with("max_ask", bar.high)
                    .with("min_bid", bar.low)
                    .with("avg_ask", bar.close)
            })
            .collect()
    }
}

/// MIDPOINT bars as `mid_open` .. `mid_close`.
///
/// There is no single `midpoint` column and no `volume`: midpoint bars
/// report four prices and carry no traded volume.
#[derive(Debug, Default, Clone, Copy)]
pub struct MidpointProcessor;

impl BarProcessor for MidpointProcessor {
    fn data_type(&self) -> DataType {
        DataType::Midpoint
    }

    fn columns(&self) -> Vec<String> {
        owned(&["date", "mid_open", "mid_high", "mid_low", "mid_close"])
    }

    fn process(&self, bars: &[Bar]) -> Vec<Row> {
        bars.iter()
            .map(|bar| {
                Row::new()
                    .with("date", bar.time.as_str())
                    .with("mid_open", bar.open)
                    .with("mid_high", bar.high)
                    .with("mid_low", bar.low)
                    .with("mid_close", bar.close)
            })
            .collect()
    }
}

/// Fallback for data types without a registered processor: every raw bar
/// field, unchanged.
#[derive(Debug, Clone, Copy)]
pub struct PassThroughProcessor {
    data_type: DataType,
}

impl PassThroughProcessor {
    pub fn new(data_type: DataType) -> Self {
        Self { data_type }
    }
}

impl BarProcessor for PassThroughProcessor {
    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn columns(&self) -> Vec<String> {
        owned(&RAW_COLUMNS)
    }

    fn process(&self, bars: &[Bar]) -> Vec<Row> {
        bars.iter().map(raw_row).collect()
    }
}
