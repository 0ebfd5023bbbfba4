use chrono::{DateTime, Utc};
use ibhist_gateway::Completed;
use ibhist_model::{DataType, HistoricalDataRequest};
use serde::Serialize;

use crate::processor::BarProcessor;
use crate::row::Row;
use crate::table::Table;

/// Processed result of one historical data request.
#[derive(Debug, Clone, Serialize)]
pub struct HistoricalDataResponse {
    pub request: HistoricalDataRequest,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMeta {
    pub row_count: usize,
    pub data_type: DataType,
    /// Start of the returned span; the gateway's value, else the first bar.
    pub start: Option<String>,
    pub end: Option<String>,
    pub processor: &'static str,
    pub retrieved_at: DateTime<Utc>,
}

impl HistoricalDataResponse {
    pub fn from_completed(completed: Completed, processor: &dyn BarProcessor) -> Self {
        let Completed {
            request,
            bars,
            start,
            end,
        } = completed;

        let rows = processor.process(&bars);
        let start = start.or_else(|| bars.first().map(|b| b.time.clone()));
        let end = end.or_else(|| bars.last().map(|b| b.time.clone()));

        Self {
            meta: ResponseMeta {
                row_count: rows.len(),
                data_type: request.data_type(),
                start,
                end,
                processor: processor.name(),
                retrieved_at: Utc::now(),
            },
            columns: processor.columns(),
            rows,
            request,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_table(&self) -> Table {
        Table::from_rows(self.columns.clone(), &self.rows)
    }
}
