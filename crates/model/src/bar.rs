use serde::{Deserialize, Serialize};

/// One OHLCV record as delivered by the gateway.
///
/// `time` is kept exactly as the gateway formats it (`"20240115 09:30:00"`
/// for intraday bars, `"20240115"` for daily and longer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// `-1` when the data type carries no volume.
    pub volume: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bar_count: Option<i64>,
}

impl Bar {
    pub fn new(
        time: impl Into<String>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
    ) -> Self {
        Self {
            time: time.into(),
            open,
            high,
            low,
            close,
            volume,
            wap: None,
            bar_count: None,
        }
    }

    /// Attach trade statistics. Gateway sentinels (negative values) are
    /// treated as absent.
    pub fn with_trade_stats(mut self, wap: f64, bar_count: i64) -> Self {
        self.wap = (wap >= 0.0 && wap.is_finite()).then_some(wap);
        self.bar_count = (bar_count >= 0).then_some(bar_count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_stats_sentinels_are_dropped() {
        let bar = Bar::new("20240119 09:30:00", 1.0, 2.0, 0.5, 1.5, -1).with_trade_stats(-1.0, -1);
        assert_eq!(bar.wap, None);
        assert_eq!(bar.bar_count, None);

        let bar = Bar::new("20240119", 1.0, 2.0, 0.5, 1.5, 100).with_trade_stats(1.25, 42);
        assert_eq!(bar.wap, Some(1.25));
        assert_eq!(bar.bar_count, Some(42));
    }
}
