//! Historical data request and its validation.
//!
//! There is one validation path: [`RequestBuilder::build`]. Raw string input
//! ([`RequestParams`], e.g. from a CLI or a YAML file) is parsed into the
//! typed builder by [`HistoricalDataRequest::validate`] and then built, so both
//! entry points enforce exactly the same rules.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::compat::check_compatibility;
use crate::enums::{AssetType, BarSize, DataType, HistoryDuration, Right};
use crate::error::ValidationError;

const DEFAULT_EXCHANGE: &str = "SMART";
const DEFAULT_CURRENCY: &str = "USD";

const END_DATE_FORMATS: [&str; 2] = ["%Y%m%d %H:%M:%S", "%Y%m%d-%H:%M:%S"];

/// Unvalidated request parameters. Every field except `symbol` is optional
/// and falls back to the request defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestParams {
    pub symbol: String,
    pub asset_type: Option<String>,
    pub duration: Option<String>,
    pub bar_size: Option<String>,
    pub data_type: Option<String>,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub use_rth: Option<bool>,
    pub end_date_time: Option<String>,
    pub expiry: Option<String>,
    pub strike: Option<String>,
    pub right: Option<String>,
}

impl RequestParams {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }
}

/// A validated, immutable historical data request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalDataRequest {
    symbol: String,
    asset_type: AssetType,
    duration: HistoryDuration,
    bar_size: BarSize,
    data_type: DataType,
    exchange: String,
    currency: String,
    use_rth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    strike: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    right: Option<Right>,
}

impl HistoricalDataRequest {
    pub fn builder(symbol: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(symbol)
    }

    /// Parse and validate raw parameters.
    pub fn validate(params: &RequestParams) -> Result<Self, ValidationError> {
        let mut builder = Self::builder(params.symbol.as_str());

        if let Some(value) = non_blank(&params.asset_type) {
            builder = builder.asset_type(value.parse()?);
        }
        if let Some(value) = non_blank(&params.duration) {
            builder = builder.duration(value.parse()?);
        }
        if let Some(value) = non_blank(&params.bar_size) {
            builder = builder.bar_size(value.parse()?);
        }
        if let Some(value) = non_blank(&params.data_type) {
            builder = builder.data_type(value.parse()?);
        }
        if let Some(value) = &params.exchange {
            builder = builder.exchange(value.as_str());
        }
        if let Some(value) = &params.currency {
            builder = builder.currency(value.as_str());
        }
        if let Some(value) = params.use_rth {
            builder = builder.use_rth(value);
        }
        if let Some(value) = non_blank(&params.end_date_time) {
            builder = builder.end_date_time(value);
        }
        if let Some(value) = non_blank(&params.expiry) {
            builder = builder.expiry(value);
        }
        if let Some(value) = non_blank(&params.strike) {
            let strike = value
                .parse::<f64>()
                .map_err(|_| ValidationError::InvalidStrike {
                    value: value.to_string(),
                })?;
            builder = builder.strike(strike);
        }
        if let Some(value) = non_blank(&params.right) {
            builder = builder.right(value.parse()?);
        }

        builder.build()
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    pub fn duration(&self) -> HistoryDuration {
        self.duration
    }

    pub fn bar_size(&self) -> BarSize {
        self.bar_size
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn use_rth(&self) -> bool {
        self.use_rth
    }

    /// `None` means "now" on the gateway side.
    pub fn end_date_time(&self) -> Option<&str> {
        self.end_date_time.as_deref()
    }

    pub fn expiry(&self) -> Option<&str> {
        self.expiry.as_deref()
    }

    pub fn strike(&self) -> Option<f64> {
        self.strike
    }

    pub fn right(&self) -> Option<Right> {
        self.right
    }
}

impl fmt::Display for HistoricalDataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.symbol, self.asset_type)?;
        if let Some(expiry) = &self.expiry {
            write!(f, " {}", expiry)?;
        }
        if let (Some(strike), Some(right)) = (self.strike, self.right) {
            write!(f, " {}{}", strike, right)?;
        }
        write!(f, " {} x {} {}", self.duration, self.bar_size, self.data_type)
    }
}

/// Typed builder for [`HistoricalDataRequest`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    symbol: String,
    asset_type: AssetType,
    duration: HistoryDuration,
    bar_size: BarSize,
    data_type: DataType,
    exchange: String,
    currency: String,
    use_rth: bool,
    end_date_time: Option<String>,
    expiry: Option<String>,
    strike: Option<f64>,
    right: Option<Right>,
}

impl RequestBuilder {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            asset_type: AssetType::Stk,
            duration: HistoryDuration::Day1,
            bar_size: BarSize::Min5,
            data_type: DataType::Trades,
            exchange: DEFAULT_EXCHANGE.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            use_rth: true,
            end_date_time: None,
            expiry: None,
            strike: None,
            right: None,
        }
    }

    pub fn asset_type(mut self, asset_type: AssetType) -> Self {
        self.asset_type = asset_type;
        self
    }

    pub fn duration(mut self, duration: HistoryDuration) -> Self {
        self.duration = duration;
        self
    }

    pub fn bar_size(mut self, bar_size: BarSize) -> Self {
        self.bar_size = bar_size;
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn use_rth(mut self, use_rth: bool) -> Self {
        self.use_rth = use_rth;
        self
    }

    pub fn end_date_time(mut self, end: impl Into<String>) -> Self {
        self.end_date_time = Some(end.into());
        self
    }

    pub fn expiry(mut self, expiry: impl Into<String>) -> Self {
        self.expiry = Some(expiry.into());
        self
    }

    pub fn strike(mut self, strike: f64) -> Self {
        self.strike = Some(strike);
        self
    }

    pub fn right(mut self, right: Right) -> Self {
        self.right = Some(right);
        self
    }

    pub fn build(self) -> Result<HistoricalDataRequest, ValidationError> {
        let symbol = self.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        let exchange = required_text("exchange", &self.exchange)?;
        let currency = required_text("currency", &self.currency)?;

        let end_date_time = match self.end_date_time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(check_end_date_time(value)?),
        };

        let asset_type = self.asset_type;
        let (expiry, strike, right) = match asset_type {
            AssetType::Stk | AssetType::Cash | AssetType::Ind => (None, None, None),
            AssetType::Fut => {
                let expiry = require(asset_type, "expiry", self.expiry)?;
                (Some(check_expiry(asset_type, &expiry)?), None, None)
            }
            AssetType::Opt => {
                let expiry = require(asset_type, "expiry", self.expiry)?;
                let expiry = check_expiry(asset_type, &expiry)?;
                let strike = require(asset_type, "strike", self.strike)?;
                if !strike.is_finite() || strike <= 0.0 {
                    return Err(ValidationError::InvalidStrike {
                        value: strike.to_string(),
                    });
                }
                let right = require(asset_type, "right", self.right)?;
                (Some(expiry), Some(strike), Some(right))
            }
        };

        check_compatibility(self.duration, self.bar_size)?;

        Ok(HistoricalDataRequest {
            symbol,
            asset_type,
            duration: self.duration,
            bar_size: self.bar_size,
            data_type: self.data_type,
            exchange,
            currency,
            use_rth: self.use_rth,
            end_date_time,
            expiry,
            strike,
            right,
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required_text(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(value.to_ascii_uppercase())
}

fn require<T>(
    asset_type: AssetType,
    field: &'static str,
    value: Option<T>,
) -> Result<T, ValidationError> {
    value.ok_or(ValidationError::MissingField { field, asset_type })
}

fn check_expiry(asset_type: AssetType, value: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    let invalid = |reason: &str| ValidationError::InvalidExpiry {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("must contain digits only"));
    }

    match (value.len(), asset_type) {
        (8, _) => NaiveDate::parse_from_str(value, "%Y%m%d")
            .map(|_| value.to_string())
            .map_err(|_| invalid("not a calendar date")),
        (6, AssetType::Fut) => {
            let year: i32 = value[..4].parse().map_err(|_| invalid("bad year"))?;
            let month: u32 = value[4..].parse().map_err(|_| invalid("bad month"))?;
            NaiveDate::from_ymd_opt(year, month, 1)
                .map(|_| value.to_string())
                .ok_or_else(|| invalid("not a calendar month"))
        }
        (_, AssetType::Fut) => Err(invalid("expected YYYYMMDD or YYYYMM")),
        _ => Err(invalid("expected YYYYMMDD")),
    }
}

/// Accepts `YYYYMMDD HH:MM:SS` or `YYYYMMDD-HH:MM:SS`, optionally followed by
/// a time zone name which is passed through untouched.
fn check_end_date_time(value: &str) -> Result<String, ValidationError> {
    let parses = |stamp: &str| {
        END_DATE_FORMATS
            .iter()
            .any(|format| NaiveDateTime::parse_from_str(stamp, format).is_ok())
    };

    let stamp_ok = parses(value)
        || value
            .rsplit_once(' ')
            .map(|(stamp, zone)| !zone.is_empty() && parses(stamp.trim_end()))
            .unwrap_or(false);

    if stamp_ok {
        Ok(value.to_string())
    } else {
        Err(ValidationError::InvalidEndDateTime {
            value: value.to_string(),
        })
    }
}
