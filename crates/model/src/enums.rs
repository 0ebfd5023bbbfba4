//! Enumerations accepted by the gateway's historical data endpoint.
//!
//! Every enum displays as its wire value (`"5 mins"`, `"1 D"`, `"BID_ASK"`)
//! and parses from the wire value, the variant name (`"MIN_5"`), or a lenient
//! spelling such as `"5 min"` or `"1 day"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub(crate) const SECONDS_PER_DAY: u64 = 86_400;
pub(crate) const SECONDS_PER_WEEK: u64 = 7 * SECONDS_PER_DAY;
pub(crate) const SECONDS_PER_MONTH: u64 = 30 * SECONDS_PER_DAY;
pub(crate) const SECONDS_PER_YEAR: u64 = 365 * SECONDS_PER_DAY;

fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Split `"5 mins"`, `"5mins"` or `"5m"` into `(5, "mins")`.
fn split_quantity(value: &str) -> Option<(u64, String)> {
    let trimmed = value.trim();
    let digits_end = trimmed.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let count = trimmed[..digits_end].parse().ok()?;
    let unit = trimmed[digits_end..].trim().to_ascii_lowercase();
    Some((count, unit))
}

/// Security type of the instrument being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AssetType {
    /// Stock
    Stk,
    /// Option
    Opt,
    /// Future
    Fut,
    /// Currency pair
    Cash,
    /// Index
    Ind,
}

impl AssetType {
    pub const ALL: [AssetType; 5] = [
        AssetType::Stk,
        AssetType::Opt,
        AssetType::Fut,
        AssetType::Cash,
        AssetType::Ind,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            AssetType::Stk => "STK",
            AssetType::Opt => "OPT",
            AssetType::Fut => "FUT",
            AssetType::Cash => "CASH",
            AssetType::Ind => "IND",
        }
    }

    pub const fn name(self) -> &'static str {
        self.as_str()
    }

    pub const fn description(self) -> &'static str {
        match self {
            AssetType::Stk => "Stock",
            AssetType::Opt => "Option",
            AssetType::Fut => "Future",
            AssetType::Cash => "Currency",
            AssetType::Ind => "Index",
        }
    }

    /// Whether requests for this asset type carry an expiry.
    pub fn is_derivative(self) -> bool {
        matches!(self, AssetType::Opt | AssetType::Fut)
    }
}

impl FromStr for AssetType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "stk" | "stock" => Ok(AssetType::Stk),
            "opt" | "option" => Ok(AssetType::Opt),
            "fut" | "future" => Ok(AssetType::Fut),
            "cash" | "fx" | "forex" => Ok(AssetType::Cash),
            "ind" | "index" => Ok(AssetType::Ind),
            _ => Err(ValidationError::unknown("asset type", s)),
        }
    }
}

/// Width of a single bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BarSize {
    Sec1,
    Sec5,
    Sec10,
    Sec15,
    Sec30,
    Min1,
    Min2,
    Min3,
    Min5,
    Min10,
    Min15,
    Min20,
    Min30,
    Hour1,
    Hour2,
    Hour3,
    Hour4,
    Hour8,
    Day1,
    Week1,
    Month1,
}

impl BarSize {
    pub const ALL: [BarSize; 21] = [
        BarSize::Sec1,
        BarSize::Sec5,
        BarSize::Sec10,
        BarSize::Sec15,
        BarSize::Sec30,
        BarSize::Min1,
        BarSize::Min2,
        BarSize::Min3,
        BarSize::Min5,
        BarSize::Min10,
        BarSize::Min15,
        BarSize::Min20,
        BarSize::Min30,
        BarSize::Hour1,
        BarSize::Hour2,
        BarSize::Hour3,
        BarSize::Hour4,
        BarSize::Hour8,
        BarSize::Day1,
        BarSize::Week1,
        BarSize::Month1,
    ];

    /// (wire value, variant name, span in seconds)
    const fn parts(self) -> (&'static str, &'static str, u64) {
        match self {
            BarSize::Sec1 => ("1 sec", "SEC_1", 1),
            BarSize::Sec5 => ("5 secs", "SEC_5", 5),
            BarSize::Sec10 => ("10 secs", "SEC_10", 10),
            BarSize::Sec15 => ("15 secs", "SEC_15", 15),
            BarSize::Sec30 => ("30 secs", "SEC_30", 30),
            BarSize::Min1 => ("1 min", "MIN_1", 60),
            BarSize::Min2 => ("2 mins", "MIN_2", 120),
            BarSize::Min3 => ("3 mins", "MIN_3", 180),
            BarSize::Min5 => ("5 mins", "MIN_5", 300),
            BarSize::Min10 => ("10 mins", "MIN_10", 600),
            BarSize::Min15 => ("15 mins", "MIN_15", 900),
            BarSize::Min20 => ("20 mins", "MIN_20", 1_200),
            BarSize::Min30 => ("30 mins", "MIN_30", 1_800),
            BarSize::Hour1 => ("1 hour", "HOUR_1", 3_600),
            BarSize::Hour2 => ("2 hours", "HOUR_2", 7_200),
            BarSize::Hour3 => ("3 hours", "HOUR_3", 10_800),
            BarSize::Hour4 => ("4 hours", "HOUR_4", 14_400),
            BarSize::Hour8 => ("8 hours", "HOUR_8", 28_800),
            BarSize::Day1 => ("1 day", "DAY_1", SECONDS_PER_DAY),
            BarSize::Week1 => ("1 week", "WEEK_1", SECONDS_PER_WEEK),
            BarSize::Month1 => ("1 month", "MONTH_1", SECONDS_PER_MONTH),
        }
    }

    pub const fn as_str(self) -> &'static str {
        self.parts().0
    }

    pub const fn name(self) -> &'static str {
        self.parts().1
    }

    /// Calendar span of one bar.
    pub const fn seconds(self) -> u64 {
        self.parts().2
    }

    /// Bars of a day or longer are stamped with a date only.
    pub fn is_daily_or_longer(self) -> bool {
        self.seconds() >= SECONDS_PER_DAY
    }
}

fn bar_unit_seconds(unit: &str) -> Option<u64> {
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(60),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(3_600),
        "d" | "day" | "days" => Some(SECONDS_PER_DAY),
        "w" | "wk" | "week" | "weeks" => Some(SECONDS_PER_WEEK),
        "mo" | "mon" | "month" | "months" => Some(SECONDS_PER_MONTH),
        _ => None,
    }
}

impl FromStr for BarSize {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        if let Some(found) = BarSize::ALL
            .into_iter()
            .find(|b| normalize(b.as_str()) == wanted || normalize(b.name()) == wanted)
        {
            return Ok(found);
        }

        split_quantity(s)
            .and_then(|(count, unit)| count.checked_mul(bar_unit_seconds(&unit)?))
            .and_then(|secs| BarSize::ALL.into_iter().find(|b| b.seconds() == secs))
            .ok_or_else(|| ValidationError::unknown("bar size", s))
    }
}

/// How far back a request reaches, in the gateway's duration units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HistoryDuration {
    Day1,
    Days2,
    Days3,
    Days5,
    Week1,
    Weeks2,
    Month1,
    Months2,
    Months3,
    Months6,
    Year1,
    Years2,
}

impl HistoryDuration {
    pub const ALL: [HistoryDuration; 12] = [
        HistoryDuration::Day1,
        HistoryDuration::Days2,
        HistoryDuration::Days3,
        HistoryDuration::Days5,
        HistoryDuration::Week1,
        HistoryDuration::Weeks2,
        HistoryDuration::Month1,
        HistoryDuration::Months2,
        HistoryDuration::Months3,
        HistoryDuration::Months6,
        HistoryDuration::Year1,
        HistoryDuration::Years2,
    ];

    /// (wire value, variant name, span in seconds)
    const fn parts(self) -> (&'static str, &'static str, u64) {
        match self {
            HistoryDuration::Day1 => ("1 D", "DAY_1", SECONDS_PER_DAY),
            HistoryDuration::Days2 => ("2 D", "DAYS_2", 2 * SECONDS_PER_DAY),
            HistoryDuration::Days3 => ("3 D", "DAYS_3", 3 * SECONDS_PER_DAY),
            HistoryDuration::Days5 => ("5 D", "DAYS_5", 5 * SECONDS_PER_DAY),
            HistoryDuration::Week1 => ("1 W", "WEEK_1", SECONDS_PER_WEEK),
            HistoryDuration::Weeks2 => ("2 W", "WEEKS_2", 2 * SECONDS_PER_WEEK),
            HistoryDuration::Month1 => ("1 M", "MONTH_1", SECONDS_PER_MONTH),
            HistoryDuration::Months2 => ("2 M", "MONTHS_2", 2 * SECONDS_PER_MONTH),
            HistoryDuration::Months3 => ("3 M", "MONTHS_3", 3 * SECONDS_PER_MONTH),
            HistoryDuration::Months6 => ("6 M", "MONTHS_6", 6 * SECONDS_PER_MONTH),
            HistoryDuration::Year1 => ("1 Y", "YEAR_1", SECONDS_PER_YEAR),
            HistoryDuration::Years2 => ("2 Y", "YEARS_2", 2 * SECONDS_PER_YEAR),
        }
    }

    pub const fn as_str(self) -> &'static str {
        self.parts().0
    }

    pub const fn name(self) -> &'static str {
        self.parts().1
    }

    /// Calendar span covered by the duration.
    pub const fn seconds(self) -> u64 {
        self.parts().2
    }

    /// Approximate number of trading sessions in the duration.
    pub fn trading_days(self) -> u32 {
        match self {
            HistoryDuration::Day1 => 1,
            HistoryDuration::Days2 => 2,
            HistoryDuration::Days3 => 3,
            HistoryDuration::Days5 | HistoryDuration::Week1 => 5,
            HistoryDuration::Weeks2 => 10,
            HistoryDuration::Month1 => 21,
            HistoryDuration::Months2 => 42,
            HistoryDuration::Months3 => 63,
            HistoryDuration::Months6 => 126,
            HistoryDuration::Year1 => 252,
            HistoryDuration::Years2 => 504,
        }
    }
}

fn duration_unit_seconds(unit: &str) -> Option<u64> {
    match unit {
        "d" | "day" | "days" => Some(SECONDS_PER_DAY),
        "w" | "wk" | "week" | "weeks" => Some(SECONDS_PER_WEEK),
        "m" | "mo" | "mon" | "month" | "months" => Some(SECONDS_PER_MONTH),
        "y" | "yr" | "year" | "years" => Some(SECONDS_PER_YEAR),
        _ => None,
    }
}

impl FromStr for HistoryDuration {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        if let Some(found) = HistoryDuration::ALL
            .into_iter()
            .find(|d| normalize(d.as_str()) == wanted || normalize(d.name()) == wanted)
        {
            return Ok(found);
        }

        split_quantity(s)
            .and_then(|(count, unit)| count.checked_mul(duration_unit_seconds(&unit)?))
            .and_then(|secs| HistoryDuration::ALL.into_iter().find(|d| d.seconds() == secs))
            .ok_or_else(|| ValidationError::unknown("duration", s))
    }
}

/// What the bars are built from (`whatToShow` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    Trades,
    Midpoint,
    Bid,
    Ask,
    BidAsk,
    AdjustedLast,
    HistoricalVolatility,
    OptionImpliedVolatility,
}

impl DataType {
    pub const ALL: [DataType; 8] = [
        DataType::Trades,
        DataType::Midpoint,
        DataType::Bid,
        DataType::Ask,
        DataType::BidAsk,
        DataType::AdjustedLast,
        DataType::HistoricalVolatility,
        DataType::OptionImpliedVolatility,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            DataType::Trades => "TRADES",
            DataType::Midpoint => "MIDPOINT",
            DataType::Bid => "BID",
            DataType::Ask => "ASK",
            DataType::BidAsk => "BID_ASK",
            DataType::AdjustedLast => "ADJUSTED_LAST",
            DataType::HistoricalVolatility => "HISTORICAL_VOLATILITY",
            DataType::OptionImpliedVolatility => "OPTION_IMPLIED_VOLATILITY",
        }
    }

    pub const fn name(self) -> &'static str {
        self.as_str()
    }

    /// Trade-based bars carry volume, WAP and trade count.
    pub fn is_trade_based(self) -> bool {
        matches!(self, DataType::Trades | DataType::AdjustedLast)
    }
}

impl FromStr for DataType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        DataType::ALL
            .into_iter()
            .find(|d| normalize(d.as_str()) == wanted)
            .ok_or_else(|| ValidationError::unknown("data type", s))
    }
}

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Right {
    Call,
    Put,
}

impl Right {
    pub const ALL: [Right; 2] = [Right::Call, Right::Put];

    /// Single-letter form sent to the gateway.
    pub const fn as_str(self) -> &'static str {
        match self {
            Right::Call => "C",
            Right::Put => "P",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Right::Call => "CALL",
            Right::Put => "PUT",
        }
    }
}

impl FromStr for Right {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "c" | "call" => Ok(Right::Call),
            "p" | "put" => Ok(Right::Put),
            _ => Err(ValidationError::unknown("right", s)),
        }
    }
}

macro_rules! wire_string_impls {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }

            impl TryFrom<String> for $ty {
                type Error = ValidationError;

                fn try_from(value: String) -> Result<Self, Self::Error> {
                    value.parse()
                }
            }

            impl From<$ty> for String {
                fn from(value: $ty) -> Self {
                    value.as_str().to_string()
                }
            }
        )*
    };
}

wire_string_impls!(AssetType, BarSize, HistoryDuration, DataType, Right);
