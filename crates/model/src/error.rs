use thiserror::Error;

use crate::enums::{AssetType, BarSize, HistoryDuration};

/// Errors raised while building a historical data request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,

    #[error("{field} cannot be empty")]
    EmptyField { field: &'static str },

    #[error("unknown {field} value: {value:?}")]
    UnknownValue { field: &'static str, value: String },

    #[error("{field} is required for {asset_type} requests")]
    MissingField {
        field: &'static str,
        asset_type: AssetType,
    },

    #[error("invalid expiry {value:?}: {reason}")]
    InvalidExpiry { value: String, reason: String },

    #[error("invalid strike {value:?}: must be a positive number")]
    InvalidStrike { value: String },

    #[error("invalid end date/time {value:?}: expected YYYYMMDD HH:MM:SS")]
    InvalidEndDateTime { value: String },

    #[error("bar size {bar_size} is incompatible with duration {duration}: {reason}")]
    IncompatibleBarSize {
        bar_size: BarSize,
        duration: HistoryDuration,
        reason: String,
    },
}

impl ValidationError {
    pub(crate) fn unknown(field: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownValue {
            field,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ValidationError::MissingField {
            field: "strike",
            asset_type: AssetType::Opt,
        };
        assert_eq!(err.to_string(), "strike is required for OPT requests");

        let err = ValidationError::unknown("bar size", "7 mins");
        assert_eq!(err.to_string(), "unknown bar size value: \"7 mins\"");
    }
}
