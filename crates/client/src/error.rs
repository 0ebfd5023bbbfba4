use std::fmt;
use std::time::Duration;

use ibhist_gateway::{ConfigError, ConnectionError, RequestError};
use ibhist_model::ValidationError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything a client call can fail with.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Connection(#[from] ConnectionError),

    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("data request failed{}: {message}", .code.map(|c| format!(" (code {})", c)).unwrap_or_default())]
    DataRequest { code: Option<i32>, message: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("output error: {0}")]
    Output(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Connection(_) => ErrorKind::Connection,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::DataRequest { .. } => ErrorKind::DataRequest,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Config(_) => ErrorKind::Config,
            Error::Output(_) => ErrorKind::Output,
        }
    }
}

impl From<RequestError> for Error {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Connection(e) => Error::Connection(e),
            RequestError::Timeout { timeout } => Error::Timeout { timeout },
            RequestError::Rejected { code, message } => Error::DataRequest {
                code: Some(code),
                message,
            },
            RequestError::Cancelled => Error::Cancelled,
            dup @ RequestError::DuplicateId(_) => Error::DataRequest {
                code: None,
                message: dup.to_string(),
            },
        }
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Output(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Output(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Output(err.to_string())
    }
}

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Connection,
    Timeout,
    DataRequest,
    Cancelled,
    Config,
    Output,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DataRequest => "data_request",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
            ErrorKind::Output => "output",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_errors_map_to_kinds() {
        let cases = [
            (
                RequestError::Timeout {
                    timeout: Duration::from_secs(10),
                },
                ErrorKind::Timeout,
            ),
            (RequestError::Cancelled, ErrorKind::Cancelled),
            (RequestError::DuplicateId(3), ErrorKind::DataRequest),
            (
                RequestError::Connection(ConnectionError::Closed),
                ErrorKind::Connection,
            ),
            (
                RequestError::Rejected {
                    code: 162,
                    message: "no data".into(),
                },
                ErrorKind::DataRequest,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(Error::from(err).kind(), kind);
        }
    }

    #[test]
    fn test_display() {
        let err = Error::from(RequestError::Rejected {
            code: 162,
            message: "HMDS query returned no data".into(),
        });
        assert_eq!(
            err.to_string(),
            "data request failed (code 162): HMDS query returned no data"
        );
        assert_eq!(Error::from(ValidationError::EmptySymbol).kind().to_string(), "validation");

        let timeout = Error::from(RequestError::Timeout {
            timeout: Duration::from_millis(250),
        });
        assert_eq!(timeout.to_string(), "request timed out after 250ms");
    }
}
