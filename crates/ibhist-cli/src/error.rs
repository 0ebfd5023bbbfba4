use thiserror::Error;

/// CLI failures, mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Client(#[from] ibhist::Error),

    #[error("{0:#}")]
    Config(anyhow::Error),

    #[error("{0:#}")]
    Output(anyhow::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Client(e) => match e.kind() {
                ibhist::ErrorKind::Validation => 2,
                ibhist::ErrorKind::Connection => 3,
                ibhist::ErrorKind::Timeout => 4,
                ibhist::ErrorKind::DataRequest => 5,
                _ => 1,
            },
            Self::Config(_) | Self::Output(_) => 1,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Client(e) => e.kind().as_str(),
            Self::Config(_) => "config",
            Self::Output(_) => "output",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibhist::ValidationError;

    #[test]
    fn test_exit_codes() {
        let validation = CliError::from(ibhist::Error::from(ValidationError::EmptySymbol));
        assert_eq!(validation.exit_code(), 2);
        assert_eq!(validation.kind(), "validation");

        let timeout = CliError::from(ibhist::Error::Timeout {
            timeout: std::time::Duration::from_secs(30),
        });
        assert_eq!(timeout.exit_code(), 4);

        let rejected = CliError::from(ibhist::Error::DataRequest {
            code: Some(162),
            message: "no data".into(),
        });
        assert_eq!(rejected.exit_code(), 5);
        assert_eq!(rejected.kind(), "data_request");

        let output = CliError::Output(anyhow::anyhow!("disk full"));
        assert_eq!(output.exit_code(), 1);
        assert_eq!(output.kind(), "output");
    }
}
