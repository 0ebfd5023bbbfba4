//! Gateway connection configuration
//!
//! Built directly, from `TWS_*` environment variables, or from a YAML file.
//! Missing values fall back to the paper-trading TWS defaults.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_HOST: &str = "TWS_HOST";
pub const ENV_PORT: &str = "TWS_PORT";
pub const ENV_CLIENT_ID: &str = "TWS_CLIENT_ID";
pub const ENV_CONNECT_TIMEOUT: &str = "TWS_CONNECT_TIMEOUT";
pub const ENV_REQUEST_TIMEOUT: &str = "TWS_REQUEST_TIMEOUT";

/// Connection parameters for one gateway session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub host: String,
    /// 7497 is paper TWS, 7496 live TWS, 4001/4002 IB Gateway
    pub port: u16,
    pub client_id: i32,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Extra handshake attempts after the first one fails
    pub connect_retries: u32,
    /// Delay before the first retry; doubles on each further attempt
    pub retry_backoff_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7497,
            client_id: 1,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            connect_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

impl GatewayConfig {
    /// Create configuration with explicit endpoint values
    pub fn new(host: impl Into<String>, port: u16, client_id: i32) -> Self {
        Self {
            host: host.into(),
            port,
            client_id,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// Optional:
    /// - `TWS_HOST` (default `127.0.0.1`)
    /// - `TWS_PORT` (default `7497`)
    /// - `TWS_CLIENT_ID` (default `1`)
    /// - `TWS_CONNECT_TIMEOUT` seconds (default `10`)
    /// - `TWS_REQUEST_TIMEOUT` seconds (default `30`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`GatewayConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.trim().is_empty()) {
            config.host = host.trim().to_string();
        }
        if let Some(port) = parse_var(&lookup, ENV_PORT)? {
            config.port = port;
        }
        if let Some(client_id) = parse_var(&lookup, ENV_CLIENT_ID)? {
            config.client_id = client_id;
        }
        if let Some(secs) = parse_var(&lookup, ENV_CONNECT_TIMEOUT)? {
            config.connect_timeout_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, ENV_REQUEST_TIMEOUT)? {
            config.request_timeout_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: GatewayConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port cannot be 0".to_string()));
        }
        if self.client_id < 0 {
            return Err(ConfigError::Invalid(format!(
                "client id must be non-negative, got {}",
                self.client_id
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "connect timeout must be at least 1 second".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.retry_backoff_ms),
            factor: 2,
            max: Duration::from_secs(30),
        }
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvVar { var, value }),
    }
}

/// Exponential delay between handshake attempts: `base * factor^attempt`,
/// capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: u32,
    pub max: Duration,
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let scale = self.factor.saturating_pow(attempt);
        self.base.saturating_mul(scale).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.addr(), "127.0.0.1:7497");
        assert_eq!(config.client_id, 1);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = GatewayConfig::from_lookup(lookup_from(&[
            (ENV_HOST, "gateway.local"),
            (ENV_PORT, "4002"),
            (ENV_CLIENT_ID, "17"),
            (ENV_REQUEST_TIMEOUT, "5"),
        ]))
        .unwrap();
        assert_eq!(config.host, "gateway.local");
        assert_eq!(config.port, 4002);
        assert_eq!(config.client_id, 17);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.request_timeout_secs, 5);
    }

    #[test]
    fn test_from_lookup_invalid_port() {
        let err = GatewayConfig::from_lookup(lookup_from(&[(ENV_PORT, "seventy")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { var: ENV_PORT, .. }));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = GatewayConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.client_id = -1;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        let config = GatewayConfig::new("  ", 7497, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host: 10.0.0.5\nport: 4001\nclient_id: 3\nrequest_timeout_secs: 60").unwrap();

        let config = GatewayConfig::load(file.path()).unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 4001);
        assert_eq!(config.client_id, 3);
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(config.connect_retries, 2);
    }

    #[test]
    fn test_load_yaml_rejects_unknown_field() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hostname: nope").unwrap();
        assert!(matches!(
            GatewayConfig::load(file.path()),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff {
            base: Duration::from_millis(500),
            factor: 2,
            max: Duration::from_secs(3),
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay(3), Duration::from_secs(3));
        assert_eq!(backoff.delay(40), Duration::from_secs(3));
    }
}
