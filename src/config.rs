use std::{env, fmt, net::SocketAddr, str::FromStr, time::Duration};

use thiserror::Error;

use crate::mcp::types::ServerInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            _ => Err(ConfigError::InvalidTransport(value.to_string())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Http => f.write_str("http"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportKind,
    pub bind_addr: String,
    pub bind_port: u16,
    pub server_name: String,
    pub server_version: String,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid transport type: {0} (must be 'stdio' or 'http')")]
    InvalidTransport(String),
    #[error("BIND_PORT must be between 1 and 65535")]
    InvalidPort,
    #[error("{0} must be a positive number of seconds")]
    InvalidTimeout(&'static str),
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportKind::Stdio,
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 8080,
            server_name: "Coffee Shop Server".to_string(),
            server_version: "1.0.0".to_string(),
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from `lookup`, falling back to defaults for
    /// unset or blank keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let transport = value("MCP_TRANSPORT")
            .map(|value| value.parse::<TransportKind>())
            .transpose()?
            .unwrap_or(defaults.transport);
        let bind_port = value("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(defaults.bind_port);

        let timeout = |key: &'static str, default: Duration| {
            value(key)
                .map(|value| match value.parse::<u64>() {
                    Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
                    _ => Err(ConfigError::InvalidTimeout(key)),
                })
                .transpose()
                .map(|parsed| parsed.unwrap_or(default))
        };

        let config = Self {
            transport,
            bind_addr: value("BIND_ADDR").unwrap_or(defaults.bind_addr),
            bind_port,
            server_name: value("MCP_SERVER_NAME").unwrap_or(defaults.server_name),
            server_version: value("MCP_SERVER_VERSION").unwrap_or(defaults.server_version),
            request_timeout: timeout("MCP_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            shutdown_timeout: timeout("MCP_SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout)?,
            read_timeout: timeout("MCP_READ_TIMEOUT_SECS", defaults.read_timeout)?,
            write_timeout: timeout("MCP_WRITE_TIMEOUT_SECS", defaults.write_timeout)?,
            idle_timeout: timeout("MCP_IDLE_TIMEOUT_SECS", defaults.idle_timeout)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("MCP_REQUEST_TIMEOUT_SECS"));
        }
        let _ = self.bind_socket()?;
        Ok(())
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.server_name.clone(),
            version: self.server_version.clone(),
        }
    }
}
