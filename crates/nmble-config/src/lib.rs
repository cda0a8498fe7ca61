//! Layered configuration shared by BLE bridge clients.
//!
//! Values resolve from built-in defaults, then a TOML file named by
//! `--config-path` or `NMBLE_CONFIG_PATH`, then `NMBLE_*` environment
//! variables, and finally command-line flags.

mod defaults;
mod logging;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_BRIDGE_COMMAND, DEFAULT_LOG_FILTER, DEFAULT_RESPONSE_TIMEOUT_MS,
    default_bridge_command, default_log_filter, default_log_filter_string, default_log_format,
    default_response_timeout,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "NMBLE")]
pub struct Config {
    /// Bridge executable spawned by the transport.
    #[ortho_config(default = defaults::default_bridge_command())]
    pub bridge_command: Utf8PathBuf,
    /// Extra arguments passed to the bridge executable.
    #[ortho_config(default = Vec::new())]
    pub bridge_args: Vec<String>,
    /// Milliseconds each operation waits for its next correlated record.
    #[ortho_config(default = DEFAULT_RESPONSE_TIMEOUT_MS)]
    pub response_timeout_ms: u64,
    /// `tracing` filter expression.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge_command: default_bridge_command(),
            bridge_args: Vec::new(),
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Bridge executable path.
    #[must_use]
    pub fn bridge_command(&self) -> &Utf8Path {
        self.bridge_command.as_path()
    }

    /// Arguments passed to the bridge executable.
    #[must_use]
    pub fn bridge_args(&self) -> &[String] {
        &self.bridge_args
    }

    /// Inactivity timeout applied to every blocking operation.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_built_in_values() {
        let config = Config::default();

        assert_eq!(config.bridge_command(), Utf8Path::new("blehostd"));
        assert!(config.bridge_args().is_empty());
        assert_eq!(config.response_timeout(), default_response_timeout());
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.log_format(), LogFormat::Json);
    }

    #[test]
    fn response_timeout_converts_milliseconds() {
        let config = Config {
            response_timeout_ms: 250,
            ..Config::default()
        };

        assert_eq!(config.response_timeout(), Duration::from_millis(250));
    }
}
