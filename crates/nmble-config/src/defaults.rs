use std::time::Duration;

use camino::Utf8PathBuf;

/// Executable launched when no bridge command is configured.
pub const DEFAULT_BRIDGE_COMMAND: &str = "blehostd";

/// Milliseconds an operation waits for a correlated record before timing out.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 10_000;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default bridge executable path.
pub fn default_bridge_command() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_BRIDGE_COMMAND)
}

/// Default response timeout as a [`Duration`].
pub fn default_response_timeout() -> Duration {
    Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS)
}

/// Default log filter expression.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}
