//! # Structured Logging
//!
//! Global `tracing` subscriber setup and span macros for secret store work.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::EnvSource;

/// How the global subscriber is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub default_level: String,
    /// Emit one JSON object per event instead of human-readable lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { default_level: "info".to_string(), json: false }
    }
}

impl LoggingConfig {
    /// `CERTVAULT_LOG_JSON=true|1` switches to JSON output.
    pub fn from_env(env: &dyn EnvSource, verbose: bool) -> Self {
        let json = env
            .var("CERTVAULT_LOG_JSON")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self { default_level: if verbose { "debug" } else { "info" }.to_string(), json }
    }
}

/// Install the global subscriber. Returns `false` when one was already
/// installed (integration tests, embedding applications); that is not an error.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.as_str()));

    let installed = if config.json {
        fmt().json().with_env_filter(filter).with_target(true).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
    installed.is_ok()
}

/// Create an info span around one secret store operation.
///
/// ```rust,ignore
/// let span = vault_span!("get_secret", "contoso-kv", "root-ca");
/// ```
#[macro_export]
macro_rules! vault_span {
    ($operation:expr, $vault:expr) => {
        tracing::info_span!(
            "vault_operation",
            operation = %$operation,
            vault = %$vault,
            item = tracing::field::Empty
        )
    };
    ($operation:expr, $vault:expr, $item:expr) => {
        tracing::info_span!(
            "vault_operation",
            operation = %$operation,
            vault = %$vault,
            item = %$item
        )
    };
}
