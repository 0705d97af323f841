//! Graph Configuration
//!
//! Settings that apply to every node of a graph. The configuration is plain
//! data so it can be embedded in an application's own config file and
//! loaded with serde.

use serde::{Deserialize, Serialize};

/// Verbosity used for a node's routine lifecycle events.
///
/// Failures are always reported at error level and no-op stops at warn
/// level regardless of this setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Graph-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Level for nodes created without an explicit level.
    pub default_log_level: LogLevel,

    /// Treat a panicking start or stop callback like a failed one instead
    /// of unwinding through the controller.
    pub catch_panics: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            default_log_level: LogLevel::default(),
            catch_panics: true,
        }
    }
}

impl GraphConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
