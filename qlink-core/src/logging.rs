// Logging and tracing setup

use tracing::{info, Span};
use tracing_subscriber::EnvFilter;

use crate::peer::PeerAddress;

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub with_thread_names: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            with_thread_names: false,
        }
    }
}

impl LogConfig {
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct LogConfigBuilder {
    level: Option<LogLevel>,
    format: Option<LogFormat>,
    with_thread_names: Option<bool>,
}

impl LogConfigBuilder {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_thread_names(mut self, enabled: bool) -> Self {
        self.with_thread_names = Some(enabled);
        self
    }

    pub fn build(self) -> LogConfig {
        let default = LogConfig::default();

        LogConfig {
            level: self.level.unwrap_or(default.level),
            format: self.format.unwrap_or(default.format),
            with_thread_names: self.with_thread_names.unwrap_or(default.with_thread_names),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Install a global subscriber. `RUST_LOG` wins over the configured level.
///
/// Returns `false` when a subscriber was already installed, which makes the
/// call safe to repeat from tests and from FFI hosts that create several
/// managers.
pub fn init_logging(config: LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(config.with_thread_names);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init().is_ok(),
        LogFormat::Pretty => builder.try_init().is_ok(),
    };

    if installed {
        info!("Logging initialized with level: {:?}", config.level);
    }
    installed
}

/// Span every worker task runs inside
pub fn worker_span(kind: &'static str, worker_id: u64, peer: &PeerAddress) -> Span {
    tracing::info_span!("worker", kind, worker_id, peer = %peer)
}
