//! Logging setup shared by the coordinator and its workers.
//!
//! Everything goes to stderr, optionally mirrored to a file. A worker's
//! stdout is its protocol channel, so nothing may ever log there.
//!
//! # Environment Variables
//!
//! - `PROCPOOL_LOG` - Log filter (overrides RUST_LOG)
//! - `PROCPOOL_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `PROCPOOL_LOG_FORMAT` - Output format: pretty, compact, json
//! - `PROCPOOL_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! # Example
//!
//! ```no_run
//! use procpool::logging::{LogConfig, init};
//!
//! init(LogConfig::for_coordinator().with_env_overrides());
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-field human-readable format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Rotation for the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    /// Single file, never rotated
    Never,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "never" => Ok(Self::Never),
            _ => Err(format!(
                "Unknown log rotation: '{}'. Valid options: hourly, daily, never",
                s
            )),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration.
///
/// Use the builder methods to customize, then pass to [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO)
    pub level: Level,
    pub format: LogFormat,
    /// Log file mirrored alongside stderr
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Log span timing on close
    pub span_events: bool,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    pub show_target: bool,
    pub show_thread_ids: bool,
    pub show_line_numbers: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            rotation: LogRotation::Daily,
            span_events: false,
            filter: None,
            show_target: true,
            show_thread_ids: false,
            show_line_numbers: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for the coordinator.
    ///
    /// Thread names matter there: every busy worker has its own waiter thread.
    pub fn for_coordinator() -> Self {
        Self {
            level: Level::WARN,
            show_thread_ids: true,
            ..Self::default()
        }
    }

    /// Preset for worker processes: compact lines on the inherited stderr.
    pub fn for_worker() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            show_target: false,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Apply environment variable overrides.
    ///
    /// A filter already set from the command line wins over `PROCPOOL_LOG`,
    /// `RUST_LOG` and `PROCPOOL_LOG_LEVEL`.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var("PROCPOOL_LOG") {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }

        if self.filter.is_none()
            && let Ok(level_str) = std::env::var("PROCPOOL_LOG_LEVEL")
        {
            self.level = parse_level(&level_str).unwrap_or(self.level);
        }

        if let Ok(format) = std::env::var("PROCPOOL_LOG_FORMAT")
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Ok(path) = std::env::var("PROCPOOL_LOG_FILE") {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    /// The filter directive this configuration resolves to.
    pub fn filter_directive(&self) -> String {
        match &self.filter {
            Some(filter) => filter.clone(),
            None => self.level.to_string().to_lowercase(),
        }
    }

    fn build_filter(&self) -> EnvFilter {
        let directive = self.filter_directive();
        EnvFilter::try_new(&directive).unwrap_or_else(|_| {
            eprintln!("Warning: Invalid log filter '{}', using default", directive);
            EnvFilter::new(self.level.to_string().to_lowercase())
        })
    }
}

/// Parse a log level string.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let span_events = if config.span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_ansi(ansi)
        .with_span_events(span_events)
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_thread_names(config.show_thread_ids)
        .with_line_number(config.show_line_numbers)
        .with_writer(writer);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}

fn file_appender(path: &Path, rotation: LogRotation) -> RollingFileAppender {
    let parent = path.parent().unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("procpool.log");
    RollingFileAppender::new(rotation.into(), parent, file_name)
}

/// Initialize the global tracing subscriber.
///
/// Logs to stderr, plus the configured file if any. Subsequent calls are
/// silently ignored.
pub fn init(config: LogConfig) {
    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(&config, std::io::stderr, true)];
    if let Some(path) = &config.file_path {
        layers.push(fmt_layer(
            &config,
            file_appender(path, config.rotation),
            false,
        ));
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(config.build_filter())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("full".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("invalid".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_rotation_from_str() {
        assert_eq!(
            "hourly".parse::<LogRotation>().unwrap(),
            LogRotation::Hourly
        );
        assert_eq!("never".parse::<LogRotation>().unwrap(), LogRotation::Never);
        assert!("weekly".parse::<LogRotation>().is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_presets() {
        let coordinator = LogConfig::for_coordinator();
        assert_eq!(coordinator.level, Level::WARN);
        assert!(coordinator.show_thread_ids);

        let worker = LogConfig::for_worker();
        assert_eq!(worker.format, LogFormat::Compact);
        assert!(!worker.show_target);
        assert!(worker.file_path.is_none());
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(LogConfig::default().filter_directive(), "info");
        let config = LogConfig::new().with_filter("procpool=debug".to_string());
        assert_eq!(config.filter_directive(), "procpool=debug");
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_rotation(LogRotation::Never)
            .with_file(PathBuf::from("/tmp/procpool.log"));

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.span_events);
        assert_eq!(config.rotation, LogRotation::Never);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/procpool.log")));
    }
}
