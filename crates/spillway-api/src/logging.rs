//! Logging configuration for spillway
//!
//! Structured logging through the `tracing` framework, with stdout or
//! daily-rolling file output.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default log file name when the configured path has none
const DEFAULT_LOG_FILE: &str = "spillway.log";

/// Where log lines go
#[derive(Debug, Clone)]
pub enum LogOutput {
    /// Standard output
    Stdout,
    /// A file, rolled over daily
    File(PathBuf),
    /// Standard output and a daily file
    Both(PathBuf),
}

/// Line format
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Multi-line, for reading at a terminal
    Pretty,
    /// One line per event
    Compact,
}

/// Logging setup for processes embedding a channel
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level filter, in `EnvFilter` syntax
    pub level: String,
    /// Output destination
    pub output: LogOutput,
    /// Format style
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            format: LogFormat::Compact,
        }
    }
}

impl LogConfig {
    /// Info level to stdout
    pub fn info() -> Self {
        Self::default()
    }

    /// Debug level, which includes every commit and rollback
    pub fn debug() -> Self {
        Self::default().with_level("debug")
    }

    /// Only warnings: torn segments, abandoned transactions, failures
    pub fn warn() -> Self {
        Self::default().with_level("warn")
    }

    /// Write to a daily file at `path`
    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::File(path.into());
        self
    }

    /// Write to stdout and a daily file at `path`
    pub fn with_both<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::Both(path.into());
        self
    }

    /// Set the line format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Replace the filter directives
    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    /// Add debug output from the log and checkpoint layers only
    pub fn with_log_debug(mut self) -> Self {
        self.level = format!("{},spillway_wal=debug,spillway_checkpoint=debug", self.level);
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    fn file_writer(path: &Path) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(DEFAULT_LOG_FILE);
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name))
    }

    /// Install this configuration as the global subscriber
    ///
    /// Returns a guard that must be kept alive while logging to a file.
    /// When the guard is dropped, buffered lines are flushed and the
    /// writer thread exits. If a global subscriber is already installed
    /// this does nothing.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use spillway::logging::LogConfig;
    ///
    /// // dropping the guard stops file output
    /// let _guard = LogConfig::warn().with_log_debug().init();
    /// ```
    pub fn init(self) -> Option<WorkerGuard> {
        let env_filter = self.filter();

        match self.output {
            LogOutput::Stdout => {
                let _ = match self.format {
                    LogFormat::Pretty => tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().pretty())
                        .try_init(),
                    LogFormat::Compact => tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().compact())
                        .try_init(),
                };
                None
            }
            LogOutput::File(path) => {
                let (non_blocking, guard) = Self::file_writer(&path);
                let _ = match self.format {
                    LogFormat::Pretty => tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).pretty())
                        .try_init(),
                    LogFormat::Compact => tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).compact())
                        .try_init(),
                };
                Some(guard)
            }
            LogOutput::Both(path) => {
                let (non_blocking, guard) = Self::file_writer(&path);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().compact())
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false).compact())
                    .try_init();
                Some(guard)
            }
        }
    }
}
