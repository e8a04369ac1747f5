//! # Logging Utilities
//!
//! Logging infrastructure for rdebug using `tracing`.
//!
//! Logs go to **stderr**: stdout belongs to the script being debugged (and
//! may itself be redirected into the debug session).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rdebug_utils::init_logging;
//!
//! // Keep the guard alive for the life of the process.
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("agent started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=rdebug_core=trace`)
//! - `RDEBUG_LOG_FORMAT`: Set output format (`json` or `pretty`, default: `pretty`)
//! - `RDEBUG_LOG_FILE`: Optional path to a log file, rolled daily, written in
//!   addition to stderr

use std::path::{Path, PathBuf};
use std::{env, fmt, io};

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const FORMAT_ENV: &str = "RDEBUG_LOG_FORMAT";

/// Environment variable naming an additional log file.
pub const FILE_ENV: &str = "RDEBUG_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines (default)
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
}

impl std::str::FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        const PRETTY: [&str; 3] = ["pretty", "dev", "development"];
        const JSON: [&str; 3] = ["json", "prod", "production"];

        if PRETTY.iter().any(|name| name.eq_ignore_ascii_case(s)) {
            Ok(Self::Pretty)
        } else if JSON.iter().any(|name| name.eq_ignore_ascii_case(s)) {
            Ok(Self::Json)
        } else {
            Err(format!("unknown log format `{s}` (expected pretty or json)"))
        }
    }
}

/// Verbosity threshold.
///
/// `Trace` logs every hook event and is only useful for short sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel
{
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Off => Self::OFF,
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let canonical = match s.to_ascii_lowercase().as_str() {
            "err" => "error".to_string(),
            "warning" => "warn".to_string(),
            "dbg" => "debug".to_string(),
            other => other.to_string(),
        };
        let filter: LevelFilter = canonical
            .parse()
            .map_err(|_| format!("unknown log level `{s}` (expected off, error, warn, info, debug or trace)"))?;
        let level = [Self::Off, Self::Error, Self::Warn, Self::Info, Self::Debug]
            .into_iter()
            .find(|level| LevelFilter::from(*level) == filter)
            .unwrap_or(Self::Trace);
        Ok(level)
    }
}

impl fmt::Display for LogLevel
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::Display::fmt(&LevelFilter::from(*self), f)
    }
}

/// Keeps the file writer flushing. Dropping it flushes and stops file logging.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard
{
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber from the environment.
///
/// `RUST_LOG` holds filter directives (default `info`), `RDEBUG_LOG_FORMAT`
/// picks the format and `RDEBUG_LOG_FILE` adds a file sink.
///
/// ## Errors
///
/// [`LoggingError::InvalidFormat`] for an unknown `RDEBUG_LOG_FORMAT`,
/// [`LoggingError::InitializationFailed`] when a global subscriber is
/// already installed.
pub fn init_logging() -> Result<LogGuard, LoggingError>
{
    let format = match env::var(FORMAT_ENV) {
        Ok(value) => value.parse::<LogFormat>().map_err(LoggingError::InvalidFormat)?,
        Err(_) => LogFormat::default(),
    };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    install(format, &filter)
}

/// Install the global subscriber with a fixed level; `RUST_LOG` is ignored.
///
/// ## Errors
///
/// [`LoggingError::InitializationFailed`] when a global subscriber is
/// already installed.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LogGuard, LoggingError>
{
    install(format, &EnvFilter::new(level.to_string()))
}

fn install(format: LogFormat, filter: &EnvFilter) -> Result<LogGuard, LoggingError>
{
    let mut layers = vec![render(base_layer(io::stderr).with_ansi(true), format, filter)];
    let mut guard = LogGuard::default();

    if let Some(path) = env::var_os(FILE_ENV).map(PathBuf::from) {
        let (writer, worker) = tracing_appender::non_blocking(daily_file(&path));
        layers.push(render(base_layer(writer).with_ansi(false), format, filter));
        guard._file = Some(worker);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;
    Ok(guard)
}

type BaseLayer<W> = tracing_subscriber::fmt::Layer<Registry, DefaultFields, Format<tracing_subscriber::fmt::format::Full, ChronoUtc>, W>;

fn base_layer<W>(writer: W) -> BaseLayer<W>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_timer(ChronoUtc::rfc_3339())
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
}

fn render<W>(layer: BaseLayer<W>, format: LogFormat, filter: &EnvFilter) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => layer.with_filter(filter.clone()).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter.clone())
            .boxed(),
    }
}

fn daily_file(path: &Path) -> tracing_appender::rolling::RollingFileAppender
{
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tracing_appender::rolling::daily(directory, path.file_name().unwrap_or_default())
}

/// Why the subscriber could not be installed.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// `RDEBUG_LOG_FORMAT` names no known format
    #[error("RDEBUG_LOG_FORMAT: {0}")]
    InvalidFormat(String),

    /// A global subscriber already exists
    #[error("logging already initialized: {0}")]
    InitializationFailed(String),
}
