use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt as tfmt};

/// All crates of the workspace. These log at the configured level, everything else at `INFO`.
const CRATE_NAMES: &[&str] = &[
    "statsq",
    "statsq_common",
    "statsq_config",
    "statsq_log",
    "statsq_metrics",
    "statsq_server",
    "statsq_system",
];

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO  statsq::setup > listening on 0.0.0.0:8125
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2024-12-04T12:10:32.123Z  INFO statsq::setup: listening on 0.0.0.0:8125
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2024-12-04T12:11:08.729716Z","level":"INFO","message":"listening on 0.0.0.0:8125","target":"statsq::setup"}
    /// ```
    Json,
}

impl LogFormat {
    /// Returns the name of this format as used in the config.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Auto => "auto",
            LogFormat::Pretty => "pretty",
            LogFormat::Simplified => "simplified",
            LogFormat::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned when parsing an unknown [`LogFormat`].
#[derive(Debug, thiserror::Error)]
#[error("invalid log format, expected one of: auto, pretty, simplified, json")]
pub struct ParseLogFormatError;

impl FromStr for LogFormat {
    type Err = ParseLogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(LogFormat::Auto),
            "pretty" => Ok(LogFormat::Pretty),
            "simplified" => Ok(LogFormat::Simplified),
            "json" => Ok(LogFormat::Json),
            _ => Err(ParseLogFormatError),
        }
    }
}

/// The maximum level of log statements emitted by statsq's own crates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct LogLevel(pub LevelFilter);

impl LogLevel {
    /// Logs errors and warnings only.
    pub const WARN: Self = Self(LevelFilter::WARN);
    /// The default level.
    pub const INFO: Self = Self(LevelFilter::INFO);
    /// Includes debug output, such as malformed lines and flushed samples.
    pub const DEBUG: Self = Self(LevelFilter::DEBUG);
    /// Logs everything.
    pub const TRACE: Self = Self(LevelFilter::TRACE);

    /// Returns the level filter for use with `tracing-subscriber`.
    pub fn filter(self) -> LevelFilter {
        self.0
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::INFO
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_string().to_lowercase())
    }
}

/// An error returned when parsing an unknown [`LogLevel`].
#[derive(Debug, thiserror::Error)]
#[error("{0}, expected one of: off, error, warn, info, debug, trace")]
pub struct ParseLevelError(tracing::level_filters::ParseLevelFilterError);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self).map_err(ParseLevelError)
    }
}

impl Serialize for LogLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for statsq.
    pub level: LogLevel,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::Auto,
        }
    }
}

/// Builds the filter applied when `RUST_LOG` is not set.
fn default_filter(level: LogLevel) -> EnvFilter {
    let mut directives = LevelFilter::INFO.to_string().to_lowercase();
    for name in CRATE_NAMES {
        directives.push_str(&format!(",{name}={level}"));
    }

    EnvFilter::builder().parse_lossy(directives)
}

/// Initialize the logging system.
///
/// Logs go to `stderr`. If the `RUST_LOG` environment variable is set, it takes precedence over
/// the configured level. Calling this more than once has no effect.
///
/// # Example
///
/// ```
/// let log_config = statsq_log::LogConfig {
///     format: statsq_log::LogFormat::Json,
///     ..Default::default()
/// };
///
/// statsq_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config.level));

    let format = match (config.format, console::user_attended_stderr()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => tfmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .without_time()
            .boxed(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => tfmt::layer()
            .with_writer(io::stderr)
            .with_ansi(false)
            .with_target(true)
            .boxed(),
        (LogFormat::Json, _) => tfmt::layer()
            .with_writer(io::stderr)
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(filter))
        .try_init()
        .ok();
}
