use std::error::Error;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use statsq_log::{LogConfig, LogFormat, LogLevel};
use statsq_metrics::{
    AggregatorConfig, DEFAULT_MAX_PACKET_SIZE, FlushConfig, InactiveGauges, PacketParser,
    Percentiles,
};

use crate::types::{GraphiteTarget, ListenAddr};

type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Serializing the effective config failed.
    #[error("could not serialize config")]
    CouldNotSerialize,
    /// A value is invalid or conflicts with another value.
    #[error("invalid config value")]
    InvalidValue,
}

/// Defines the source of a config error.
#[derive(Debug)]
enum ConfigErrorSource {
    /// An error occurring independently.
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override or a validated field.
    Field(&'static str),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::Field(name) => write!(f, " (field {name})"),
        }
    }
}

/// An error returned when loading or validating the configuration.
#[derive(Debug)]
pub struct ConfigError {
    origin: ConfigErrorSource,
    kind: ConfigErrorKind,
    error: Option<BoxError>,
}

impl ConfigError {
    #[inline]
    fn wrap<E>(kind: ConfigErrorKind, error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            origin: ConfigErrorSource::None,
            kind,
            error: Some(error.into()),
        }
    }

    #[inline]
    fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.origin = ConfigErrorSource::File(path.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.origin = ConfigErrorSource::Field(name);
        self
    }

    /// Creates an [`InvalidValue`](ConfigErrorKind::InvalidValue) error for the given field.
    fn for_field<E>(error: E, name: &'static str) -> Self
    where
        E: Into<BoxError>,
    {
        Self::wrap(ConfigErrorKind::InvalidValue, error).field(name)
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }

    /// Returns the name of the offending field, if the error is tied to one.
    pub fn field_name(&self) -> Option<&'static str> {
        match self.origin {
            ConfigErrorSource::Field(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.origin)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.error.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// Raised when two settings cannot be combined.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ConflictError(&'static str);

/// Raised for numeric values that must be positive.
#[derive(Debug, thiserror::Error)]
#[error("value must be greater than zero")]
struct ZeroError;

/// Raised for boolean overrides that are not one of the accepted literals.
#[derive(Debug, thiserror::Error)]
#[error("invalid boolean {0:?}, expected one of: true, false, 1, 0")]
struct ParseBoolError(String);

/// Parses a boolean override, where the empty string means `false`.
fn parse_bool(value: &str) -> Result<bool, ParseBoolError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => Err(ParseBoolError(other.to_owned())),
    }
}

/// The raw values of the configuration file.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
struct ConfigValues {
    /// The UDP address to receive packets on.
    address: ListenAddr,
    /// An optional TCP address to receive newline-delimited packets on.
    tcp_address: Option<ListenAddr>,
    /// The maximum accepted size of a datagram or line, in bytes.
    max_udp_packet_size: usize,
    /// The Graphite endpoint receiving flushed lines.
    graphite: GraphiteTarget,
    /// Seconds between two flushes.
    flush_interval: u64,
    /// Logs every flushed line and raises the log level to debug.
    debug: bool,
    /// Keeps reporting gauges without updates.
    resend_gauges: bool,
    /// Removes gauges that received no updates since the last flush.
    delete_gauges: bool,
    /// Flushes a counter is reported as zero after its traffic stopped.
    persist_count_keys: u32,
    /// Name of the synthetic counter for received packets. Empty disables it.
    receive_counter: String,
    /// Prepended to every bucket name.
    prefix: String,
    /// Appended to every bucket name.
    postfix: String,
    /// Percentiles computed for every timer.
    percentiles: Percentiles,
    /// Buffer size of every sample bus subscriber.
    bus_capacity: usize,
    /// Seconds to wait for in-flight work on graceful shutdown.
    shutdown_timeout: u64,
    /// Logging configuration.
    logging: LogConfig,
}

impl Default for ConfigValues {
    fn default() -> Self {
        Self {
            address: ListenAddr::from(SocketAddr::from(([0, 0, 0, 0], 8125))),
            tcp_address: None,
            max_udp_packet_size: DEFAULT_MAX_PACKET_SIZE,
            graphite: GraphiteTarget::default(),
            flush_interval: 10,
            debug: false,
            resend_gauges: false,
            delete_gauges: false,
            persist_count_keys: 60,
            receive_counter: String::new(),
            prefix: String::new(),
            postfix: String::new(),
            percentiles: Percentiles::default(),
            bus_capacity: 4096,
            shutdown_timeout: 10,
            logging: LogConfig::default(),
        }
    }
}

/// Command line and environment overrides for the configuration.
///
/// All values are kept as strings and parsed by [`Config::apply_override`]. `None` leaves the
/// value from the file or the default untouched.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The UDP listen address.
    pub address: Option<String>,
    /// The TCP listen address.
    pub tcp_address: Option<String>,
    /// The maximum packet size.
    pub max_udp_packet_size: Option<String>,
    /// The Graphite endpoint, or `-`.
    pub graphite: Option<String>,
    /// The flush interval in seconds.
    pub flush_interval: Option<String>,
    /// The debug switch.
    pub debug: Option<String>,
    /// The resend gauges switch.
    pub resend_gauges: Option<String>,
    /// The delete gauges switch.
    pub delete_gauges: Option<String>,
    /// The counter persistence in flushes.
    pub persist_count_keys: Option<String>,
    /// The receive counter name.
    pub receive_counter: Option<String>,
    /// The bucket name prefix.
    pub prefix: Option<String>,
    /// The bucket name postfix.
    pub postfix: Option<String>,
    /// The comma-separated percentile list.
    pub percentiles: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
    /// The log format.
    pub log_format: Option<String>,
}

/// The effective configuration of the daemon.
#[derive(Clone, Debug)]
pub struct Config {
    values: ConfigValues,
    path: Option<PathBuf>,
}

impl Config {
    /// Loads the configuration from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let text = fs::read_to_string(path)
            .map_err(|e| ConfigError::wrap(ConfigErrorKind::CouldNotOpenFile, e).file(path))?;

        let mut config = Self::from_yaml(&text).map_err(|e| match e.origin {
            ConfigErrorSource::None => e.file(path),
            _ => e,
        })?;

        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parses the configuration from a YAML string.
    ///
    /// An empty document yields the defaults.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let values = if text.trim().is_empty() {
            ConfigValues::default()
        } else {
            serde_yaml::from_str(text).map_err(|e| ConfigError::wrap(ConfigErrorKind::BadYaml, e))?
        };

        let config = Self { values, path: None };
        config.validate()?;
        Ok(config)
    }

    /// Applies command line and environment overrides and validates the result.
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let values = &mut self.values;

        if let Some(address) = overrides.address {
            values.address = address
                .parse()
                .map_err(|err| ConfigError::for_field(err, "address"))?;
        }

        if let Some(tcp_address) = overrides.tcp_address {
            values.tcp_address = match tcp_address.as_str() {
                "" => None,
                addr => Some(
                    addr.parse()
                        .map_err(|err| ConfigError::for_field(err, "tcp_address"))?,
                ),
            };
        }

        if let Some(size) = overrides.max_udp_packet_size {
            values.max_udp_packet_size = size
                .parse()
                .map_err(|err| ConfigError::for_field(err, "max_udp_packet_size"))?;
        }

        if let Some(graphite) = overrides.graphite {
            values.graphite = graphite
                .parse()
                .map_err(|err| ConfigError::for_field(err, "graphite"))?;
        }

        if let Some(interval) = overrides.flush_interval {
            values.flush_interval = interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "flush_interval"))?;
        }

        if let Some(debug) = overrides.debug {
            values.debug = parse_bool(&debug).map_err(|err| ConfigError::for_field(err, "debug"))?;
        }

        if let Some(resend) = overrides.resend_gauges {
            values.resend_gauges =
                parse_bool(&resend).map_err(|err| ConfigError::for_field(err, "resend_gauges"))?;
        }

        if let Some(delete) = overrides.delete_gauges {
            values.delete_gauges =
                parse_bool(&delete).map_err(|err| ConfigError::for_field(err, "delete_gauges"))?;
        }

        if let Some(persist) = overrides.persist_count_keys {
            values.persist_count_keys = persist
                .parse()
                .map_err(|err| ConfigError::for_field(err, "persist_count_keys"))?;
        }

        if let Some(receive_counter) = overrides.receive_counter {
            values.receive_counter = receive_counter;
        }

        if let Some(prefix) = overrides.prefix {
            values.prefix = prefix;
        }

        if let Some(postfix) = overrides.postfix {
            values.postfix = postfix;
        }

        if let Some(percentiles) = overrides.percentiles {
            values.percentiles = percentiles
                .parse()
                .map_err(|err| ConfigError::for_field(err, "percentiles"))?;
        }

        if let Some(level) = overrides.log_level {
            values.logging.level = level
                .parse()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        if let Some(format) = overrides.log_format {
            values.logging.format = format
                .parse()
                .map_err(|err| ConfigError::for_field(err, "log_format"))?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Checks constraints between values that cannot be expressed by their types.
    fn validate(&self) -> Result<(), ConfigError> {
        let values = &self.values;

        if values.flush_interval == 0 {
            return Err(ConfigError::for_field(ZeroError, "flush_interval"));
        }

        if values.max_udp_packet_size == 0 {
            return Err(ConfigError::for_field(ZeroError, "max_udp_packet_size"));
        }

        if values.resend_gauges && values.delete_gauges {
            let error = ConflictError("resend_gauges and delete_gauges are mutually exclusive");
            return Err(ConfigError::for_field(error, "delete_gauges"));
        }

        Ok(())
    }

    /// Serializes the effective configuration as YAML.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(ConfigErrorKind::CouldNotSerialize, e))
    }

    /// The file this configuration was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The UDP socket address to bind.
    pub fn udp_addr(&self) -> SocketAddr {
        self.values.address.socket_addr()
    }

    /// The TCP socket address to bind, if TCP ingestion is enabled.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.values.tcp_address.map(ListenAddr::socket_addr)
    }

    /// The maximum size of a datagram or line in bytes.
    pub fn max_udp_packet_size(&self) -> usize {
        self.values.max_udp_packet_size
    }

    /// The downstream Graphite endpoint.
    pub fn graphite(&self) -> &GraphiteTarget {
        &self.values.graphite
    }

    /// The interval between two flushes.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.values.flush_interval)
    }

    /// Returns `true` if debug mode is enabled.
    pub fn debug(&self) -> bool {
        self.values.debug
    }

    /// How to treat gauges without updates.
    pub fn inactive_gauges(&self) -> InactiveGauges {
        if self.values.delete_gauges {
            InactiveGauges::Delete
        } else {
            InactiveGauges::Resend
        }
    }

    /// The name of the receive counter, if enabled.
    pub fn receive_counter(&self) -> Option<&str> {
        Some(self.values.receive_counter.as_str()).filter(|name| !name.is_empty())
    }

    /// The configured timer percentiles.
    pub fn percentiles(&self) -> &Percentiles {
        &self.values.percentiles
    }

    /// The time to wait for in-flight work during graceful shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.shutdown_timeout)
    }

    /// The effective logging configuration.
    ///
    /// Debug mode raises the level to at least `debug`.
    pub fn logging(&self) -> LogConfig {
        let mut logging = self.values.logging.clone();
        if self.values.debug && logging.level.filter() < LogLevel::DEBUG.filter() {
            logging.level = LogLevel::DEBUG;
        }
        logging
    }

    /// The configured log format.
    pub fn log_format(&self) -> LogFormat {
        self.values.logging.format
    }

    /// Parameters for the aggregator.
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            persist_count_keys: self.values.persist_count_keys,
            inactive_gauges: self.inactive_gauges(),
            receive_counter: self.receive_counter().map(str::to_owned),
            percentiles: self.values.percentiles.clone(),
            postfix: self.values.postfix.clone(),
        }
    }

    /// Parameters for the flush service.
    pub fn flush_config(&self) -> FlushConfig {
        FlushConfig {
            interval: self.values.flush_interval,
            bus_capacity: self.values.bus_capacity,
            debug: self.values.debug,
        }
    }

    /// Creates a line parser applying the configured prefix, postfix and size limit.
    pub fn packet_parser(&self) -> PacketParser {
        PacketParser::new(
            self.values.prefix.as_str(),
            self.values.postfix.as_str(),
            self.values.max_udp_packet_size,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: None,
        }
    }
}
