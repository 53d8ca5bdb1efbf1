use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Key/value tags attached to a metric observation.
///
/// Dimensions are kept sorted by key, which is the canonical order used for hashing and for
/// rendering them into wire names.
pub type Dimensions = BTreeMap<String, String>;

/// The type of a metric, determining its aggregation and reduction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricType {
    /// Sums up values, scaled by the sample rate.
    ///
    /// Reported once per flush, then as zero for a bounded number of flushes after traffic stops.
    Counter,
    /// Stores the last value, or applies signed deltas to it.
    ///
    /// Deltas are clamped to the range `[0, f64::MAX]`.
    Gauge,
    /// Collects all observed durations and reduces them to statistics on flush.
    Timer,
    /// Counts the distinct string values seen during one flush interval.
    Set,
}

impl MetricType {
    /// Returns the statsd modifier of this metric type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Gauge => "g",
            MetricType::Timer => "ms",
            MetricType::Set => "s",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = ParseMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "c" => Self::Counter,
            "g" => Self::Gauge,
            "ms" => Self::Timer,
            "s" => Self::Set,
            _ => return Err(ParseMetricError(())),
        })
    }
}

/// Direction of a relative gauge update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GaugeSign {
    /// Adds the magnitude to the current value.
    Plus,
    /// Subtracts the magnitude from the current value.
    Minus,
}

impl GaugeSign {
    /// Applies a relative update of `magnitude` to `current`.
    ///
    /// The result is clamped to `[0, f64::MAX]`. Neither infinity nor NaN can result from finite
    /// inputs.
    pub fn apply(self, current: f64, magnitude: f64) -> f64 {
        match self {
            GaugeSign::Plus => saturating_add(current, magnitude),
            GaugeSign::Minus => (current - magnitude).max(0.0),
        }
    }
}

/// Adds two finite floats, clamping the result to the finite range.
pub(crate) fn saturating_add(a: f64, b: f64) -> f64 {
    (a + b).clamp(f64::MIN, f64::MAX)
}

/// An error returned when a metric line cannot be parsed.
///
/// Malformed lines are dropped by [`PacketParser::parse_all`](crate::PacketParser::parse_all);
/// this error only surfaces when parsing single lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("failed to parse metric")]
pub struct ParseMetricError(pub(crate) ());

/// Returns `true` if the byte may appear verbatim in a bucket name.
fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'.' | b'-')
}

/// Sanitizes a raw bucket name.
///
/// Slashes become dashes. Any run of other characters outside `[A-Za-z0-9_.-]` collapses into a
/// single underscore, which also absorbs an underscore directly following the run.
///
/// ```
/// assert_eq!(statsq_metrics::sanitize_bucket("a.b/c"), "a.b-c");
/// assert_eq!(statsq_metrics::sanitize_bucket("a.b@#*&_c"), "a.b_c");
/// ```
pub fn sanitize_bucket(raw: &str) -> String {
    let mut sanitized = String::with_capacity(raw.len());
    let mut replaced = false;

    for byte in raw.bytes() {
        match byte {
            b'/' => {
                sanitized.push('-');
                replaced = false;
            }
            b'_' if replaced => (),
            b if is_name_byte(b) => {
                sanitized.push(char::from(b));
                replaced = false;
            }
            _ if replaced => (),
            _ => {
                sanitized.push('_');
                replaced = true;
            }
        }
    }

    sanitized
}
