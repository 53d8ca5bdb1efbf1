use std::iter::FusedIterator;

use crate::protocol::{Dimensions, GaugeSign, MetricType, ParseMetricError, sanitize_bucket};

/// The default maximum length of a single metric line, derived from the UDP MTU.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1472;

/// The value carried by a [`Packet`], tagged by metric type.
#[derive(Clone, Debug, PartialEq)]
pub enum PacketValue {
    /// A counter increment. May be negative.
    Counter(f64),
    /// A gauge update.
    ///
    /// Without a sign, `value` replaces the current gauge. With a sign, `value` is the
    /// non-negative magnitude of a relative update.
    Gauge {
        /// The absolute value or the magnitude of the delta.
        value: f64,
        /// The direction of a relative update, `None` for absolute values.
        sign: Option<GaugeSign>,
    },
    /// A non-negative timer observation.
    Timer(f64),
    /// A raw set member, compared by string equality.
    Set(String),
}

impl PacketValue {
    /// Returns the metric type of this value.
    pub fn ty(&self) -> MetricType {
        match self {
            PacketValue::Counter(_) => MetricType::Counter,
            PacketValue::Gauge { .. } => MetricType::Gauge,
            PacketValue::Timer(_) => MetricType::Timer,
            PacketValue::Set(_) => MetricType::Set,
        }
    }
}

/// A single parsed metric line.
///
/// ```text
/// <bucket>:<value>|<type>[|@<sampling>][ <key>=<value>,...]
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    /// The sanitized bucket name including the configured prefix and postfix.
    pub bucket: String,
    /// The observed value.
    pub value: PacketValue,
    /// Sampling rate in `(0, 1]`. Only counters are scaled by it.
    pub sampling: f64,
    /// Dimensions attached to this observation.
    pub dimensions: Dimensions,
}

/// Parser for statsd lines with dimensions.
///
/// The parser sanitizes bucket names and applies the configured prefix and postfix. Lines longer
/// than the maximum packet size are rejected.
///
/// # Example
///
/// ```
/// use statsq_metrics::{PacketParser, PacketValue};
///
/// let parser = PacketParser::default();
/// let packet = parser.parse(b"gorets:2|c|@0.1 host=a").unwrap();
///
/// assert_eq!(packet.bucket, "gorets");
/// assert_eq!(packet.value, PacketValue::Counter(2.0));
/// assert_eq!(packet.sampling, 0.1);
/// assert_eq!(packet.dimensions["host"], "a");
/// ```
#[derive(Clone, Debug)]
pub struct PacketParser {
    prefix: String,
    postfix: String,
    max_packet_size: usize,
}

impl PacketParser {
    /// Creates a parser with the given bucket prefix, postfix and maximum line length.
    pub fn new(prefix: impl Into<String>, postfix: impl Into<String>, max_packet_size: usize) -> Self {
        Self {
            prefix: prefix.into(),
            postfix: postfix.into(),
            max_packet_size,
        }
    }

    /// Returns the maximum accepted length of a single line in bytes.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn parse_str(&self, line: &str) -> Option<Packet> {
        if line.is_empty() || line.len() > self.max_packet_size {
            return None;
        }

        let (raw_bucket, rest) = line.split_once(':')?;
        if raw_bucket.is_empty() {
            return None;
        }

        let (metric, raw_dimensions) = match rest.split_once(' ') {
            Some((metric, dimensions)) => (metric, Some(dimensions)),
            None => (rest, None),
        };

        let mut components = metric.split('|');
        let raw_value = components.next()?;
        let ty = components.next()?.parse().ok()?;
        let sampling = match components.next() {
            Some(component) => parse_sampling(component)?,
            None => 1.0,
        };
        if components.next().is_some() {
            return None;
        }

        let value = match ty {
            MetricType::Counter => PacketValue::Counter(parse_finite(raw_value)?),
            MetricType::Gauge => parse_gauge(raw_value)?,
            MetricType::Timer => {
                // `+ 0.0` turns a negative zero into a positive one.
                PacketValue::Timer(parse_finite(raw_value).filter(|v| *v >= 0.0)? + 0.0)
            }
            MetricType::Set if raw_value.is_empty() => return None,
            MetricType::Set => PacketValue::Set(raw_value.to_owned()),
        };

        let dimensions = raw_dimensions.map(parse_dimensions).unwrap_or_default();

        let mut bucket = String::with_capacity(self.prefix.len() + raw_bucket.len() + self.postfix.len());
        bucket.push_str(&self.prefix);
        bucket.push_str(&sanitize_bucket(raw_bucket));
        bucket.push_str(&self.postfix);

        Some(Packet {
            bucket,
            value,
            sampling,
            dimensions,
        })
    }

    /// Parses a single metric line.
    ///
    /// The slice must not contain a newline. Use [`parse_all`](Self::parse_all) for payloads with
    /// multiple lines.
    pub fn parse(&self, line: &[u8]) -> Result<Packet, ParseMetricError> {
        let string = std::str::from_utf8(line).map_err(|_| ParseMetricError(()))?;
        self.parse_str(string).ok_or(ParseMetricError(()))
    }

    /// Parses all lines of a payload.
    ///
    /// Lines are separated by `\n`, a trailing `\r` is stripped, and empty lines are skipped.
    /// Malformed lines are logged at debug level and skipped, so the iterator only yields valid
    /// packets.
    ///
    /// # Example
    ///
    /// ```
    /// use statsq_metrics::PacketParser;
    ///
    /// let parser = PacketParser::default();
    /// let data = b"a.key.with-0.dash:4|c\ngarbage\ngauge:3|g\n";
    ///
    /// assert_eq!(parser.parse_all(data).count(), 2);
    /// ```
    pub fn parse_all<'a>(&'a self, slice: &'a [u8]) -> ParsePackets<'a> {
        ParsePackets {
            parser: self,
            slice,
        }
    }
}

impl Default for PacketParser {
    fn default() -> Self {
        Self::new("", "", DEFAULT_MAX_PACKET_SIZE)
    }
}

/// Parses a float and rejects infinity and NaN.
fn parse_finite(string: &str) -> Option<f64> {
    string.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses the `@<rate>` component.
fn parse_sampling(string: &str) -> Option<f64> {
    let rate = string.strip_prefix('@')?.parse::<f64>().ok()?;
    (rate > 0.0 && rate <= 1.0).then_some(rate)
}

fn parse_gauge(string: &str) -> Option<PacketValue> {
    let (sign, magnitude) = match string.as_bytes().first()? {
        b'+' => (Some(GaugeSign::Plus), &string[1..]),
        b'-' => (Some(GaugeSign::Minus), &string[1..]),
        _ => (None, string),
    };

    let value = parse_finite(magnitude)?;
    if sign.is_some() && value < 0.0 {
        return None;
    }

    Some(PacketValue::Gauge { value, sign })
}

/// Parses `key=value` pairs separated by commas. Malformed pairs are skipped.
fn parse_dimensions(string: &str) -> Dimensions {
    let mut dimensions = Dimensions::new();

    for pair in string.split(',') {
        let Some((key, value)) = pair.trim().split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        dimensions.insert(key.to_owned(), value.to_owned());
    }

    dimensions
}

/// Iterator over parsed packets returned from [`PacketParser::parse_all`].
#[derive(Clone, Debug)]
pub struct ParsePackets<'a> {
    parser: &'a PacketParser,
    slice: &'a [u8],
}

impl Iterator for ParsePackets<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();

            let current = current.strip_suffix(b"\r").unwrap_or(current);
            if current.is_empty() {
                continue;
            }

            match self.parser.parse(current) {
                Ok(packet) => return Some(packet),
                Err(error) => statsq_log::debug!(
                    error = &error as &dyn std::error::Error,
                    line = %String::from_utf8_lossy(current),
                    "dropping malformed metric line"
                ),
            }
        }
    }
}

impl FusedIterator for ParsePackets<'_> {}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn parse(line: &str) -> Option<Packet> {
        PacketParser::default().parse(line.as_bytes()).ok()
    }

    #[test]
    fn test_parse_gauge() {
        let packet = parse("gaugor:333|g").unwrap();
        assert_eq!(packet.bucket, "gaugor");
        assert_eq!(
            packet.value,
            PacketValue::Gauge {
                value: 333.0,
                sign: None
            }
        );
        assert_eq!(packet.sampling, 1.0);
        assert!(packet.dimensions.is_empty());
    }

    #[test]
    fn test_parse_gauge_relative() {
        assert_eq!(
            parse("gaugor:-10|g").unwrap().value,
            PacketValue::Gauge {
                value: 10.0,
                sign: Some(GaugeSign::Minus)
            }
        );
        assert_eq!(
            parse("gaugor:+4|g").unwrap().value,
            PacketValue::Gauge {
                value: 4.0,
                sign: Some(GaugeSign::Plus)
            }
        );
    }

    #[test]
    fn test_parse_gauge_large_and_fractional() {
        assert_eq!(
            parse("gaugor:18446744073709551606|g").unwrap().value,
            PacketValue::Gauge {
                value: 18446744073709551606.0,
                sign: None
            }
        );
        assert_eq!(
            parse("gaugor:3.3333|g").unwrap().value,
            PacketValue::Gauge {
                value: 3.3333,
                sign: None
            }
        );
    }

    #[test]
    fn test_parse_counter() {
        let packet = parse("gorets:2|c|@0.1").unwrap();
        assert_eq!(packet.value, PacketValue::Counter(2.0));
        assert_eq!(packet.sampling, 0.1);

        assert_eq!(parse("gorets:-4|c").unwrap().value, PacketValue::Counter(-4.0));
        assert_eq!(parse("gorets:1.25|c").unwrap().value, PacketValue::Counter(1.25));
    }

    #[test]
    fn test_parse_timer() {
        assert_eq!(parse("glork:320|ms").unwrap().value, PacketValue::Timer(320.0));

        let packet = parse("glork:320|ms|@0.1").unwrap();
        assert_eq!(packet.value, PacketValue::Timer(320.0));
        assert_eq!(packet.sampling, 0.1);

        assert_eq!(parse("glork:3.7211|ms").unwrap().value, PacketValue::Timer(3.7211));
    }

    #[test]
    fn test_parse_timer_negative_zero() {
        let PacketValue::Timer(value) = parse("glork:-0|ms").unwrap().value else {
            panic!("expected a timer");
        };
        assert!(value.is_sign_positive());
        assert_eq!(value.to_string(), "0");
    }

    #[test]
    fn test_parse_set() {
        let packet = parse("uniques:765|s").unwrap();
        assert_eq!(packet.value, PacketValue::Set("765".to_owned()));
        assert_eq!(packet.value.ty(), MetricType::Set);
    }

    #[test]
    fn test_parse_dimensions() {
        let packet = parse("gaugor:333|g key1=val1").unwrap();
        assert_eq!(
            packet.dimensions,
            Dimensions::from([("key1".to_owned(), "val1".to_owned())])
        );

        let packet = parse("gaugor:333|g key2=val2,key1=val1").unwrap();
        assert_eq!(
            packet.dimensions,
            Dimensions::from([
                ("key1".to_owned(), "val1".to_owned()),
                ("key2".to_owned(), "val2".to_owned()),
            ])
        );
    }

    #[test]
    fn test_parse_dimensions_skip_malformed() {
        let packet = parse("gaugor:333|g novalue,=empty,key1=val1,").unwrap();
        assert_eq!(
            packet.dimensions,
            Dimensions::from([("key1".to_owned(), "val1".to_owned())])
        );
    }

    #[test]
    fn test_parse_sanitizes_bucket() {
        assert_eq!(parse("a.key.with-0.dash:4|c").unwrap().bucket, "a.key.with-0.dash");
        assert_eq!(parse("a.key.with/0.slash:4|c").unwrap().bucket, "a.key.with-0.slash");
        assert_eq!(
            parse("a.key.with@#*&%$^_0.garbage:4|c").unwrap().bucket,
            "a.key.with_0.garbage"
        );
    }

    #[test]
    fn test_parse_prefix_postfix() {
        let parser = PacketParser::new("test.", "", DEFAULT_MAX_PACKET_SIZE);
        assert_eq!(parser.parse(b"prefix:4|c").unwrap().bucket, "test.prefix");

        let parser = PacketParser::new("", ".test", DEFAULT_MAX_PACKET_SIZE);
        assert_eq!(parser.parse(b"postfix:4|c").unwrap().bucket, "postfix.test");
    }

    #[test]
    fn test_parse_rejects() {
        for line in [
            "",
            "gorets",
            "gorets:",
            "gorets:5m",
            "gorets:5|mg",
            "gorets:5|ms|@",
            "gorets:5|c|@0",
            "gorets:5|c|@1.5",
            "gorets:5|c|@0.1|extra",
            "gorets:xxx|c",
            "gorets:inf|c",
            "gaugor:xxx|g",
            "gaugor:xxx|z",
            "gaugor:+|g",
            "gaugor:+-3|g",
            "glork:-1|ms",
            "uniques:|s",
            ":4|c",
            "deploys.test.myservice4:100|t",
            "up-to-colon:",
            "up-to-pipe:1|",
            "a.key.with-0.dash:4",
            "a.key.with-0.dash:4\ngauge3|g",
        ] {
            assert_eq!(parse(line), None, "{line:?} should be rejected");
        }
    }

    #[test]
    fn test_parse_rejects_oversized() {
        let parser = PacketParser::new("", "", 16);
        assert!(parser.parse(b"short:1|c").is_ok());
        assert!(parser.parse(b"much.longer.bucket:1|c").is_err());
    }

    #[test]
    fn test_parse_rejects_invalid_utf8() {
        assert!(PacketParser::default().parse(b"bad\xff:1|c").is_err());
    }

    #[test]
    fn test_parse_all() {
        let parser = PacketParser::default();
        let packets: Vec<_> = parser
            .parse_all(b"a.key.with-0.dash:4|c\ngauge:3|g")
            .collect();

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].bucket, "a.key.with-0.dash");
        assert_eq!(packets[0].value, PacketValue::Counter(4.0));
        assert_eq!(packets[1].bucket, "gauge");
        assert_eq!(
            packets[1].value,
            PacketValue::Gauge {
                value: 3.0,
                sign: None
            }
        );
    }

    #[test]
    fn test_parse_all_skips_malformed_and_empty() {
        let parser = PacketParser::default();
        let buckets: Vec<_> = parser
            .parse_all(b"\r\none:1|c\r\n\ngarbage\ntwo:2|ms\n\xff\xfe\nthree:x|s\n")
            .map(|packet| packet.bucket)
            .collect();

        assert_eq!(buckets, ["one", "two", "three"]);
    }
}
