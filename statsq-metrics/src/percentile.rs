use std::fmt;
use std::str::FromStr;

/// The end of a sorted sample set from which a percentile is counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tail {
    /// Counted from the top, configured as a positive number.
    Upper,
    /// Counted from the bottom, configured as a negative number.
    Lower,
}

impl Tail {
    /// Returns the name of this tail as used in derived metric names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tail::Upper => "upper",
            Tail::Lower => "lower",
        }
    }
}

/// An error returned when a percentile list contains an invalid entry.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid percentile {entry:?}, expected a number in [-100, 100] other than 0")]
pub struct ParsePercentileError {
    /// The offending entry as configured.
    pub entry: String,
}

/// A configured timer percentile.
///
/// The sign of the configured number selects the [`Tail`]; the fraction is always positive.
#[derive(Clone, Debug, PartialEq)]
pub struct Percentile {
    tail: Tail,
    fraction: f64,
    label: String,
}

impl Percentile {
    /// The tail this percentile is counted from.
    pub fn tail(&self) -> Tail {
        self.tail
    }

    /// The percentile as a positive number in `(0, 100]`.
    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// The name-safe label, with `.` replaced by `_` and the sign retained.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The suffix appended to timer names, such as `upper_90` or `lower_0_5`.
    pub fn name_suffix(&self) -> String {
        let magnitude = self.label.trim_start_matches('-');
        format!("{}_{magnitude}", self.tail.as_str())
    }

    /// Selects the value of this percentile from values sorted in ascending order.
    ///
    /// Uses nearest rank with rounding half up. With fewer than two values, this is the maximum.
    /// Returns `None` for an empty slice.
    pub fn select(&self, sorted: &[f64]) -> Option<f64> {
        let last = sorted.len().checked_sub(1)?;
        if sorted.len() < 2 {
            return sorted.get(last).copied();
        }

        let count = sorted.len() as f64;
        let index = match self.tail {
            Tail::Upper => (self.fraction / 100.0 * count + 0.5).floor() - 1.0,
            Tail::Lower => ((100.0 - self.fraction) / 100.0 * count + 0.5).floor(),
        };

        // Saturating float-to-int cast maps negative indexes to 0.
        let index = (index as usize).min(last);
        sorted.get(index).copied()
    }
}

impl fmt::Display for Percentile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label.replace('_', "."))
    }
}

impl FromStr for Percentile {
    type Err = ParsePercentileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = || ParsePercentileError {
            entry: s.to_owned(),
        };

        let text = s.trim();
        let text = text.strip_prefix('+').unwrap_or(text);
        let value: f64 = text.parse().map_err(|_| error())?;
        if !value.is_finite() || value == 0.0 || value.abs() > 100.0 {
            return Err(error());
        }

        let tail = if value < 0.0 { Tail::Lower } else { Tail::Upper };

        Ok(Self {
            tail,
            fraction: value.abs(),
            label: text.replace('.', "_"),
        })
    }
}

/// An ordered list of configured percentiles.
///
/// Parsed from a comma-separated list such as `90,-75,99.9`. An empty string yields an empty
/// list. Duplicates are kept and reported twice.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Percentiles(Vec<Percentile>);

impl Percentiles {
    /// Returns `true` if no percentiles are configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the percentiles in configured order.
    pub fn iter(&self) -> std::slice::Iter<'_, Percentile> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a Percentiles {
    type Item = &'a Percentile;
    type IntoIter = std::slice::Iter<'a, Percentile>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for Percentiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, percentile) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{percentile}")?;
        }
        Ok(())
    }
}

impl FromStr for Percentiles {
    type Err = ParsePercentileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }

        s.split(',').map(str::parse).collect::<Result<_, _>>().map(Self)
    }
}

statsq_common::impl_str_serde!(Percentiles, "a comma-separated list of percentiles");
