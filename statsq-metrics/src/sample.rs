use std::fmt::{self, Write};

use serde::Serialize;
use statsq_common::UnixTimestamp;

use crate::bucket_id::write_wire_name;
use crate::protocol::Dimensions;

/// A reduced, point-in-time value produced by a flush.
///
/// Samples are published on the [`SampleBus`](crate::SampleBus) and rendered into plaintext
/// lines for the output sink:
///
/// ```text
/// <name>[_<key>=<value>,...] <value> <timestamp>
/// ```
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Sample {
    /// The bucket name or a name derived from it, such as `<bucket>.upper`.
    pub name: String,
    /// Dimensions of the bucket this sample was reduced from.
    pub dimensions: Dimensions,
    /// The reduced value.
    pub value: f64,
    /// The time of the flush that produced this sample.
    pub timestamp: UnixTimestamp,
}

impl Sample {
    /// Returns the name with dimensions rendered as qualifiers.
    pub fn wire_name(&self) -> String {
        let mut name = String::with_capacity(self.name.len());
        write_wire_name(&mut name, &self.name, &self.dimensions);
        name
    }

    /// Appends this sample as a newline-terminated wire line.
    pub fn write_line(&self, out: &mut String) {
        // Writing into a `String` cannot fail.
        let _ = writeln!(out, "{self}");
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.wire_name(), self.value, self.timestamp)
    }
}
