//! Configuration for the statsq daemon.
//!
//! The effective [`Config`] is assembled from built-in defaults, an optional YAML file and
//! overrides from the command line or environment, in increasing order of precedence. All values
//! are validated once while loading, so the rest of the daemon can rely on them.
//!
//! # Example
//!
//! ```yaml
//! address: ":8125"
//! graphite: "graphite.local:2003"
//! flush_interval: 10
//! percentiles: "90,-75"
//! logging:
//!   level: info
//! ```
#![warn(missing_docs)]

mod config;
mod types;

pub use self::config::*;
pub use self::types::*;
