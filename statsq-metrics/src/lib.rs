//! Statsd metrics with dimensions: parsing, aggregation and flushing.
//!
//! # Protocol
//!
//! Clients submit metrics in a [text-based protocol](PacketParser) based on StatsD, extended with
//! dimensions. A single UDP datagram or TCP stream can carry many lines:
//!
//! ```text
//! endpoint.hits:1|c
//! endpoint.hits:1|c|@0.5 route=user_index,region=eu
//! endpoint.response_time:57|ms route=user_index
//! endpoint.queue:+3|g
//! endpoint.users:3182887624|s
//! ```
//!
//! The syntax of a line is:
//!
//! ```text
//! <bucket>:<value>|<type>[|@<sampling>][ <key>=<value>,...]
//! ```
//!
//! The bucket name is sanitized: slashes become dashes, and other characters outside of
//! `[A-Za-z0-9_.-]` are collapsed into a single underscore. A configured prefix and postfix are
//! added afterwards.
//!
//! # Metric Types
//!
//! - **Counter** (`c`): Values are summed up after dividing by the sample rate. Counters keep
//!   reporting `0` for a configured number of flushes after they become inactive.
//! - **Gauge** (`g`): Values replace the current value. A leading `+` or `-` applies a delta
//!   instead, clamped to `[0, f64::MAX]`.
//! - **Timer** (`ms`): All values are collected and reduced to `mean`, `upper`, `lower`, `count`,
//!   and any configured [`Percentiles`].
//! - **Set** (`s`): Reports the number of distinct values received since the last flush.
//!
//! # Aggregation and Flushing
//!
//! Packets are identified by their bucket name and dimensions, see [`BucketKey`], and aggregated
//! in the [`Aggregator`]. The [`FlushService`] periodically reduces the aggregator into
//! [`Sample`]s, which are rendered as plaintext lines for an output sink and published on the
//! [`SampleBus`]:
//!
//! ```text
//! endpoint.hits_region=eu,route=user_index 2 1418052649
//! endpoint.response_time.upper_90_route=user_index 57 1418052649
//! ```
#![warn(missing_docs)]

mod aggregator;
mod bucket_id;
mod packet;
mod percentile;
mod protocol;
mod sample;
mod service;

pub use self::aggregator::*;
pub use self::bucket_id::*;
pub use self::packet::*;
pub use self::percentile::*;
pub use self::protocol::*;
pub use self::sample::*;
pub use self::service::*;
