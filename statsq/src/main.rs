//! statsq is a statsd-compatible metrics aggregation daemon with support for dimensions.
//!
//! Clients send metrics over UDP, or optionally TCP, in the statsd line format, extended by an
//! optional list of dimensions:
//!
//! ```text
//! <bucket>:<value>|<type>[|@<sample rate>][ <key>=<value>,...]
//! ```
//!
//! statsq aggregates counters, gauges, sets and timers per bucket and dimensions, and flushes
//! the reduced values to Graphite in a fixed interval.
//!
//! # Usage
//!
//! ```text
//! statsq run --graphite graphite.local:2003 --percentiles 90,99
//! statsq config show --format yaml
//! ```
//!
//! Every flag can also be set through an environment variable prefixed with `STATSQ_`, or in a
//! YAML file passed with `--config`.
//!
//! # Workspace Crates
//!
//!  - `statsq`: Main entry point and command line interface.
//!  - `statsq-common`: Common utilities.
//!  - `statsq-config`: Static configuration for the CLI and server.
//!  - `statsq-log`: Logging and error reporting.
//!  - `statsq-metrics`: Metrics protocol, aggregation and flushing.
//!  - `statsq-server`: Listeners and the Graphite sink.
//!  - `statsq-system`: Shutdown handling for services.
//!  - `statsq-test`: Helpers for testing the services.

mod cli;
mod cliapp;
mod setup;

use std::process;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            statsq_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
