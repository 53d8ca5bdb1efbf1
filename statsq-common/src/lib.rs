//! Common functionality for the statsq aggregation daemon.
#![warn(missing_docs)]

mod macros;
mod time;

pub use crate::time::*;
