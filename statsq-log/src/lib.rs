//! Logging facade and error helpers for statsq.
//!
//! All crates in the workspace log through the macros re-exported here, which forward to
//! [`tracing`]. Call [`init`] once during startup to install the global subscriber; without it,
//! log statements are discarded.
//!
//! # Example
//!
//! ```
//! let error = std::io::Error::other("connection refused");
//! statsq_log::error!(error = &error as &dyn std::error::Error, "failed to send to graphite");
//! ```
//!
//! # Testing
//!
//! Tests can opt into log capture with the `test` feature and [`init_test!`]. Only the calling
//! crate is captured, at `TRACE` level.
#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
mod test;
#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{Level, debug, enabled, error, info, trace, warn};
