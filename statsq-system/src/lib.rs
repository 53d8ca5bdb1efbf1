//! Foundational system components for statsq's services.
//!
//! The [`Controller`] owns the process-wide shutdown signal. Long-running services obtain a
//! [`ShutdownHandle`] from it and select on [`ShutdownHandle::notified`] in their main loop.
#![warn(missing_docs)]

mod controller;

pub use self::controller::*;
