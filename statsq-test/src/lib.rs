//! Helpers for testing the listeners and services.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner. All logs emitted with [`statsq_log`] will show up for test
//!    failures or when run with `--nocapture`.
//!
//! # Example
//!
//! ```no_run
//! #[test]
//! fn my_test() {
//!     statsq_test::setup();
//!
//!     statsq_log::debug!("hello, world!");
//! }
//! ```

use std::time::Duration;

use statsq_system::Controller;

mod mock_graphite;

pub use self::mock_graphite::MockGraphite;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from this crate and mutes all other logs.
pub fn setup() {
    statsq_log::init_test!();
}

/// Creates a [`Controller`] with a short graceful shutdown timeout.
///
/// The controller does not listen for process signals. Tests trigger shutdowns through
/// [`Controller::shutdown`].
pub fn controller() -> Controller {
    Controller::new(Duration::from_secs(1))
}
