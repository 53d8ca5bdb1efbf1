//! The statsq daemon.
//!
//! This crate wires the aggregation core to the network:
//!
//!  - A UDP listener receives statsd datagrams.
//!  - An optional TCP listener receives newline-delimited statsd lines.
//!  - The flush service reduces aggregates on a fixed interval.
//!  - The Graphite sink writes every flush pass to a plaintext Graphite endpoint.
//!
//! Use [`run`] to start the daemon and block until it is shut down by a signal.
#![warn(missing_docs)]

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use statsq_config::Config;
use statsq_system::Controller;

mod graphite;
mod service;
mod tcp;
mod udp;

pub use self::graphite::*;
pub use self::service::*;
pub use self::tcp::*;
pub use self::udp::*;

/// Time granted to the final flush on an immediate shutdown.
const IMMEDIATE_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding a listener failed.
    #[error("could not bind to {addr}")]
    Bind {
        /// The requested address.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The local address of a bound socket could not be determined.
    #[error("could not determine local address")]
    LocalAddr(#[source] io::Error),

    /// The runtime could not be created.
    #[error("could not create runtime")]
    Runtime(#[source] io::Error),
}

/// Runs the daemon until a shutdown signal is received.
///
/// `SIGTERM` shuts down gracefully within the configured timeout. `SIGINT` and `SIGQUIT` only
/// allow a short grace period for the final flush.
pub fn run(config: Config) -> Result<(), ServerError> {
    let runtime = create_runtime("statsq-rt")?;

    runtime.block_on(async {
        let controller = Controller::new(config.shutdown_timeout());
        controller.start();

        let state = ServiceState::start(&config, controller.handle()).await?;

        let shutdown = controller.handle().notified().await;
        statsq_log::info!("shutting down");

        let timeout = shutdown.timeout.unwrap_or(IMMEDIATE_SHUTDOWN_GRACE);
        if tokio::time::timeout(timeout, state.join()).await.is_err() {
            statsq_log::warn!("services did not stop within {timeout:?}");
        }

        Ok(())
    })
}
