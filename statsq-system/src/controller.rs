use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Shutdown request message sent by the [`Controller`] to subscribed services.
///
/// A handler has to ensure that it doesn't take longer than `timeout` to resolve the future.
/// Ideally, open work is persisted or finished in an orderly manner but no new requests are
/// accepted anymore.
///
/// The [`timeout`](Self::timeout) indicates the kind of shutdown:
///
///  - `Some(Duration)` initiates a graceful shutdown. Services should finish their current work
///    within the given duration.
///  - `None` initiates an immediate shutdown. Services may still flush once, but should not wait
///    on remote peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced shutdown.
    pub timeout: Option<Duration>,
}

/// Notifies a service about an upcoming shutdown.
///
/// The handle can be cloned and passed to any number of services.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Returns the current shutdown state, if a shutdown has already been requested.
    pub fn get(&self) -> Option<Shutdown> {
        *self.0.borrow()
    }

    /// Wait for a shutdown.
    ///
    /// This receives all shutdown signals since the [`Controller`] has been started, even before
    /// this shutdown handle has been obtained.
    ///
    /// # Cancel safety
    ///
    /// This function is cancellation safe.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            if let Some(shutdown) = *self.0.borrow_and_update() {
                return shutdown;
            }

            // The sender is owned by the controller. Once it is gone, nobody can request a
            // shutdown anymore and this handle waits forever.
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Service to start and gracefully stop the system runtime.
///
/// The controller listens for process signals after [`Controller::start`]:
///
///  - `SIGTERM` triggers a graceful shutdown with the configured timeout.
///  - `SIGINT` and `SIGQUIT` trigger an immediate shutdown.
///
/// Shutdowns can also be requested programmatically through [`Controller::shutdown`].
///
/// ### Example
///
/// ```
/// use std::time::Duration;
/// use statsq_system::Controller;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let controller = Controller::new(Duration::from_secs(10));
/// let mut handle = controller.handle();
///
/// controller.shutdown(None);
/// assert_eq!(handle.notified().await.timeout, None);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Controller {
    timeout: Duration,
    sender: Arc<watch::Sender<Option<Shutdown>>>,
}

impl Controller {
    /// Creates a new controller with the given timeout for graceful shutdowns.
    pub fn new(timeout: Duration) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            timeout,
            sender: Arc::new(sender),
        }
    }

    /// Spawns the signal monitor on the current runtime.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            if let Err(error) = controller.monitor_signals().await {
                statsq_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to listen for shutdown signals"
                );
            }
        });
    }

    /// Returns a [`ShutdownHandle`] that resolves once a shutdown is requested.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.sender.subscribe())
    }

    /// Requests a shutdown of all services.
    ///
    /// The first request wins. Subsequent requests are ignored, unless a graceful shutdown is
    /// upgraded to an immediate one.
    pub fn shutdown(&self, timeout: Option<Duration>) {
        self.sender.send_if_modified(|state| match state {
            Some(Shutdown { timeout: Some(_) }) if timeout.is_none() => {
                *state = Some(Shutdown { timeout });
                true
            }
            Some(_) => false,
            None => {
                *state = Some(Shutdown { timeout });
                true
            }
        });
    }

    /// Requests a graceful shutdown with the configured timeout.
    pub fn shutdown_graceful(&self) {
        self.shutdown(Some(self.timeout));
    }

    #[cfg(unix)]
    async fn monitor_signals(&self) -> io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sig_int = signal(SignalKind::interrupt())?;
        let mut sig_quit = signal(SignalKind::quit())?;
        let mut sig_term = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                biased;

                Some(()) = sig_int.recv() => {
                    statsq_log::info!("SIGINT received, exiting");
                    self.shutdown(None);
                }
                Some(()) = sig_quit.recv() => {
                    statsq_log::info!("SIGQUIT received, exiting");
                    self.shutdown(None);
                }
                Some(()) = sig_term.recv() => {
                    statsq_log::info!("SIGTERM received, stopping in {}s", self.timeout.as_secs());
                    self.shutdown_graceful();
                }
                else => break,
            }
        }

        Ok(())
    }

    #[cfg(not(unix))]
    async fn monitor_signals(&self) -> io::Result<()> {
        tokio::signal::ctrl_c().await?;
        statsq_log::info!("SIGINT received, exiting");
        self.shutdown(None);
        Ok(())
    }
}
