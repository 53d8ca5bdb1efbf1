use std::io;
use std::time::Duration;

use statsq_metrics::FlushLines;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Maximum time to establish a connection and write one batch.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of flushed batches waiting for delivery before new ones are dropped.
pub const GRAPHITE_QUEUE_SIZE: usize = 4;

#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Writes flushed lines to a Graphite plaintext endpoint.
///
/// Every batch is written over a fresh connection. Failures are logged and the batch is lost;
/// aggregation is never affected.
#[derive(Debug)]
pub struct GraphiteService {
    addr: String,
    receiver: mpsc::Receiver<FlushLines>,
}

impl GraphiteService {
    /// Creates the service and the sender to hand to the flush service.
    pub fn new(addr: impl Into<String>) -> (mpsc::Sender<FlushLines>, Self) {
        let (sender, receiver) = mpsc::channel(GRAPHITE_QUEUE_SIZE);
        let service = Self {
            addr: addr.into(),
            receiver,
        };
        (sender, service)
    }

    /// Spawns the sender loop.
    ///
    /// The loop ends once all senders are dropped and remaining batches have been written, which
    /// includes the final flush on shutdown.
    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            statsq_log::info!(addr = %self.addr, "sending metrics to graphite");

            while let Some(batch) = self.receiver.recv().await {
                match tokio::time::timeout(SEND_TIMEOUT, self.send(&batch)).await {
                    Ok(Ok(())) => {
                        statsq_log::debug!(count = batch.count, "sent metrics to graphite");
                    }
                    Ok(Err(error)) => self.report(&error, &batch),
                    Err(_) => self.report(&SendError::Timeout(SEND_TIMEOUT), &batch),
                }
            }
        })
    }

    async fn send(&self, batch: &FlushLines) -> Result<(), SendError> {
        let mut stream = TcpStream::connect(self.addr.as_str()).await?;
        stream.write_all(batch.lines.as_bytes()).await?;
        stream.shutdown().await?;
        Ok(())
    }

    fn report(&self, error: &SendError, batch: &FlushLines) {
        statsq_log::error!(
            error = error as &dyn std::error::Error,
            addr = %self.addr,
            count = batch.count,
            "failed to send metrics to graphite"
        );
    }
}
