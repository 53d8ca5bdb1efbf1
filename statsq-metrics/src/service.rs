use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use statsq_common::UnixTimestamp;
use statsq_system::ShutdownHandle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::aggregator::Aggregator;
use crate::sample::Sample;

/// Parameters used by the [`FlushService`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Seconds between two flushes.
    ///
    /// Defaults to `10`.
    pub interval: u64,

    /// Number of samples buffered per bus subscriber before the oldest are dropped.
    ///
    /// Defaults to `4096`.
    pub bus_capacity: usize,

    /// Logs every emitted wire line at debug level.
    pub debug: bool,
}

impl FlushConfig {
    /// Returns the flush interval as duration, at least one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval: 10,
            bus_capacity: 4096,
            debug: false,
        }
    }
}

/// The rendered output of one flush pass, handed to the output sink.
#[derive(Clone, Debug, PartialEq)]
pub struct FlushLines {
    /// Newline-terminated wire lines in flush order.
    pub lines: String,
    /// The number of lines.
    pub count: usize,
}

/// Fan-out of flushed samples to any number of subscribers.
///
/// Every subscriber has its own bounded queue. A subscriber that falls behind loses its oldest
/// samples without affecting the flush or other subscribers. Once the bus is dropped, all
/// subscribers observe the end of the stream.
#[derive(Debug)]
pub struct SampleBus {
    sender: broadcast::Sender<Sample>,
    // Template for new subscriptions. Receivers do not keep the channel open.
    template: Arc<broadcast::Receiver<Sample>>,
}

impl SampleBus {
    /// Creates a bus with the given per-subscriber capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, template) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            template: Arc::new(template),
        }
    }

    /// Returns a handle to subscribe to this bus.
    pub fn handle(&self) -> SampleBusHandle {
        SampleBusHandle {
            template: self.template.clone(),
        }
    }

    /// Publishes a sample to all current subscribers.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, sample: Sample) -> usize {
        // The template counts as a receiver.
        self.sender.send(sample).map_or(0, |count| count.saturating_sub(1))
    }
}

/// A cloneable handle to create subscriptions on a [`SampleBus`].
///
/// Holding a handle does not keep the bus alive.
#[derive(Clone, Debug)]
pub struct SampleBusHandle {
    template: Arc<broadcast::Receiver<Sample>>,
}

impl SampleBusHandle {
    /// Subscribes to all samples published from now on.
    pub fn subscribe(&self) -> SampleSubscriber {
        SampleSubscriber {
            receiver: self.template.resubscribe(),
        }
    }
}

/// A single subscription to the [`SampleBus`].
#[derive(Debug)]
pub struct SampleSubscriber {
    receiver: broadcast::Receiver<Sample>,
}

impl SampleSubscriber {
    /// Receives the next sample.
    ///
    /// Returns `None` once the bus has been dropped and all buffered samples were received.
    /// Samples lost because this subscriber lagged behind are skipped with a warning.
    pub async fn recv(&mut self) -> Option<Sample> {
        loop {
            match self.receiver.recv().await {
                Ok(sample) => return Some(sample),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    statsq_log::warn!(skipped, "sample subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Service flushing the [`Aggregator`] on a fixed interval.
///
/// Each flush pass renders all samples into one [`FlushLines`] batch for the output sink and
/// publishes each sample on the [`SampleBus`]. Neither destination can block the pass: the sink
/// batch is dropped if the sink is still busy, and slow bus subscribers lose old samples.
///
/// On shutdown, the service performs one final flush and then drops the bus.
#[derive(Debug)]
pub struct FlushService {
    aggregator: Arc<Aggregator>,
    config: FlushConfig,
    bus: SampleBus,
    output: Option<mpsc::Sender<FlushLines>>,
}

impl FlushService {
    /// Creates a new flush service over the given aggregator.
    pub fn new(aggregator: Arc<Aggregator>, config: FlushConfig) -> Self {
        let bus = SampleBus::new(config.bus_capacity);
        Self {
            aggregator,
            config,
            bus,
            output: None,
        }
    }

    /// Sends rendered lines of each pass to the given sink.
    pub fn with_output(mut self, output: mpsc::Sender<FlushLines>) -> Self {
        self.output = Some(output);
        self
    }

    /// Returns a handle to subscribe to flushed samples.
    pub fn bus(&self) -> SampleBusHandle {
        self.bus.handle()
    }

    /// Runs a single flush pass and returns the number of produced samples.
    pub fn flush(&self, timestamp: UnixTimestamp) -> usize {
        let samples = self.aggregator.flush(timestamp);
        let count = samples.len();

        let mut lines = String::new();
        for sample in samples {
            sample.write_line(&mut lines);
            if self.config.debug {
                statsq_log::debug!("{sample}");
            }
            self.bus.publish(sample);
        }

        statsq_log::trace!(count, "flushed samples");

        if let Some(ref output) = self.output {
            if count > 0 {
                let batch = FlushLines { lines, count };
                if let Err(error) = output.try_send(batch) {
                    statsq_log::warn!(
                        error = &error as &dyn std::error::Error,
                        "dropping flushed lines"
                    );
                }
            }
        }

        count
    }

    /// Spawns the flush loop.
    ///
    /// The first flush happens one interval after start. The task completes after the final
    /// flush on shutdown.
    pub fn start(self, mut shutdown: ShutdownHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = self.config.interval();
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            statsq_log::info!("flushing every {}s", interval.as_secs());

            loop {
                tokio::select! {
                    biased;

                    _ = ticker.tick() => {
                        self.flush(UnixTimestamp::now());
                    }
                    _ = shutdown.notified() => break,
                }
            }

            let count = self.flush(UnixTimestamp::now());
            statsq_log::info!(count, "final flush complete");
        })
    }
}
