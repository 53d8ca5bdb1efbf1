use std::net::SocketAddr;
use std::sync::Arc;

use statsq_config::Config;
use statsq_metrics::{Aggregator, FlushService, SampleBusHandle};
use statsq_system::ShutdownHandle;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use crate::ServerError;
use crate::graphite::GraphiteService;
use crate::tcp::TcpService;
use crate::udp::UdpService;

/// Constructs the multi-threaded tokio [`Runtime`] running all services.
pub fn create_runtime(name: &str) -> Result<Runtime, ServerError> {
    tokio::runtime::Builder::new_multi_thread()
        .thread_name(name)
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)
}

/// Running services of the daemon.
#[derive(Debug)]
pub struct ServiceState {
    aggregator: Arc<Aggregator>,
    bus: SampleBusHandle,
    udp_addr: SocketAddr,
    tcp_addr: Option<SocketAddr>,
    handles: Vec<JoinHandle<()>>,
}

impl ServiceState {
    /// Binds all listeners and starts the services.
    ///
    /// Listeners stop on shutdown. The flush service then performs its final flush, after which
    /// the Graphite sink drains its queue and the sample bus closes.
    pub async fn start(config: &Config, shutdown: ShutdownHandle) -> Result<Self, ServerError> {
        let aggregator = Arc::new(Aggregator::new(config.aggregator_config()));
        let parser = Arc::new(config.packet_parser());

        let udp = UdpService::bind(config.udp_addr(), aggregator.clone(), parser.clone()).await?;
        let udp_addr = udp.local_addr()?;

        let tcp = match config.tcp_addr() {
            Some(addr) => Some(TcpService::bind(addr, aggregator.clone(), parser).await?),
            None => None,
        };
        let tcp_addr = tcp.as_ref().map(TcpService::local_addr).transpose()?;

        let mut handles = Vec::new();
        let mut flush = FlushService::new(aggregator.clone(), config.flush_config());

        match config.graphite().addr() {
            Some(addr) => {
                let (sender, graphite) = GraphiteService::new(addr);
                flush = flush.with_output(sender);
                handles.push(graphite.start());
            }
            None => statsq_log::info!("graphite output disabled"),
        }

        statsq_log::info!("udp listening on {udp_addr}");
        handles.push(udp.start(shutdown.clone()));

        if let (Some(tcp), Some(addr)) = (tcp, tcp_addr) {
            statsq_log::info!("tcp listening on {addr}");
            handles.push(tcp.start(shutdown.clone()));
        }

        let bus = flush.bus();
        handles.push(flush.start(shutdown));

        Ok(Self {
            aggregator,
            bus,
            udp_addr,
            tcp_addr,
            handles,
        })
    }

    /// The shared aggregation store.
    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// A handle to subscribe to flushed samples.
    pub fn bus(&self) -> &SampleBusHandle {
        &self.bus
    }

    /// The bound UDP address.
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// The bound TCP address, if TCP ingestion is enabled.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// Waits for all services to complete.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(error) = handle.await {
                statsq_log::error!(
                    error = &error as &dyn std::error::Error,
                    "service terminated abnormally"
                );
            }
        }
    }
}
