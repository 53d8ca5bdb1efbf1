use std::net::SocketAddr;
use std::sync::Arc;

use statsq_metrics::{Aggregator, PacketParser};
use statsq_system::ShutdownHandle;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::ServerError;

/// Receives statsd datagrams and applies them to the [`Aggregator`].
#[derive(Debug)]
pub struct UdpService {
    socket: UdpSocket,
    aggregator: Arc<Aggregator>,
    parser: Arc<PacketParser>,
}

impl UdpService {
    /// Binds the socket.
    pub async fn bind(
        addr: SocketAddr,
        aggregator: Arc<Aggregator>,
        parser: Arc<PacketParser>,
    ) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|error| ServerError::Bind { addr, error })?;

        Ok(Self {
            socket,
            aggregator,
            parser,
        })
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.socket.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Spawns the receive loop, which runs until shutdown.
    pub fn start(self, mut shutdown: ShutdownHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            let max_size = self.parser.max_packet_size();
            // One extra byte detects datagrams the socket had to truncate.
            let mut buf = vec![0; max_size + 1];

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.notified() => break,
                    result = self.socket.recv_from(&mut buf) => match result {
                        Ok((len, peer)) => self.handle_datagram(&buf[..len], max_size, peer),
                        Err(error) => statsq_log::error!(
                            error = &error as &dyn std::error::Error,
                            "failed to receive datagram"
                        ),
                    },
                }
            }

            statsq_log::info!("udp listener stopped");
        })
    }

    fn handle_datagram(&self, datagram: &[u8], max_size: usize, peer: SocketAddr) {
        let payload = complete_lines(datagram, max_size);
        if payload.len() < datagram.len() {
            statsq_log::debug!(%peer, max_size, "dropping truncated line of oversized datagram");
        }

        for packet in self.parser.parse_all(payload) {
            self.aggregator.insert(packet);
        }
    }
}

/// Returns the part of `datagram` that fits into `max_size`.
///
/// If the datagram exceeds the limit, its trailing line was cut off and is dropped.
fn complete_lines(datagram: &[u8], max_size: usize) -> &[u8] {
    if datagram.len() <= max_size {
        return datagram;
    }

    let truncated = &datagram[..max_size];
    match truncated.iter().rposition(|&b| b == b'\n') {
        Some(index) => &truncated[..index],
        None => &[],
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use similar_asserts::assert_eq;
    use statsq_common::UnixTimestamp;
    use statsq_metrics::AggregatorConfig;

    use super::*;

    #[test]
    fn test_complete_lines() {
        let datagram = &b"a:1|c\nb:2|c"[..];
        assert_eq!(complete_lines(datagram, 11), datagram);
        assert_eq!(complete_lines(datagram, 10), &b"a:1|c"[..]);
        assert!(complete_lines(b"abcdefgh", 4).is_empty());
    }

    #[tokio::test]
    async fn test_receive() {
        statsq_test::setup();

        let controller = statsq_test::controller();
        let aggregator = Arc::new(Aggregator::new(AggregatorConfig::default()));
        let service = UdpService::bind(
            "127.0.0.1:0".parse().unwrap(),
            aggregator.clone(),
            Arc::new(PacketParser::default()),
        )
        .await
        .unwrap();

        let addr = service.local_addr().unwrap();
        let handle = service.start(controller.handle());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"gorets:1|c\ngorets:2|c\nbogus\n", addr)
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while aggregator.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        controller.shutdown(None);
        handle.await.unwrap();

        let samples = aggregator.flush(UnixTimestamp::from_secs(1));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].to_string(), "gorets 3 1");
    }
}
