use std::cmp;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use futures::StreamExt;
use statsq_metrics::{Aggregator, PacketParser};
use statsq_system::ShutdownHandle;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedRead};

use crate::ServerError;

/// Splits a byte stream into lines of bounded length.
///
/// Incomplete lines stay buffered until the next read. Lines longer than the limit are skipped up
/// to the next newline without failing the stream. A trailing line without newline is returned
/// when the stream ends.
#[derive(Debug)]
pub struct LineCodec {
    max_length: usize,
    next_index: usize,
    discarding: bool,
}

impl LineCodec {
    /// Creates a codec that drops lines longer than `max_length` bytes.
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Decoder for LineCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, io::Error> {
        loop {
            let read_to = cmp::min(self.max_length.saturating_add(1), buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|&b| b == b'\n')
                .map(|offset| offset + self.next_index);

            match (self.discarding, newline) {
                (true, Some(index)) => {
                    buf.advance(index + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(index)) => {
                    self.next_index = 0;
                    let mut line = buf.split_to(index + 1);
                    line.truncate(index);
                    return Ok(Some(line));
                }
                (false, None) if buf.len() > self.max_length => {
                    statsq_log::debug!(max_length = self.max_length, "dropping overlong line");
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }

        self.next_index = 0;
        if self.discarding || buf.is_empty() {
            buf.clear();
            self.discarding = false;
            return Ok(None);
        }

        Ok(Some(buf.split()))
    }
}

/// Accepts stream connections carrying newline-delimited statsd lines.
#[derive(Debug)]
pub struct TcpService {
    listener: TcpListener,
    aggregator: Arc<Aggregator>,
    parser: Arc<PacketParser>,
}

impl TcpService {
    /// Binds the listener.
    pub async fn bind(
        addr: SocketAddr,
        aggregator: Arc<Aggregator>,
        parser: Arc<PacketParser>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|error| ServerError::Bind { addr, error })?;

        Ok(Self {
            listener,
            aggregator,
            parser,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Spawns the accept loop, which stops accepting on shutdown.
    ///
    /// Open connections are read until they close or shutdown is requested.
    pub fn start(self, mut shutdown: ShutdownHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.notified() => break,
                    result = self.listener.accept() => match result {
                        Ok((stream, peer)) => {
                            statsq_log::trace!(%peer, "accepted connection");
                            let connection = Connection {
                                aggregator: self.aggregator.clone(),
                                parser: self.parser.clone(),
                            };
                            tokio::spawn(connection.run(stream, shutdown.clone()));
                        }
                        Err(error) => statsq_log::error!(
                            error = &error as &dyn std::error::Error,
                            "failed to accept connection"
                        ),
                    },
                }
            }

            statsq_log::info!("tcp listener stopped");
        })
    }
}

struct Connection {
    aggregator: Arc<Aggregator>,
    parser: Arc<PacketParser>,
}

impl Connection {
    async fn run(self, stream: TcpStream, mut shutdown: ShutdownHandle) {
        let codec = LineCodec::new(self.parser.max_packet_size());
        let mut lines = FramedRead::new(stream, codec);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        for packet in self.parser.parse_all(&line) {
                            self.aggregator.insert(packet);
                        }
                    }
                    Some(Err(error)) => {
                        statsq_log::debug!(
                            error = &error as &dyn std::error::Error,
                            "connection failed"
                        );
                        break;
                    }
                    None => break,
                },
            }
        }
    }
}
