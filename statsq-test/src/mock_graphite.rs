use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A plaintext Graphite receiver on a random loopback port.
///
/// Every accepted connection is read to the end and its lines are appended to a shared list in
/// arrival order.
pub struct MockGraphite {
    addr: SocketAddr,
    lines: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<usize>>,
    handle: JoinHandle<()>,
}

impl MockGraphite {
    /// Binds the receiver and starts accepting connections in the background.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let lines = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));

        let handle = tokio::spawn({
            let lines = lines.clone();
            let connections = connections.clone();
            async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    *connections.lock() += 1;
                    let lines = lines.clone();
                    tokio::spawn(async move {
                        let mut buf = String::new();
                        if stream.read_to_string(&mut buf).await.is_ok() {
                            lines
                                .lock()
                                .extend(buf.lines().map(ToOwned::to_owned));
                        }
                    });
                }
            }
        });

        Self {
            addr,
            lines,
            connections,
            handle,
        }
    }

    /// The address to configure as Graphite endpoint.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns all lines received so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Returns the number of accepted connections.
    pub fn connections(&self) -> usize {
        *self.connections.lock()
    }

    /// Polls until at least `count` lines arrived or the timeout elapses.
    ///
    /// Returns all lines received at that point.
    pub async fn wait_for_lines(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.lines.lock().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.lines()
    }
}

impl Drop for MockGraphite {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
