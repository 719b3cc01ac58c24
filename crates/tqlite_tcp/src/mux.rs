use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use tqlite_observability::Registry;

/// Default length of time to wait for the first byte of a connection.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const NUM_CONNECTIONS_HANDLED: &str = "mux.num_connections_handled";
const NUM_UNREGISTERED_HANDLERS: &str = "mux.num_unregistered_handlers";

/// Handoff capacity per sub-listener. Small and bounded: a slow consumer is
/// meant to back-pressure the per-connection tasks, not queue behind them.
const HANDOFF_CAPACITY: usize = 1;

/// The connection between nodes for one header byte. Dials out with the
/// header prefixed, and accepts inbound connections that began with it.
pub struct Layer {
    header: u8,
    addr: SocketAddr,
    rx: tokio::sync::Mutex<mpsc::Receiver<TcpStream>>,
}

impl Layer {
    /// Open a connection to `addr` within `timeout`, writing the header
    /// byte before returning the stream. A failed header write closes the
    /// connection and fails the dial.
    pub async fn dial(&self, addr: &str, timeout: Duration) -> io::Result<TcpStream> {
        let mut conn = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("dial {addr} timed out"),
                ))
            }
        };
        conn.write_all(&[self.header]).await?;
        Ok(conn)
    }

    /// Wait for the next inbound connection carrying this layer's header.
    /// Fails once the mux has torn down.
    pub async fn accept(&self) -> io::Result<TcpStream> {
        self.rx.lock().await.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "network connection closed")
        })
    }

    /// The address peers should dial to reach this layer.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Fans a single TCP listener into per-header sub-listeners, keyed by the
/// first byte of each accepted connection.
pub struct Mux {
    ln: TcpListener,
    addr: SocketAddr,
    m: HashMap<u8, mpsc::Sender<TcpStream>>,
    timeout: Duration,
    metrics: Arc<Registry>,
}

impl Mux {
    /// Wrap an already-bound listener. `advertise` overrides the address
    /// reported to peers (NAT or external advertisement); it defaults to
    /// the listener's local address.
    pub fn new(
        ln: TcpListener,
        advertise: Option<SocketAddr>,
        metrics: Arc<Registry>,
    ) -> io::Result<Mux> {
        let addr = match advertise {
            Some(a) => a,
            None => ln.local_addr()?,
        };
        metrics.register(NUM_CONNECTIONS_HANDLED);
        metrics.register(NUM_UNREGISTERED_HANDLERS);
        Ok(Mux {
            ln,
            addr,
            m: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            metrics,
        })
    }

    /// Override the first-byte timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// The advertised address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Register a sub-listener for `header` and return its [`Layer`]. All
    /// registration happens before [`Mux::serve`], which consumes the mux.
    ///
    /// # Panics
    ///
    /// If `header` is already registered.
    pub fn listen(&mut self, header: u8) -> Layer {
        if self.m.contains_key(&header) {
            panic!("listener already registered under header byte: {header}");
        }
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        self.m.insert(header, tx);
        Layer {
            header,
            addr: self.addr,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Accept and demultiplex connections until the listener fails with a
    /// non-temporary error. Consumes the mux: the header map moves into the
    /// serve task and is read without locks from then on.
    pub async fn serve(self) -> io::Result<()> {
        if let Ok(local) = self.ln.local_addr() {
            tracing::info!(listen = %local, advertise = %self.addr, "mux serving");
        }

        let m = Arc::new(self.m);
        let mut handlers: JoinSet<()> = JoinSet::new();
        loop {
            match self.ln.accept().await {
                Ok((conn, _)) => {
                    handlers.spawn(handle_conn(
                        conn,
                        Arc::clone(&m),
                        self.timeout,
                        Arc::clone(&self.metrics),
                    ));
                    // Reap finished handlers so the set stays small.
                    while handlers.try_join_next().is_some() {}
                }
                Err(e) if is_temporary(&e) => continue,
                Err(e) => {
                    // Wait for in-flight connections to be demultiplexed,
                    // then drop every sender so sub-listener accept()
                    // observes end-of-stream.
                    while handlers.join_next().await.is_some() {}
                    drop(m);
                    return Err(e);
                }
            }
        }
    }
}

async fn handle_conn(
    mut conn: TcpStream,
    m: Arc<HashMap<u8, mpsc::Sender<TcpStream>>>,
    timeout: Duration,
    metrics: Arc<Registry>,
) {
    metrics.add(NUM_CONNECTIONS_HANDLED, 1);

    // Dropping the connection anywhere below closes it.
    let mut header = [0u8; 1];
    match tokio::time::timeout(timeout, conn.read_exact(&mut header)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            tracing::warn!("cannot read header byte: {e}");
            return;
        }
        Err(_) => {
            tracing::warn!("timed out waiting for header byte");
            return;
        }
    }

    let Some(tx) = m.get(&header[0]) else {
        metrics.add(NUM_UNREGISTERED_HANDLERS, 1);
        tracing::warn!(
            header = header[0],
            "handler not registered (unsupported protocol?)"
        );
        return;
    };

    // The sub-listener owns the connection from here, including closing it.
    let _ = tx.send(conn).await;
}

/// Accept errors worth retrying without tearing the mux down.
fn is_temporary(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    async fn new_mux() -> (Mux, SocketAddr, Arc<Registry>) {
        let ln = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = ln.local_addr().unwrap();
        let metrics = Arc::new(Registry::new());
        let mux = Mux::new(ln, None, Arc::clone(&metrics)).unwrap();
        (mux, addr, metrics)
    }

    #[tokio::test]
    async fn demultiplexes_concurrent_headers() {
        let (mut mux, addr, metrics) = new_mux().await;
        let raft = mux.listen(1);
        let cluster = mux.listen(2);
        tokio::spawn(mux.serve());

        let mut c1 = TcpStream::connect(addr).await.unwrap();
        let mut c2 = TcpStream::connect(addr).await.unwrap();
        c2.write_all(&[2u8]).await.unwrap();
        c1.write_all(&[1u8]).await.unwrap();
        c1.write_all(b"raft payload").await.unwrap();
        c2.write_all(b"cluster payload").await.unwrap();

        let mut a1 = raft.accept().await.unwrap();
        let mut a2 = cluster.accept().await.unwrap();

        let mut buf = [0u8; 12];
        a1.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"raft payload");
        let mut buf = [0u8; 15];
        a2.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"cluster payload");

        assert_eq!(metrics.get("mux.num_connections_handled"), 2);
    }

    #[tokio::test]
    async fn unknown_header_closes_connection() {
        let (mut mux, addr, metrics) = new_mux().await;
        let _raft = mux.listen(1);
        tokio::spawn(mux.serve());

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(&[9u8]).await.unwrap();

        let mut buf = [0u8; 1];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "connection should be closed by the mux");
        assert_eq!(metrics.get("mux.num_unregistered_handlers"), 1);
        assert_eq!(metrics.get("mux.num_connections_handled"), 1);
    }

    #[tokio::test]
    async fn first_byte_timeout_closes_connection() {
        let (mut mux, addr, _metrics) = new_mux().await;
        mux.set_timeout(Duration::from_millis(100));
        let _raft = mux.listen(1);
        tokio::spawn(mux.serve());

        let mut conn = TcpStream::connect(addr).await.unwrap();
        let start = Instant::now();
        let mut buf = [0u8; 1];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "silent connection should be closed");
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    #[should_panic(expected = "already registered under header byte")]
    async fn duplicate_header_registration_panics() {
        let (mut mux, _addr, _metrics) = new_mux().await;
        let _a = mux.listen(1);
        let _b = mux.listen(1);
    }

    #[tokio::test]
    async fn dial_prefixes_header_byte() {
        let target_ln = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = target_ln.local_addr().unwrap();

        let (mut mux, _addr, _metrics) = new_mux().await;
        let layer = mux.listen(7);

        let dial = tokio::spawn(async move {
            let mut conn = layer
                .dial(&target.to_string(), Duration::from_secs(5))
                .await
                .unwrap();
            conn.write_all(b"after").await.unwrap();
        });

        let (mut srv, _) = target_ln.accept().await.unwrap();
        let mut buf = [0u8; 6];
        srv.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\x07after");
        dial.await.unwrap();
    }

    #[tokio::test]
    async fn accept_fails_after_mux_teardown() {
        let (mut mux, _addr, _metrics) = new_mux().await;
        let layer = mux.listen(1);
        // Dropping the mux drops the senders, the same signal serve() emits
        // after a terminal accept error.
        drop(mux);

        let err = layer.accept().await.unwrap_err();
        assert_eq!(err.to_string(), "network connection closed");
    }

    #[tokio::test]
    async fn advertised_address_overrides_local() {
        let ln = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let adv: SocketAddr = "10.1.2.3:4002".parse().unwrap();
        let mut mux = Mux::new(ln, Some(adv), Arc::new(Registry::new())).unwrap();
        assert_eq!(mux.addr(), adv);
        let layer = mux.listen(1);
        assert_eq!(layer.addr(), adv);
    }
}
