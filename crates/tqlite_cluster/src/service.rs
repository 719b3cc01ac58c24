//! The address service proper: answers "what is your HTTP API address?"
//! for a peer identified by its Raft address.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use prost::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use tqlite_observability::Registry;
use tqlite_tcp::Layer;

use crate::error::ClusterError;
use crate::proto::{Address, Command, CommandType};

/// Header byte for internode Raft traffic.
pub const MUX_RAFT_HEADER: u8 = 1;

/// Header byte for cluster state requests.
pub const MUX_CLUSTER_HEADER: u8 = 2;

/// Default dial timeout for peer lookups.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const NUM_GET_NODE_API: &str = "cluster.num_get_node_api";
const NUM_GET_NODE_API_REQ: &str = "cluster.num_get_node_api_req";
const NUM_GET_NODE_API_RESP: &str = "cluster.num_get_node_api_resp";

/// Size of the length field on the wire: 4 bytes, of which the low 2 carry
/// a little-endian u16 length; the upper 2 are reserved zeroes. The field
/// width is load-bearing for wire compatibility.
const LEN_FIELD_SIZE: usize = 4;

/// Provides information about this node to the rest of the cluster, and
/// fetches the same from peers.
pub struct Service {
    layer: Arc<Layer>,
    addr: SocketAddr,
    timeout: Duration,
    api_addr: Arc<RwLock<String>>,
    metrics: Arc<Registry>,
}

impl Service {
    /// Build the service on its mux layer. Call [`Service::open`] to start
    /// answering peers.
    pub fn new(layer: Layer, metrics: Arc<Registry>) -> Service {
        for name in [NUM_GET_NODE_API, NUM_GET_NODE_API_REQ, NUM_GET_NODE_API_RESP] {
            metrics.register(name);
        }
        let addr = layer.addr();
        Service {
            layer: Arc::new(layer),
            addr,
            timeout: DEFAULT_TIMEOUT,
            api_addr: Arc::new(RwLock::new(String::new())),
            metrics,
        }
    }

    /// Start serving requests from the layer. The returned task ends when
    /// the layer observes end-of-stream.
    pub fn open(&self) -> JoinHandle<()> {
        tracing::info!(addr = %self.addr, "cluster service listening");
        let layer = Arc::clone(&self.layer);
        let api_addr = Arc::clone(&self.api_addr);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            loop {
                let conn = match layer.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                tokio::spawn(handle_conn(
                    conn,
                    Arc::clone(&api_addr),
                    Arc::clone(&metrics),
                ));
            }
        })
    }

    /// The address the service is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Set the HTTP API address this node advertises to peers.
    pub fn set_api_addr(&self, addr: impl Into<String>) {
        *self.api_addr.write() = addr.into();
    }

    /// The previously-set API address.
    pub fn get_api_addr(&self) -> String {
        self.api_addr.read().clone()
    }

    /// Override the dial timeout for peer lookups.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Ask the node whose cluster channel listens at `node_addr` (its Raft
    /// address) for its HTTP API URL.
    pub async fn get_node_api_addr(&self, node_addr: &str) -> Result<String, ClusterError> {
        self.metrics.add(NUM_GET_NODE_API, 1);

        let mut conn = self
            .layer
            .dial(node_addr, self.timeout)
            .await
            .map_err(ClusterError::Dial)?;

        // Length field, then the command.
        let payload = Command::get_node_api_url().encode_to_vec();
        let mut frame = vec![0u8; LEN_FIELD_SIZE];
        frame[0..2].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(&payload);
        conn.write_all(&frame).await.map_err(ClusterError::Write)?;

        // The reply is unprefixed: read until the peer closes.
        let mut reply = Vec::new();
        conn.read_to_end(&mut reply)
            .await
            .map_err(ClusterError::Read)?;

        let addr = Address::decode(reply.as_slice())?;
        Ok(addr.url)
    }

    /// Snapshot of service state for `/status`.
    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "addr": self.addr.to_string(),
            "timeout": format!("{:?}", self.timeout),
            "api_addr": self.get_api_addr(),
        })
    }
}

/// Serve exactly one request, then close. Any framing or decode problem
/// closes the connection without a reply.
async fn handle_conn(mut conn: TcpStream, api_addr: Arc<RwLock<String>>, metrics: Arc<Registry>) {
    let mut field = [0u8; LEN_FIELD_SIZE];
    if conn.read_exact(&mut field).await.is_err() {
        return;
    }
    let sz = u16::from_le_bytes([field[0], field[1]]) as usize;

    let mut payload = vec![0u8; sz];
    if conn.read_exact(&mut payload).await.is_err() {
        return;
    }

    let cmd = match Command::decode(payload.as_slice()) {
        Ok(cmd) => cmd,
        Err(_) => return,
    };

    if !matches!(
        CommandType::try_from(cmd.r#type),
        Ok(CommandType::GetNodeApiUrl)
    ) {
        return;
    }

    metrics.add(NUM_GET_NODE_API_REQ, 1);
    // Buffer the reply fully before writing so the lock is never held
    // across network I/O.
    let reply = {
        let api_addr = api_addr.read();
        Address {
            url: format!("http://{}", *api_addr),
        }
        .encode_to_vec()
    };
    if conn.write_all(&reply).await.is_ok() {
        metrics.add(NUM_GET_NODE_API_RESP, 1);
    }
}
