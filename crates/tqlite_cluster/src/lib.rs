//! Cluster address service: lets nodes learn each other's HTTP API
//! addresses over the CLUSTER channel of the node mux, plus the HTTP
//! client used to join an existing cluster.

mod error;
pub mod join;
pub mod proto;
mod service;

pub use error::ClusterError;
pub use join::JoinError;
pub use service::{Service, DEFAULT_TIMEOUT, MUX_CLUSTER_HEADER, MUX_RAFT_HEADER};
