//! Capability traits the HTTP service consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tqlite_command::{ExecuteRequest, ExecuteResult, QueryRequest, QueryRows};
use tqlite_cluster::ClusterError;

/// Errors surfaced by the Store boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The operation must run on the leader, and this node is not it.
    #[error("not leader")]
    NotLeader,

    #[error("{0}")]
    Internal(String),
}

/// Voting status of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suffrage {
    Voter,
    Nonvoter,
    Staging,
}

/// A cluster member as reported by the Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub addr: String,
    pub suffrage: Suffrage,
}

/// Snapshot output format for `/db/backup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFormat {
    Binary,
    Sql,
}

/// The Raft-backed database this service fronts. Mutations replicate
/// through the consensus log; the Store decides which reads require the
/// leader.
#[async_trait]
pub trait Store: Send + Sync {
    /// Execute statements that modify the database.
    async fn execute(&self, req: &ExecuteRequest) -> Result<Vec<ExecuteResult>, StoreError>;

    /// Like [`Store::execute`], but aborts any transaction on error.
    async fn execute_or_abort(&self, req: &ExecuteRequest)
        -> Result<Vec<ExecuteResult>, StoreError>;

    /// Execute read-only statements.
    async fn query(&self, req: &QueryRequest) -> Result<Vec<QueryRows>, StoreError>;

    /// Join the node with the given ID, reachable at `addr`, to the cluster.
    async fn join(&self, id: &str, addr: &str, voter: bool) -> Result<(), StoreError>;

    /// Remove the node with the given ID from the cluster.
    async fn remove(&self, id: &str) -> Result<(), StoreError>;

    /// The Raft address of the cluster leader. Empty when unknown.
    async fn leader_addr(&self) -> Result<String, StoreError>;

    /// The cluster membership.
    async fn nodes(&self) -> Result<Vec<Server>, StoreError>;

    /// Snapshot of the node state. `leader` requires this node be leader.
    async fn backup(&self, leader: bool, format: BackupFormat) -> Result<Vec<u8>, StoreError>;

    /// Store status for `/status`.
    async fn stats(&self) -> Result<serde_json::Value, StoreError>;
}

/// Peer address lookup, normally backed by the cluster address service.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// The HTTP API URL for the node at the given Raft address.
    async fn get_node_api_addr(&self, node_addr: &str) -> Result<String, ClusterError>;

    /// Cluster-service status for `/status`.
    fn stats(&self) -> serde_json::Value;
}

#[async_trait]
impl Cluster for tqlite_cluster::Service {
    async fn get_node_api_addr(&self, node_addr: &str) -> Result<String, ClusterError> {
        tqlite_cluster::Service::get_node_api_addr(self, node_addr).await
    }

    fn stats(&self) -> serde_json::Value {
        tqlite_cluster::Service::stats(self)
    }
}

/// Extra status providers registered on the HTTP service, merged into the
/// `/status` document under their registration key.
pub trait Statuser: Send + Sync {
    fn stats(&self) -> serde_json::Value;
}
