//! HTTP service for the distributed database: SQL and administrative
//! endpoints, leader redirection, status, and debug surfaces.
//!
//! The service fronts two capability objects: a [`Store`] (the Raft-backed
//! database) and a [`Cluster`] (peer address lookup). Leader-only
//! operations that land on a follower are answered with a `301` pointing
//! at the leader's API, resolved through the cluster service.

mod params;
mod service;
mod store;

pub use service::{Service, VERSION_HTTP_HEADER};
pub use store::{BackupFormat, Cluster, Server, Statuser, Store, StoreError, Suffrage};
