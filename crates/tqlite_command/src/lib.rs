//! Request vocabulary shared by the HTTP service and the Store boundary:
//! the protobuf statement messages replicated through the consensus log,
//! and the JSON row shapes the HTTP envelope serializes.

pub mod proto;
pub mod result;

pub use proto::{ExecuteRequest, QueryRequest, QueryRequestLevel, Request, Statement};
pub use result::{ExecuteResult, QueryRows};
