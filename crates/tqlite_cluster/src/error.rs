use thiserror::Error;

/// Failures of a peer address lookup.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("dial connection: {0}")]
    Dial(#[source] std::io::Error),

    #[error("write command: {0}")]
    Write(#[source] std::io::Error),

    #[error("read reply: {0}")]
    Read(#[source] std::io::Error),

    #[error("protobuf decode: {0}")]
    Decode(#[from] prost::DecodeError),
}
