//! Single-port TCP multiplexing for internode traffic.
//!
//! Every internode connection begins with one header byte that selects the
//! logical protocol carried by the rest of the stream. [`Mux`] fans one
//! listener out into per-header sub-listeners; [`Layer`] is the
//! dialer-plus-acceptor handed to each upper-layer protocol so it never has
//! to know the mux exists.

mod mux;

pub use mux::{Layer, Mux, DEFAULT_TIMEOUT};
