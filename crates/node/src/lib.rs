//! # Umbra Node
//!
//! Wiring for the full node: storage, buses, mempool, consensus, chain and
//! the peer plane, assembled by [`Node`] and driven by the `umbra` binary.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod node;
pub mod oracle_client;

pub use node::{Node, NodeHandle};
pub use oracle_client::RpcOracle;
