#![doc = include_str!("../README.md")]

mod common;
mod dht;
mod error;
pub mod rpc;

pub use crate::common::{
    messages, Id, KBucket, Node, NodeStatus, RoutingTable, ID_SIZE, MAX_BUCKET_SIZE_K,
    MAX_DISTANCE,
};
pub use crate::error::Error;
pub use bytes::Bytes;
pub use dht::Dht;
pub use rpc::Config;

/// Alias for `Result<T, Error>`.
pub type Result<T, E = Error> = core::result::Result<T, E>;
