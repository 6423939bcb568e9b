//! Struct and implementation of the Node entry in the Kademlia routing table
use std::{
    fmt::{self, Debug, Formatter},
    net::SocketAddrV4,
    time::{Duration, Instant},
};

use crate::common::Id;

/// Liveness of a [Node] as far as this node knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Responded to one of our requests recently.
    Good,
    /// Learned from another node, never heard from directly.
    Unknown,
}

#[derive(Clone)]
/// Node entry in Kademlia routing table
pub struct Node {
    pub id: Id,
    pub address: SocketAddrV4,
    pub status: NodeStatus,
    pub last_seen: Instant,
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("status", &self.status)
            .field("last_seen", &self.last_seen.elapsed().as_secs())
            .finish()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.address == other.address
    }
}

impl Node {
    /// Creates a new Node from an id and socket address.
    pub fn new(id: Id, address: SocketAddrV4) -> Node {
        Node {
            id,
            address,
            status: NodeStatus::Unknown,
            last_seen: Instant::now(),
        }
    }

    /// Creates a node with random Id for testing purposes.
    pub fn random() -> Node {
        Node::new(Id::random(), SocketAddrV4::new(0.into(), 0))
    }

    /// Placeholder record for a bootstrapping address, whose Id we don't know yet.
    pub fn bootstrap(address: SocketAddrV4) -> Node {
        Node {
            status: NodeStatus::Good,
            ..Node::new(Id::random(), address)
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }

    // === Public Methods ===

    /// Returns `true` if we can send a request to this node's address.
    pub fn has_usable_address(&self) -> bool {
        !self.address.ip().is_unspecified() && self.address.port() != 0
    }

    /// A fresh record of this node, marked [NodeStatus::Good] and seen now.
    pub fn refreshed(&self) -> Node {
        Node {
            status: NodeStatus::Good,
            last_seen: Instant::now(),
            ..self.clone()
        }
    }

    /// Node was not seen for longer than `expiry`.
    pub fn is_stale(&self, expiry: Duration) -> bool {
        self.last_seen.elapsed() > expiry
    }

    pub fn same_ip(&self, other: &Self) -> bool {
        self.address.ip() == other.address.ip()
    }
}
