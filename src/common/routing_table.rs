//! Simplified Kademlia routing table

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::Path;
use std::slice::Iter;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::common::messages::{compact_nodes, nodes4_to_bytes};
use crate::common::{Id, Node, ID_SIZE, MAX_DISTANCE};
use crate::Result;

/// K = the default maximum size of a k-bucket.
pub const MAX_BUCKET_SIZE_K: usize = 8;

/// A full bucket may only evict its least recently seen node after this long.
pub const NODE_STALE_TIME: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
/// Simplified Kademlia routing table
pub struct RoutingTable {
    id: Id,
    k: usize,
    buckets: BTreeMap<u8, KBucket>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        RoutingTable {
            id,
            k: MAX_BUCKET_SIZE_K,
            buckets: BTreeMap::new(),
        }
    }

    /// Set the maximum number of nodes per bucket.
    pub fn with_bucket_size(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Returns the map of distances and their [KBucket]
    pub fn buckets(&self) -> &BTreeMap<u8, KBucket> {
        &self.buckets
    }

    // === Public Methods ===

    /// Attempts to add a node to this routing table, and return `true` if it did.
    pub fn add(&mut self, node: Node) -> bool {
        let distance = self.id.distance(node.id());

        if distance == 0 {
            // Do not add self to the routing_table
            return false;
        }

        let k = self.k;
        let bucket = self.buckets.entry(distance).or_default();

        bucket.add(node, k)
    }

    /// Remove a node from this routing table.
    pub fn remove(&mut self, node_id: &Id) {
        let distance = self.id.distance(node_id);

        if let Some(bucket) = self.buckets.get_mut(&distance) {
            bucket.remove(node_id)
        }
    }

    /// Returns the bucket that covers `id`, if it was ever created.
    pub fn bucket(&self, id: &Id) -> Option<&KBucket> {
        self.buckets.get(&self.id.distance(id))
    }

    /// Empty the bucket that covers `id`, and returns the removed nodes.
    pub fn clear_bucket(&mut self, id: &Id) -> Vec<Node> {
        let distance = self.id.distance(id);

        match self.buckets.get_mut(&distance) {
            Some(bucket) => bucket.clear(),
            None => Vec::new(),
        }
    }

    /// Return up to `count` nodes closest to the target.
    pub fn closest(&self, target: &Id, count: usize) -> Vec<Node> {
        let mut nodes = self.nodes().collect::<Vec<_>>();

        nodes.sort_by_key(|node| node.id.xor(target));
        nodes.truncate(count);

        nodes
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.is_empty())
    }

    /// Return the number of nodes in this routing table.
    pub fn size(&self) -> usize {
        self.buckets
            .values()
            .fold(0, |acc, bucket| acc + bucket.nodes.len())
    }

    /// Returns an iterator over the nodes in this routing table.
    pub fn nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.iter().cloned())
    }

    /// Persist the Id and the nodes of this table to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let nodes = self.nodes().collect::<Vec<_>>();

        let persisted = PersistedTable {
            id: self.id.into(),
            nodes: nodes4_to_bytes(&nodes),
        };

        let bytes = serde_bencode::to_bytes(&persisted)?;

        // Write to a sibling file, then rename over `path`.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Load a table previously written by [RoutingTable::save].
    ///
    /// Loaded nodes are [crate::NodeStatus::Unknown] until they respond again.
    pub fn load(path: &Path, k: usize) -> Result<Self> {
        let bytes = fs::read(path)?;
        let persisted: PersistedTable = serde_bencode::from_bytes(&bytes)?;

        let mut table = RoutingTable::new(Id::from(persisted.id)).with_bucket_size(k);

        for node in compact_nodes(&persisted.nodes) {
            table.add(node);
        }

        Ok(table)
    }

    // === Private Methods ===

    #[cfg(test)]
    fn contains(&self, node_id: &Id) -> bool {
        self.bucket(node_id)
            .map(|bucket| bucket.contains(node_id))
            .unwrap_or(false)
    }
}

impl Display for RoutingTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "RoutingTable {} ({} nodes)", self.id, self.size())?;

        for (distance, bucket) in &self.buckets {
            writeln!(
                f,
                "  bucket {:>3}/{}: {} nodes, updated {}s ago",
                distance,
                MAX_DISTANCE,
                bucket.len(),
                bucket.last_updated().elapsed().as_secs()
            )?;
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedTable {
    #[serde(with = "serde_bytes")]
    id: [u8; ID_SIZE],
    #[serde(with = "serde_bytes")]
    nodes: Vec<u8>,
}

/// Kbuckets are similar to LRU caches that checks and evicts unresponsive nodes,
/// without dropping any responsive nodes in the process.
#[derive(Debug, Clone)]
pub struct KBucket {
    /// Nodes in the k-bucket, sorted by the least recently seen.
    nodes: Vec<Node>,
    /// Last time a node was added to or replaced in this bucket.
    last_updated: Instant,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            nodes: Vec::with_capacity(MAX_BUCKET_SIZE_K),
            last_updated: Instant::now(),
        }
    }

    // === Getters ===

    pub fn last_updated(&self) -> Instant {
        self.last_updated
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, Node> {
        self.nodes.iter()
    }

    /// Returns `true` if this bucket wasn't updated for longer than `expiry` at `now`.
    pub fn is_expired(&self, expiry: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_updated) > expiry
    }

    // === Public Methods ===

    /// Add a node to a bucket of maximum size `k`.
    pub fn add(&mut self, incoming: Node, k: usize) -> bool {
        if let Some(index) = self.iter().position(|n| n.id() == incoming.id()) {
            let existing = &self.nodes[index];

            // Same Id from the same IP replaces the old record, possibly updating its port,
            // and moves it to the end of the bucket.
            if existing.same_ip(&incoming) {
                self.nodes.remove(index);
                self.push(incoming);

                true
            } else {
                false
            }
        } else if self.nodes.len() < k {
            self.push(incoming);
            true
        } else if self.nodes[0].is_stale(NODE_STALE_TIME) {
            // Remove the least recently seen node and add the new one
            self.nodes.remove(0);
            self.push(incoming);

            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, node_id: &Id) {
        self.nodes.retain(|node| node.id() != node_id);
    }

    /// Remove all nodes, returning them.
    pub fn clear(&mut self) -> Vec<Node> {
        std::mem::take(&mut self.nodes)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.iter().any(|node| node.id() == id)
    }

    // === Private Methods ===

    fn push(&mut self, node: Node) {
        self.nodes.push(node);
        self.last_updated = Instant::now();
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}
