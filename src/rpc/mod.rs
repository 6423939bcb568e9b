//! K-RPC implementation of iterative find_node lookups.

mod broker;
mod closest_nodes;
mod codec;
pub mod config;
mod iterative_query;
mod routing_maintenance;
mod server;
pub mod socket;

#[cfg(test)]
mod simulation;

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::common::{Id, Node, RoutingTable};
use crate::{Error, Result};

pub use broker::{fan_in, Request, RequestBroker};
pub use closest_nodes::{Candidate, ClosestNodes, QueryState};
pub use codec::Codec;
pub use config::Config;
pub use iterative_query::IterativeQuery;
pub use routing_maintenance::RoutingMaintenance;
pub use socket::{KrpcSocket, Transport};

pub const DEFAULT_BOOTSTRAP_NODES: [&str; 4] = [
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "dht.libtorrent.org:25401",
    "dht.anacrolix.link:42069",
];

/// Maximum number of concurrent find_node requests in one lookup round.
pub const DEFAULT_ALPHA: usize = 3;
pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_BUCKET_EXPIRY: Duration = Duration::from_secs(15 * 60);

/// Sends find_node requests and keeps the routing table up to date with their results.
///
/// Cheap to clone, every clone shares the same routing table, broker and transport.
#[derive(Debug, Clone)]
pub struct Rpc {
    id: Id,
    config: Config,
    codec: Arc<Codec>,
    broker: Arc<RequestBroker>,
    transport: Arc<dyn Transport>,
    routing_table: Arc<RwLock<RoutingTable>>,
    stopped: Arc<AtomicBool>,
}

impl Rpc {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        broker: Arc<RequestBroker>,
        routing_table: RoutingTable,
    ) -> Self {
        let id = *routing_table.id();

        Rpc {
            id,
            codec: Arc::new(Codec::new(id)),
            routing_table: Arc::new(RwLock::new(routing_table.with_bucket_size(config.k))),
            config,
            broker,
            transport,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broker(&self) -> &RequestBroker {
        &self.broker
    }

    /// Returns a snapshot of the routing table.
    pub fn routing_table(&self) -> RoutingTable {
        self.read_table().clone()
    }

    /// Returns `true` once [Rpc::stop] was called on any clone.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    // === Public Methods ===

    /// Run an iterative find_node lookup for `target`, then replace the bucket
    /// covering `target` with every node that responded.
    ///
    /// Returns the finished query, with all the candidates it discovered.
    pub fn search_nodes(&self, target: Id) -> Result<IterativeQuery> {
        info!(?target, "Begin find node");

        let mut query = IterativeQuery::new(target, self.config.k);

        query.add_result(self.seed(&target)?);

        self.search(&mut query);

        if self.is_stopped() {
            debug!(?target, "Lookup stopped, routing table left as is");
            return Ok(query);
        }

        self.update_bucket(&query);

        Ok(query)
    }

    /// Stop every clone: lookups end after their current round and leave
    /// the routing table untouched.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    /// Persist the routing table if [Config::routing_table_path] is set.
    pub fn save_routing_table(&self) {
        if let Some(path) = &self.config.routing_table_path {
            if let Err(error) = self.read_table().save(path) {
                warn!(?error, ?path, "Failed to save the routing table");
            }
        }
    }

    // === Private Methods ===

    /// Rounds of find_node requests until the query converges, or runs out of nodes to ask.
    fn search(&self, query: &mut IterativeQuery) {
        loop {
            if self.is_stopped() {
                break;
            }

            debug!(target = ?query.target(), round = query.rounds(), "New round");

            let requests = self.send_find_node(query);
            let dispatched = requests.len();

            for (request, response) in fan_in(requests, self.config.round_timeout) {
                let message = match response {
                    Some(message) => message,
                    None => {
                        self.broker.remove(request.transaction_id);
                        trace!(to = ?request.to, "Request timed out");
                        continue;
                    }
                };

                if let Some(arguments) = message.get_closer_nodes() {
                    query.mark_responded(&request.to.id);

                    let nodes = arguments.nodes();
                    debug!(from = ?request.to.address, count = nodes.len(), "Nodes received");

                    query.add_result(nodes);
                }
            }

            if query.is_close_enough() {
                break;
            }

            if dispatched == 0 && !query.has_queryable() {
                debug!(
                    target = ?query.target(),
                    rounds = query.rounds(),
                    "No more nodes to query"
                );
                break;
            }
        }
    }

    /// Send a find_node request to up to `alpha` of the closest pending candidates.
    ///
    /// Every attempted candidate is marked [QueryState::Queried], even if its
    /// request could not be encoded or sent.
    fn send_find_node(&self, query: &mut IterativeQuery) -> Vec<Request> {
        let target = query.target();
        let candidates = query.pending_nodes().cloned().collect::<Vec<_>>();

        let mut requests = Vec::with_capacity(self.config.alpha);

        for node in candidates {
            if requests.len() == self.config.alpha {
                break;
            }

            let (transaction_id, bytes) = match self.codec.find_node(target) {
                Ok(encoded) => encoded,
                Err(error) => {
                    warn!(?error, to = ?node.address, "Failed to encode find_node request");
                    query.mark_queried(&node.id);
                    continue;
                }
            };

            let receiver = self.broker.add_request(transaction_id, node.address);
            query.mark_queried(&node.id);

            debug!(transaction_id, to = ?node, "Send request");

            if let Err(error) = self.transport.send(&bytes, node.address) {
                warn!(?error, to = ?node.address, "Failed to send find_node request");
                self.broker.remove(transaction_id);
                continue;
            }

            requests.push(Request::new(transaction_id, node, receiver));
        }

        requests
    }

    /// Closest nodes from the routing table, or the bootstrapping nodes if it has none.
    fn seed(&self, target: &Id) -> Result<Vec<Node>> {
        let closest = self.read_table().closest(target, self.config.alpha);

        if !closest.is_empty() {
            return Ok(closest);
        }

        self.bootstrap_nodes()
    }

    /// Resolve [Config::bootstrap] into placeholder nodes with random Ids.
    fn bootstrap_nodes(&self) -> Result<Vec<Node>> {
        let mut nodes = Vec::with_capacity(self.config.bootstrap.len());

        for host in &self.config.bootstrap {
            let resolved = match host.to_socket_addrs() {
                Ok(addresses) => addresses.into_iter().find_map(|address| match address {
                    SocketAddr::V4(address) => Some(address),
                    SocketAddr::V6(_) => None,
                }),
                Err(error) => {
                    warn!(?error, host, "Failed to resolve bootstrapping node");
                    continue;
                }
            };

            match resolved {
                Some(address) => {
                    info!(host, ?address, "Bootstrap");
                    nodes.push(Node::bootstrap(address));
                }
                None => warn!(host, "Bootstrapping node has no Ipv4 address"),
            }
        }

        if nodes.is_empty() {
            return Err(Error::Bootstrap(self.config.bootstrap.clone()));
        }

        Ok(nodes)
    }

    /// Replace the bucket covering the query's target with the nodes that responded.
    fn update_bucket(&self, query: &IterativeQuery) {
        let mut table = self.write_table();

        let removed = table.clear_bucket(&query.target());

        let mut added = 0;
        for node in query.responders() {
            if table.add(node.refreshed()) {
                added += 1;
            }
        }

        debug!(
            target = ?query.target(),
            removed = removed.len(),
            added,
            size = table.size(),
            "Updated routing table"
        );
    }

    fn read_table(&self) -> RwLockReadGuard<'_, RoutingTable> {
        self.routing_table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, RoutingTable> {
        self.routing_table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddrV4;

    use crate::common::NodeStatus;

    use super::simulation::{Peer, SimulatedNetwork};
    use super::*;

    fn config(bootstrap: &[SocketAddrV4]) -> Config {
        Config {
            bootstrap: bootstrap.iter().map(|a| a.to_string()).collect(),
            round_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn rpc(config: Config, network: &Arc<SimulatedNetwork>, table: RoutingTable) -> Rpc {
        Rpc::new(config, network.clone(), network.broker(), table)
    }

    #[test]
    fn silent_bootstrap_nodes() {
        let network = SimulatedNetwork::new();
        let a = network.add(Peer::Silent);
        let b = network.add(Peer::Silent);

        let rpc = rpc(config(&[a, b]), &network, RoutingTable::new(Id::random()));

        let query = rpc.search_nodes(Id::random()).unwrap();

        assert_eq!(network.sent_to(a), 1);
        assert_eq!(network.sent_to(b), 1);
        assert_eq!(query.closest().len(), 2);
        assert_eq!(query.responders().count(), 0);

        assert!(rpc.routing_table().is_empty());
        assert!(rpc.broker().is_empty());
    }

    #[test]
    fn at_most_alpha_requests_per_round() {
        let network = SimulatedNetwork::new();

        let rpc = rpc(
            Config {
                alpha: 2,
                ..config(&[])
            },
            &network,
            RoutingTable::new(Id::random()),
        );

        let mut query = IterativeQuery::new(Id::random(), 8);
        query.add_result(
            (0..10)
                .map(|_| Node::new(Id::random(), network.add(Peer::Silent)))
                .collect(),
        );

        let closest = query
            .closest()
            .iter()
            .map(|candidate| candidate.node.id)
            .collect::<Vec<_>>();

        let first = rpc.send_find_node(&mut query);
        let second = rpc.send_find_node(&mut query);

        assert_eq!(
            first.iter().map(|request| request.to.id).collect::<Vec<_>>(),
            closest[0..2]
        );
        assert_eq!(
            second.iter().map(|request| request.to.id).collect::<Vec<_>>(),
            closest[2..4]
        );
        assert_eq!(network.total_sent(), 4);
        assert_eq!(query.pending_nodes().count(), 6);
    }

    #[test]
    fn lookup_respects_alpha() {
        let network = SimulatedNetwork::new();

        let peers = (0..30)
            .map(|_| {
                let id = Id::random();
                network.add(Peer::Responsive { id, nodes: None })
            })
            .collect::<Vec<_>>();

        let rpc = rpc(
            Config {
                alpha: 1,
                k: 2,
                ..config(&peers[0..1])
            },
            &network,
            RoutingTable::new(Id::random()),
        );

        let query = rpc.search_nodes(Id::random()).unwrap();

        assert!(query.rounds() > 1);
        assert!(network.total_sent() <= query.rounds());
        assert!(query.responders().count() >= 1);
    }

    #[test]
    fn stopped_lookup_leaves_the_table_untouched() {
        let network = SimulatedNetwork::new();

        let own_id = Id::random();
        let mut table = RoutingTable::new(own_id);

        let known = Node::new(own_id.random_at_distance(160), network.add(Peer::Silent));
        table.add(known.clone());

        let rpc = rpc(config(&[]), &network, table);
        rpc.clone().stop();

        assert!(rpc.is_stopped());

        rpc.search_nodes(known.id).unwrap();

        assert_eq!(network.total_sent(), 0);
        assert!(rpc.routing_table().nodes().any(|node| node.id == known.id));
    }

    #[test]
    fn timed_out_node_is_not_queried_again() {
        let network = SimulatedNetwork::new();

        let silent = Node::new(Id::random(), network.add(Peer::Silent));
        let gossip = network.add(Peer::Responsive {
            id: Id::random(),
            nodes: Some(vec![silent.clone()]),
        });

        let rpc = rpc(config(&[gossip]), &network, RoutingTable::new(Id::random()));

        let query = rpc.search_nodes(Id::random()).unwrap();

        assert_eq!(network.sent_to(silent.address), 1);
        assert_eq!(network.sent_to(gossip), 1);
        assert_eq!(query.closest().state(&silent.id), Some(QueryState::Queried));
    }

    #[test]
    fn finds_the_closest_node() {
        let network = SimulatedNetwork::new();

        let peers = (0..50)
            .map(|_| {
                let id = Id::random();
                Node::new(id, network.add(Peer::Responsive { id, nodes: None }))
            })
            .collect::<Vec<_>>();

        let target = Id::random();

        let closest = peers
            .iter()
            .min_by_key(|node| node.id.xor(&target))
            .unwrap();

        let mut table = RoutingTable::new(Id::random());
        table.add(peers[0].clone());

        let rpc = rpc(config(&[]), &network, table);

        let query = rpc.search_nodes(target).unwrap();

        assert_eq!(query.responders().next(), Some(closest));

        let table = rpc.routing_table();
        let found = table.nodes().find(|node| node.id == closest.id).unwrap();
        assert_eq!(found.status, NodeStatus::Good);

        assert!(rpc.broker().is_empty());
    }

    #[test]
    fn bucket_is_replaced_by_responders() {
        let network = SimulatedNetwork::new();

        let own_id = Id::random();
        let mut table = RoutingTable::new(own_id);

        let stale = Node::new(own_id.random_at_distance(160), network.add(Peer::Silent));
        let alive_id = own_id.random_at_distance(160);
        let alive = Node::new(
            alive_id,
            network.add(Peer::Responsive {
                id: alive_id,
                nodes: Some(vec![]),
            }),
        );
        let elsewhere = Node::new(own_id.random_at_distance(100), network.add(Peer::Silent));

        table.add(stale.clone());
        table.add(alive.clone());
        table.add(elsewhere.clone());

        let rpc = rpc(config(&[]), &network, table);

        let target = own_id.random_at_distance(160);
        rpc.search_nodes(target).unwrap();

        let table = rpc.routing_table();
        let bucket = table.bucket(&target).unwrap();

        assert!(!bucket.contains(&stale.id));
        assert!(bucket.contains(&alive.id));
        assert_eq!(bucket.len(), 1);
        assert!(table.nodes().any(|node| node.id == elsewhere.id));
    }

    #[test]
    fn send_failure_is_not_retried() {
        let network = SimulatedNetwork::new();

        let unreachable = network.add(Peer::Unreachable);
        let reachable = network.add(Peer::Responsive {
            id: Id::random(),
            nodes: Some(vec![]),
        });

        let rpc = rpc(
            config(&[unreachable, reachable]),
            &network,
            RoutingTable::new(Id::random()),
        );

        let query = rpc.search_nodes(Id::random()).unwrap();

        assert_eq!(network.sent_to(unreachable), 1);
        assert_eq!(query.responders().count(), 1);
        assert!(rpc.broker().is_empty());
    }

    #[test]
    fn malformed_nodes_still_count_as_response() {
        let network = SimulatedNetwork::new();
        let address = network.add(Peer::Malformed);

        let rpc = rpc(config(&[address]), &network, RoutingTable::new(Id::random()));

        let query = rpc.search_nodes(Id::random()).unwrap();

        assert_eq!(query.closest().len(), 1);
        assert_eq!(query.responders().count(), 1);
    }

    #[test]
    fn bootstrap_errors() {
        let network = SimulatedNetwork::new();

        let rpc = rpc(config(&[]), &network, RoutingTable::new(Id::random()));
        assert!(matches!(
            rpc.search_nodes(Id::random()),
            Err(Error::Bootstrap(_))
        ));

        let unresolvable = Config {
            bootstrap: vec!["missing-port".to_string()],
            ..config(&[])
        };
        let other = Rpc::new(
            unresolvable,
            network.clone(),
            network.broker(),
            RoutingTable::new(Id::random()),
        );
        assert!(matches!(
            other.search_nodes(Id::random()),
            Err(Error::Bootstrap(hosts)) if hosts == vec!["missing-port".to_string()]
        ));
    }

    #[test]
    fn unusable_addresses_are_skipped() {
        let network = SimulatedNetwork::new();

        let unusable = Node::new(Id::random(), "0.0.0.0:6881".parse().unwrap());
        let bootstrap = network.add(Peer::Responsive {
            id: Id::random(),
            nodes: Some(vec![unusable.clone(), Node::random()]),
        });

        let rpc = rpc(config(&[bootstrap]), &network, RoutingTable::new(Id::random()));

        let query = rpc.search_nodes(Id::random()).unwrap();

        assert_eq!(query.closest().len(), 3);
        assert_eq!(
            query.closest().state(&unusable.id),
            Some(QueryState::Pending)
        );
        assert_eq!(network.total_sent(), 1);
    }

    #[test]
    fn save_routing_table() {
        let network = SimulatedNetwork::new();

        let path = std::env::temp_dir().join(format!("rpc-table-{}.bencode", Id::random()));

        let mut table = RoutingTable::new(Id::random());
        table.add(Node::new(Id::random(), "1.2.3.4:6881".parse().unwrap()));

        let rpc = rpc(
            Config {
                routing_table_path: Some(path.clone()),
                ..config(&[])
            },
            &network,
            table,
        );

        rpc.save_routing_table();

        let loaded = RoutingTable::load(&path, 8).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.id(), rpc.id());
        assert_eq!(loaded.size(), 1);
    }
}
