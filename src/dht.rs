//! Dht node.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::Sender;
use tracing::{debug, info, warn};

use crate::{
    common::{Id, Node, RoutingTable},
    rpc::{Config, IterativeQuery, KrpcSocket, RequestBroker, RoutingMaintenance, Rpc},
    Result,
};

/// A running DHT node: a UDP listener answering requests and routing responses,
/// and a maintenance thread keeping the routing table fresh.
#[derive(Debug)]
pub struct Dht {
    rpc: Rpc,
    local_addr: SocketAddrV4,
    running: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    listener: Option<JoinHandle<()>>,
    maintenance: Option<JoinHandle<()>>,
}

impl Dht {
    /// Bind the socket, load the persisted routing table if any, and start
    /// the listener and maintenance threads.
    pub fn new(config: Config) -> Result<Self> {
        let routing_table = load_routing_table(&config);

        let socket = KrpcSocket::bind(config.port)?;
        let receiving = socket.try_clone()?;
        let local_addr = socket.local_addr();

        let rpc = Rpc::new(
            config,
            Arc::new(socket),
            Arc::new(RequestBroker::new()),
            routing_table,
        );

        info!(id = ?rpc.id(), ?local_addr, "Dht node started");

        let running = Arc::new(AtomicBool::new(true));

        let listener = {
            let rpc = rpc.clone();
            let running = running.clone();

            thread::Builder::new()
                .name("dht-listener".to_string())
                .spawn(move || {
                    while running.load(Ordering::Relaxed) {
                        if let Some((message, from)) = receiving.recv_from() {
                            rpc.handle_message(message, from);
                        }
                    }
                    debug!("Dht listener stopped");
                })?
        };

        let (shutdown, shutdown_receiver) = flume::bounded::<()>(1);

        let maintenance = {
            let maintenance = RoutingMaintenance::new(rpc.clone());

            thread::Builder::new()
                .name("dht-maintenance".to_string())
                .spawn(move || maintenance.run(&shutdown_receiver))?
        };

        Ok(Dht {
            rpc,
            local_addr,
            running,
            shutdown: Some(shutdown),
            listener: Some(listener),
            maintenance: Some(maintenance),
        })
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        self.rpc.id()
    }

    /// Returns the address the node is listening on.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    /// Returns a snapshot of the routing table.
    pub fn routing_table(&self) -> RoutingTable {
        self.rpc.routing_table()
    }

    // === Public Methods ===

    /// Run an iterative find_node lookup and return the nodes that responded,
    /// closest to `target` first.
    pub fn find_node(&self, target: Id) -> Result<Vec<Node>> {
        let query = self.query(target)?;

        Ok(query.responders().cloned().collect())
    }

    /// Same as [Dht::find_node] but returns the query with every discovered candidate.
    pub fn query(&self, target: Id) -> Result<IterativeQuery> {
        self.rpc.search_nodes(target)
    }

    /// Stop and join the listener and maintenance threads, then save the routing table.
    ///
    /// A lookup in progress ends after its current round without touching the table.
    pub fn shutdown(&mut self) {
        self.rpc.stop();
        self.running.store(false, Ordering::Relaxed);

        // Disconnecting wakes up the maintenance thread.
        self.shutdown.take();

        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                warn!("Dht listener panicked");
            }
        }

        if let Some(maintenance) = self.maintenance.take() {
            if maintenance.join().is_err() {
                warn!("Dht maintenance panicked");
            }

            self.rpc.save_routing_table();
        }
    }
}

impl Drop for Dht {
    fn drop(&mut self) {
        if self.listener.is_some() {
            self.shutdown();
        }
    }
}

fn load_routing_table(config: &Config) -> RoutingTable {
    if let Some(path) = &config.routing_table_path {
        if path.exists() {
            match RoutingTable::load(path, config.k) {
                Ok(table) => {
                    info!(?path, size = table.size(), "Loaded routing table");
                    return table;
                }
                Err(error) => warn!(?error, ?path, "Failed to load routing table"),
            }
        }
    }

    RoutingTable::new(Id::random())
}
