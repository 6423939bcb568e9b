//! Routing table maintenance logic.

use std::time::Instant;

use flume::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::common::{Id, RoutingTable};

use super::{Config, Rpc};

/// Keeps the routing table populated by running find_node lookups
/// for its empty or expired buckets.
#[derive(Debug, Clone)]
pub struct RoutingMaintenance {
    rpc: Rpc,
}

impl RoutingMaintenance {
    pub fn new(rpc: Rpc) -> Self {
        Self { rpc }
    }

    /// Populate the table, then refresh it every [Config::refresh_interval]
    /// until `shutdown` receives a message or gets disconnected, or the [Rpc] is stopped.
    pub fn run(&self, shutdown: &Receiver<()>) {
        self.start();

        loop {
            if self.rpc.is_stopped() {
                break;
            }

            self.rpc.save_routing_table();

            match shutdown.recv_timeout(self.rpc.config().refresh_interval) {
                Err(RecvTimeoutError::Timeout) => {
                    self.refresh_routing_table(false);
                }
                _ => break,
            }
        }

        debug!("Routing table maintenance stopped");
    }

    /// Find our own neighbours if the table is empty, otherwise refresh every bucket.
    pub fn start(&self) {
        if self.rpc.read_table().is_empty() {
            if let Err(error) = self.rpc.search_nodes(*self.rpc.id()) {
                warn!(?error, "Failed to populate the routing table");
            }
        } else {
            self.refresh_routing_table(true);
        }
    }

    /// Run a lookup for a random Id in every bucket that needs it, see [buckets_to_refresh].
    ///
    /// Returns the number of refreshed buckets.
    pub fn refresh_routing_table(&self, force: bool) -> usize {
        let targets = {
            let table = self.rpc.read_table();
            buckets_to_refresh(&table, self.rpc.config(), force, Instant::now())
        };

        let mut refreshed = 0;

        for target in &targets {
            if self.rpc.is_stopped() {
                break;
            }

            if let Err(error) = self.rpc.search_nodes(*target) {
                warn!(?error, ?target, "Failed to refresh bucket");
            }
            refreshed += 1;

            if !self.rpc.is_stopped() {
                self.rpc.save_routing_table();
            }
        }

        if refreshed > 0 {
            info!("{}", self.rpc.read_table());
        }

        refreshed
    }
}

/// Random targets for the buckets that are empty, older than [Config::bucket_expiry],
/// or all of them if `force` is set.
pub fn buckets_to_refresh(
    table: &RoutingTable,
    config: &Config,
    force: bool,
    now: Instant,
) -> Vec<Id> {
    table
        .buckets()
        .iter()
        .filter(|(distance, bucket)| {
            let refresh =
                force || bucket.is_empty() || bucket.is_expired(config.bucket_expiry, now);
            if refresh {
                debug!(
                    distance = **distance,
                    last_updated = ?bucket.last_updated(),
                    "Bucket expired"
                );
            }
            refresh
        })
        .map(|(distance, _)| table.id().random_at_distance(*distance))
        .collect()
}
