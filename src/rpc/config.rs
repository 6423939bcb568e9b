use std::{path::PathBuf, time::Duration};

use crate::common::MAX_BUCKET_SIZE_K;

use super::{
    DEFAULT_ALPHA, DEFAULT_BOOTSTRAP_NODES, DEFAULT_BUCKET_EXPIRY, DEFAULT_REFRESH_INTERVAL,
    DEFAULT_ROUND_TIMEOUT,
};

#[derive(Debug, Clone)]
/// Dht Configurations
pub struct Config {
    /// Bootstrap nodes, used to seed a lookup when the routing table has no
    /// nodes close to its target.
    ///
    /// Defaults to [DEFAULT_BOOTSTRAP_NODES]
    pub bootstrap: Vec<String>,
    /// Explicit port to listen on.
    ///
    /// Defaults to None, trying `6881` first, then any available port.
    pub port: Option<u16>,
    /// Maximum number of concurrent find_node requests in one lookup round.
    ///
    /// Defaults to [DEFAULT_ALPHA]
    pub alpha: usize,
    /// Bucket size, also half the window of closest nodes that must have been
    /// queried before a lookup is considered done.
    ///
    /// Defaults to [MAX_BUCKET_SIZE_K]
    pub k: usize,
    /// How long a lookup round waits for all of its requests, in total.
    ///
    /// The longer this duration is, the longer lookups take.
    /// The shorter this duration is, the more responses from busy nodes we miss out on.
    ///
    /// Defaults to [DEFAULT_ROUND_TIMEOUT]
    pub round_timeout: Duration,
    /// Interval between two routing table maintenance ticks.
    ///
    /// Defaults to [DEFAULT_REFRESH_INTERVAL]
    pub refresh_interval: Duration,
    /// A bucket that wasn't updated for this long gets refreshed.
    ///
    /// Defaults to [DEFAULT_BUCKET_EXPIRY]
    pub bucket_expiry: Duration,
    /// File to load the routing table from at startup, and to save it to
    /// on every maintenance tick.
    ///
    /// Defaults to None, where the routing table is never persisted.
    pub routing_table_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bootstrap: DEFAULT_BOOTSTRAP_NODES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            port: None,
            alpha: DEFAULT_ALPHA,
            k: MAX_BUCKET_SIZE_K,
            round_timeout: DEFAULT_ROUND_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            bucket_expiry: DEFAULT_BUCKET_EXPIRY,
            routing_table_path: None,
        }
    }
}
