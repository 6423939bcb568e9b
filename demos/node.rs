use std::{path::PathBuf, time::Duration};

use mainline_finder::{Config, Dht};

use clap::Parser;

use tracing::{info, Level};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// File to persist the routing table in
    #[arg(short, long)]
    table: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_thread_names(true)
        .init();

    let cli = Cli::parse();

    let (sender, receiver) = flume::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = sender.try_send(());
    })
    .expect("Error setting Ctrl-C handler");

    let mut dht = Dht::new(Config {
        port: cli.port,
        routing_table_path: cli.table,
        ..Default::default()
    })
    .expect("Failed to start the Dht node");

    info!(id = %dht.id(), local_addr = ?dht.local_addr(), "Dht node is running! Press Ctrl+C to stop.");

    while receiver.recv_timeout(Duration::from_secs(30)).is_err() {
        info!("{}", dht.routing_table());
    }

    info!("Shutting down...");
    dht.shutdown();
}
