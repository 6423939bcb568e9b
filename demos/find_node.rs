use std::{path::PathBuf, str::FromStr, time::Instant};

use mainline_finder::{Config, Dht, Id};

use clap::Parser;

use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Id to find the closest nodes to, random if missing
    target: Option<String>,
    /// Bootstrapping nodes, `host:port`
    #[arg(short, long)]
    bootstrap: Vec<String>,
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// File to load the routing table from, and save it to
    #[arg(short, long)]
    table: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        // Switch to DEBUG to see every round and the responding nodes
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    let target = match cli.target {
        Some(target) => Id::from_str(&target).expect("Expected a 40 characters hex Id"),
        None => Id::random(),
    };

    let mut config = Config {
        port: cli.port,
        routing_table_path: cli.table,
        ..Default::default()
    };
    if !cli.bootstrap.is_empty() {
        config.bootstrap = cli.bootstrap;
    }

    let dht = Dht::new(config).expect("Failed to start the Dht node");

    println!("Looking up nodes closest to: {} ...", target);

    let start = Instant::now();

    let query = dht.query(target).expect("Failed to bootstrap");

    println!(
        "\nQuery done in {:?} milliseconds, {} rounds, {} candidates:\n",
        start.elapsed().as_millis(),
        query.rounds(),
        query.closest().len(),
    );

    for node in query.responders().take(8) {
        println!(
            "{} {:>21} distance {}",
            node.id(),
            node.address(),
            target.distance(node.id())
        );
    }

    println!("\n{}", dht.routing_table());
}
