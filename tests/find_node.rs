use std::net::SocketAddrV4;
use std::time::Duration;

use mainline_finder::{Config, Dht, Id, Node, RoutingTable};

fn local_config(bootstrap: Vec<String>) -> Config {
    Config {
        bootstrap,
        port: Some(0),
        round_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

fn localhost(dht: &Dht) -> SocketAddrV4 {
    SocketAddrV4::new([127, 0, 0, 1].into(), dht.local_addr().port())
}

#[test]
fn find_nodes_known_to_bootstrapping_node() {
    let peers = (0..3)
        .map(|_| Dht::new(local_config(vec![])).unwrap())
        .collect::<Vec<_>>();

    // A bootstrapping node that already knows every peer.
    let path = std::env::temp_dir().join(format!("bootstrap-table-{}.bencode", Id::random()));

    let mut table = RoutingTable::new(Id::random());
    for peer in &peers {
        assert!(table.add(Node::new(*peer.id(), localhost(peer))));
    }
    table.save(&path).unwrap();

    let bootstrap = Dht::new(Config {
        routing_table_path: Some(path.clone()),
        ..local_config(vec![])
    })
    .unwrap();

    assert_eq!(bootstrap.id(), table.id());

    let client = Dht::new(local_config(vec![localhost(&bootstrap).to_string()])).unwrap();

    let found = client.find_node(Id::random()).unwrap();

    let _ = std::fs::remove_file(&path);

    for peer in &peers {
        assert!(
            found.iter().any(|node| node.id() == peer.id()),
            "{} was not found",
            peer.id()
        );
    }
}

#[test]
fn target_is_never_a_candidate() {
    let peer = Dht::new(local_config(vec![])).unwrap();

    let mut table = RoutingTable::new(Id::random());
    table.add(Node::new(*peer.id(), localhost(&peer)));

    let path = std::env::temp_dir().join(format!("bootstrap-table-{}.bencode", Id::random()));
    table.save(&path).unwrap();

    let bootstrap = Dht::new(Config {
        routing_table_path: Some(path.clone()),
        ..local_config(vec![])
    })
    .unwrap();

    let client = Dht::new(local_config(vec![localhost(&bootstrap).to_string()])).unwrap();

    let query = client.query(*peer.id()).unwrap();

    let _ = std::fs::remove_file(&path);

    assert!(query.closest().iter().all(|c| c.node.id() != peer.id()));
    assert_eq!(query.responders().count(), 1);
}
