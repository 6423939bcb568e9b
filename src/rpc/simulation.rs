//! In memory network of scripted peers, answering find_node requests synchronously.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::common::{
    FindNodeResponseArguments, Id, Message, MessageType, Node, RequestSpecific,
    RequestTypeSpecific, ResponseSpecific, MAX_BUCKET_SIZE_K,
};

use super::{RequestBroker, Transport};

#[derive(Debug, Clone)]
pub enum Peer {
    /// Answers find_node requests with `nodes`, or with the closest peers
    /// of the whole network to the requested target if `None`.
    Responsive { id: Id, nodes: Option<Vec<Node>> },
    /// Never answers.
    Silent,
    /// Sending to this peer fails.
    Unreachable,
    /// Answers with a `nodes` field that isn't valid compact node info.
    Malformed,
}

#[derive(Debug, Default)]
struct State {
    peers: HashMap<SocketAddrV4, Peer>,
    sent: Vec<(SocketAddrV4, Vec<u8>)>,
}

#[derive(Debug, Default)]
pub struct SimulatedNetwork {
    broker: Arc<RequestBroker>,
    state: Mutex<State>,
}

impl SimulatedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn broker(&self) -> Arc<RequestBroker> {
        self.broker.clone()
    }

    /// Register a peer at the next free address.
    pub fn add(&self, peer: Peer) -> SocketAddrV4 {
        let mut state = self.state();

        let index = state.peers.len() as u32 + 1;
        let address = SocketAddrV4::new((0x0a00_0000 + index).into(), 6881);

        state.peers.insert(address, peer);

        address
    }

    /// Number of datagrams sent, or attempted, to `address`.
    pub fn sent_to(&self, address: SocketAddrV4) -> usize {
        self.state()
            .sent
            .iter()
            .filter(|(to, _)| *to == address)
            .count()
    }

    pub fn total_sent(&self) -> usize {
        self.state().sent.len()
    }

    /// Decoded messages sent to `address`.
    pub fn messages_to(&self, address: SocketAddrV4) -> Vec<Message> {
        self.state()
            .sent
            .iter()
            .filter(|(to, _)| *to == address)
            .filter_map(|(_, bytes)| Message::from_bytes(bytes).ok())
            .collect()
    }

    // === Private Methods ===

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closest_peers(peers: &HashMap<SocketAddrV4, Peer>, target: &Id) -> Vec<Node> {
        let mut nodes = peers
            .iter()
            .filter_map(|(address, peer)| match peer {
                Peer::Responsive { id, .. } => Some(Node::new(*id, *address)),
                _ => None,
            })
            .collect::<Vec<_>>();

        nodes.sort_by_key(|node| node.id.xor(target));
        nodes.truncate(MAX_BUCKET_SIZE_K);

        nodes
    }

    fn respond(transaction_id: u16, response: ResponseSpecific) -> Message {
        Message {
            transaction_id,
            version: None,
            requester_ip: None,
            read_only: false,
            message_type: MessageType::Response(response),
        }
    }
}

impl Transport for SimulatedNetwork {
    fn send(&self, bytes: &[u8], to: SocketAddrV4) -> std::io::Result<()> {
        let response = {
            let mut state = self.state();
            state.sent.push((to, bytes.to_vec()));

            let request = match Message::from_bytes(bytes) {
                Ok(Message {
                    transaction_id,
                    message_type:
                        MessageType::Request(RequestSpecific {
                            request_type: RequestTypeSpecific::FindNode(arguments),
                            ..
                        }),
                    ..
                }) => Some((transaction_id, arguments.target)),
                _ => None,
            };

            match (state.peers.get(&to), request) {
                (Some(Peer::Unreachable), _) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "unreachable",
                    ))
                }
                (Some(Peer::Responsive { id, nodes }), Some((transaction_id, target))) => {
                    let nodes = match nodes {
                        Some(nodes) => nodes.clone(),
                        None => Self::closest_peers(&state.peers, &target),
                    };

                    Some(Self::respond(
                        transaction_id,
                        ResponseSpecific::FindNode(FindNodeResponseArguments::new(*id, &nodes)),
                    ))
                }
                (Some(Peer::Malformed), Some((transaction_id, _))) => Some(Self::respond(
                    transaction_id,
                    ResponseSpecific::FindNode(FindNodeResponseArguments {
                        responder_id: Id::random(),
                        nodes: vec![1, 2, 3, 4, 5, 6, 7].into(),
                    }),
                )),
                _ => None,
            }
        };

        if let Some(message) = response {
            // Round trip through the wire format, as a real response would.
            if let Ok(message) = message.to_bytes().and_then(Message::from_bytes) {
                self.broker.resolve(message, to);
            }
        }

        Ok(())
    }
}
