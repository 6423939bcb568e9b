//! Serialize and deserialize Krpc messages.

mod internal;

use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;

use crate::common::{Id, Node, ID_SIZE};
use crate::{Error, Result};

/// Size of a compact node info entry: 20 bytes Id, 4 bytes IPv4, 2 bytes port.
pub const COMPACT_NODE_SIZE: usize = ID_SIZE + 6;

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    pub transaction_id: u16,

    /// The version of the requester or responder.
    pub version: Option<Vec<u8>>,

    /// The IP address and port of the requester as seen from the responder's point of view.
    /// This should be set only on response, but is defined at this level with the other
    /// common fields to avoid defining yet another layer on the response objects.
    pub requester_ip: Option<SocketAddrV4>,

    pub message_type: MessageType,

    /// For bep0043. When set true on a request, indicates that the requester can't reply to
    /// requests and that responders should not add requester to their routing tables.
    pub read_only: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),

    Error(ErrorSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ErrorSpecific {
    pub code: i32,
    pub description: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct RequestSpecific {
    pub requester_id: Id,
    pub request_type: RequestTypeSpecific,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestTypeSpecific {
    Ping,
    FindNode(FindNodeRequestArguments),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    Ping(PingResponseArguments),
    FindNode(FindNodeResponseArguments),
}

// === PING ===

#[derive(Debug, PartialEq, Clone)]
pub struct PingResponseArguments {
    pub responder_id: Id,
}

// === FIND_NODE ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeRequestArguments {
    pub target: Id,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeResponseArguments {
    pub responder_id: Id,
    /// Raw compact node info, exactly as received.
    pub nodes: Bytes,
}

impl FindNodeResponseArguments {
    pub fn new(responder_id: Id, nodes: &[Node]) -> Self {
        Self {
            responder_id,
            nodes: nodes4_to_bytes(nodes).into(),
        }
    }

    /// Decode the `nodes` field, see [compact_nodes].
    pub fn nodes(&self) -> Vec<Node> {
        compact_nodes(&self.nodes)
    }
}

impl Message {
    fn into_serde_message(self) -> internal::DHTMessage {
        internal::DHTMessage {
            transaction_id: self.transaction_id.to_be_bytes().to_vec(),
            version: self.version,
            ip: self
                .requester_ip
                .map(|sockaddr| sockaddr_to_bytes(&sockaddr).to_vec()),
            read_only: if self.read_only { Some(1) } else { None },
            variant: match self.message_type {
                MessageType::Request(RequestSpecific {
                    requester_id,
                    request_type,
                }) => internal::DHTMessageVariant::Request(match request_type {
                    RequestTypeSpecific::Ping => internal::DHTRequestSpecific::Ping {
                        arguments: internal::DHTPingRequestArguments {
                            id: requester_id.into(),
                        },
                    },
                    RequestTypeSpecific::FindNode(find_node_args) => {
                        internal::DHTRequestSpecific::FindNode {
                            arguments: internal::DHTFindNodeRequestArguments {
                                id: requester_id.into(),
                                target: find_node_args.target.into(),
                            },
                        }
                    }
                }),

                MessageType::Response(res) => internal::DHTMessageVariant::Response(match res {
                    ResponseSpecific::Ping(ping_args) => internal::DHTResponseSpecific::Ping {
                        arguments: internal::DHTPingResponseArguments {
                            id: ping_args.responder_id.into(),
                        },
                    },
                    ResponseSpecific::FindNode(find_node_args) => {
                        internal::DHTResponseSpecific::FindNode {
                            arguments: internal::DHTFindNodeResponseArguments {
                                id: find_node_args.responder_id.into(),
                                nodes: find_node_args.nodes.to_vec().into(),
                            },
                        }
                    }
                }),

                MessageType::Error(err) => {
                    internal::DHTMessageVariant::Error(internal::DHTErrorSpecific {
                        error_info: (err.code, err.description),
                    })
                }
            },
        }
    }

    fn from_serde_message(msg: internal::DHTMessage) -> Result<Message> {
        Ok(Message {
            transaction_id: transaction_id(msg.transaction_id)?,
            version: msg.version,
            requester_ip: match msg.ip {
                Some(ip) => Some(bytes_to_sockaddr(ip)?),
                _ => None,
            },
            read_only: matches!(msg.read_only, Some(read_only) if read_only > 0),
            message_type: match msg.variant {
                internal::DHTMessageVariant::Request(req_variant) => {
                    MessageType::Request(match req_variant {
                        internal::DHTRequestSpecific::Ping { arguments } => RequestSpecific {
                            requester_id: Id::from(arguments.id),
                            request_type: RequestTypeSpecific::Ping,
                        },
                        internal::DHTRequestSpecific::FindNode { arguments } => {
                            RequestSpecific {
                                requester_id: Id::from(arguments.id),
                                request_type: RequestTypeSpecific::FindNode(
                                    FindNodeRequestArguments {
                                        target: Id::from(arguments.target),
                                    },
                                ),
                            }
                        }
                    })
                }

                internal::DHTMessageVariant::Response(res_variant) => {
                    MessageType::Response(match res_variant {
                        internal::DHTResponseSpecific::Ping { arguments } => {
                            ResponseSpecific::Ping(PingResponseArguments {
                                responder_id: Id::from(arguments.id),
                            })
                        }
                        internal::DHTResponseSpecific::FindNode { arguments } => {
                            ResponseSpecific::FindNode(FindNodeResponseArguments {
                                responder_id: Id::from(arguments.id),
                                nodes: Bytes::from(arguments.nodes.into_vec()),
                            })
                        }
                    })
                }

                internal::DHTMessageVariant::Error(err) => MessageType::Error(ErrorSpecific {
                    code: err.error_info.0,
                    description: err.error_info.1,
                }),
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.clone()
            .into_serde_message()
            .to_bytes()
            .map_err(Error::BencodeError)
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message> {
        Message::from_serde_message(internal::DHTMessage::from_bytes(bytes.as_ref())?)
    }

    /// Return the Id of the sender of the Message, unless it is an error message.
    pub fn get_author_id(&self) -> Option<Id> {
        let id = match &self.message_type {
            MessageType::Request(arguments) => arguments.requester_id,
            MessageType::Response(response_variant) => match response_variant {
                ResponseSpecific::Ping(arguments) => arguments.responder_id,
                ResponseSpecific::FindNode(arguments) => arguments.responder_id,
            },
            MessageType::Error(_) => {
                return None;
            }
        };

        Some(id)
    }

    /// Returns the `nodes` field of a find_node response, if any.
    pub fn get_closer_nodes(&self) -> Option<&FindNodeResponseArguments> {
        match &self.message_type {
            MessageType::Response(ResponseSpecific::FindNode(arguments)) => Some(arguments),
            _ => None,
        }
    }
}

/// Return the transaction Id as a u16
pub fn transaction_id(bytes: Vec<u8>) -> Result<u16> {
    if bytes.len() == 2 {
        return Ok(((bytes[0] as u16) << 8) | (bytes[1] as u16));
    } else if bytes.len() == 1 {
        return Ok(bytes[0] as u16);
    }

    Err(Error::InvalidTransactionId(bytes))
}

fn bytes_to_sockaddr<T: AsRef<[u8]>>(bytes: T) -> Result<SocketAddrV4> {
    match bytes.as_ref() {
        [a, b, c, d, p1, p2] => Ok(SocketAddrV4::new(
            Ipv4Addr::new(*a, *b, *c, *d),
            u16::from_be_bytes([*p1, *p2]),
        )),
        // IPv6 (18 bytes) included.
        other => Err(Error::InvalidSocketAddress(other.len())),
    }
}

pub fn sockaddr_to_bytes(sockaddr: &SocketAddrV4) -> [u8; 6] {
    let mut bytes = [0_u8; 6];

    bytes[..4].copy_from_slice(&sockaddr.ip().octets());
    bytes[4..].copy_from_slice(&sockaddr.port().to_be_bytes());

    bytes
}

/// Encode nodes as concatenated compact node info.
pub fn nodes4_to_bytes(nodes: &[Node]) -> Vec<u8> {
    let mut vec = Vec::with_capacity(COMPACT_NODE_SIZE * nodes.len());
    for node in nodes {
        vec.extend_from_slice(node.id.as_bytes());
        vec.extend_from_slice(&sockaddr_to_bytes(&node.address));
    }
    vec
}

/// Decode concatenated compact node info.
///
/// Every complete 26 bytes entry is decoded, a trailing partial entry is ignored.
pub fn compact_nodes<T: AsRef<[u8]>>(bytes: T) -> Vec<Node> {
    bytes
        .as_ref()
        .chunks_exact(COMPACT_NODE_SIZE)
        .filter_map(|chunk| {
            let id = Id::from_bytes(&chunk[..ID_SIZE]).ok()?;
            let address = bytes_to_sockaddr(&chunk[ID_SIZE..]).ok()?;

            Some(Node::new(id, address))
        })
        .collect()
}
