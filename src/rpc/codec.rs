//! Encode outgoing Krpc messages with fresh transaction ids.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU16, Ordering};

use crate::common::{
    FindNodeRequestArguments, Id, Message, MessageType, RequestSpecific,
    RequestTypeSpecific, ResponseSpecific,
};
use crate::Result;

const VERSION: [u8; 4] = [78, 70, 0, 1]; // "NF" version 01

#[derive(Debug)]
pub struct Codec {
    id: Id,
    next_tid: AtomicU16,
}

impl Codec {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            next_tid: AtomicU16::new(0),
        }
    }

    /// Encode a find_node request for `target`.
    ///
    /// Returns the fresh transaction_id and the encoded bytes.
    pub fn find_node(&self, target: Id) -> Result<(u16, Vec<u8>)> {
        self.request(RequestTypeSpecific::FindNode(FindNodeRequestArguments {
            target,
        }))
    }

    /// Encode a response to the request `transaction_id` received from `requester`.
    pub fn response(
        &self,
        requester: SocketAddrV4,
        transaction_id: u16,
        response: ResponseSpecific,
    ) -> Result<Vec<u8>> {
        self.response_message(MessageType::Response(response), requester, transaction_id)
            .to_bytes()
    }

    // === Private Methods ===

    /// Increments next_tid and returns the previous value.
    fn tid(&self) -> u16 {
        // We don't bother much with reusing freed transaction ids,
        // a round times out long before we run out of 65535 ids.
        self.next_tid.fetch_add(1, Ordering::Relaxed)
    }

    fn request(&self, request_type: RequestTypeSpecific) -> Result<(u16, Vec<u8>)> {
        let transaction_id = self.tid();

        let message = Message {
            transaction_id,
            message_type: MessageType::Request(RequestSpecific {
                requester_id: self.id,
                request_type,
            }),
            version: Some(VERSION.to_vec()),
            read_only: false,
            requester_ip: None,
        };

        Ok((transaction_id, message.to_bytes()?))
    }

    /// Same as request but with request transaction_id and the requester_ip.
    fn response_message(
        &self,
        message_type: MessageType,
        requester_ip: SocketAddrV4,
        request_tid: u16,
    ) -> Message {
        Message {
            transaction_id: request_tid,
            message_type,
            version: Some(VERSION.to_vec()),
            read_only: false,
            // BEP_0042 Only relevant in responses.
            requester_ip: Some(requester_ip),
        }
    }
}
