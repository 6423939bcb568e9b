//! Handle incoming messages: resolve responses, answer ping and find_node requests.

use std::net::SocketAddrV4;

use tracing::{debug, trace};

use crate::common::{
    FindNodeRequestArguments, FindNodeResponseArguments, Message, MessageType,
    PingResponseArguments, RequestSpecific, RequestTypeSpecific, ResponseSpecific,
};

use super::Rpc;

impl Rpc {
    /// Route a message received from `from`.
    ///
    /// Responses and errors go to the inflight request waiting for them,
    /// requests are answered from the routing table.
    pub fn handle_message(&self, message: Message, from: SocketAddrV4) {
        match &message.message_type {
            MessageType::Request(request) => {
                self.handle_request(from, message.transaction_id, request);
                return;
            }
            MessageType::Error(error) => {
                debug!(?error, ?from, "RPC Error response");
            }
            MessageType::Response(_) => {}
        }

        if !self.broker.resolve(message, from) {
            trace!(?from, "Response to no inflight request");
        }
    }

    fn handle_request(&self, from: SocketAddrV4, transaction_id: u16, request: &RequestSpecific) {
        let response = match &request.request_type {
            RequestTypeSpecific::Ping => ResponseSpecific::Ping(PingResponseArguments {
                responder_id: self.id,
            }),
            RequestTypeSpecific::FindNode(FindNodeRequestArguments { target }) => {
                let closest = self.read_table().closest(target, self.config.k);

                ResponseSpecific::FindNode(FindNodeResponseArguments::new(self.id, &closest))
            }
        };

        let bytes = match self.codec.response(from, transaction_id, response) {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(?error, ?from, "Failed to encode response");
                return;
            }
        };

        if let Err(error) = self.transport.send(&bytes, from) {
            debug!(?error, ?from, "Failed to send response");
        }
    }
}
