//! Correlate incoming responses with inflight requests by transaction_id.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use tracing::trace;

use crate::common::{Message, Node};

/// A find_node request that was sent and awaits its response.
#[derive(Debug)]
pub struct Request {
    pub transaction_id: u16,
    /// The node this request was sent to.
    pub to: Node,
    response: Receiver<Message>,
}

impl Request {
    pub fn new(transaction_id: u16, to: Node, response: Receiver<Message>) -> Self {
        Self {
            transaction_id,
            to,
            response,
        }
    }
}

#[derive(Debug)]
struct InflightRequest {
    to: SocketAddrV4,
    sender: Sender<Message>,
}

impl InflightRequest {
    // Same as SocketAddr::eq but ignores the ip if it is unspecified for testing reasons.
    fn does_match(&self, from: &SocketAddrV4) -> bool {
        if self.to.port() != from.port() {
            return false;
        }

        if self.to.ip().is_unspecified() {
            return true;
        }

        self.to.ip() == from.ip()
    }
}

/// Registry of inflight requests, shared between the threads sending requests
/// and the thread receiving responses.
#[derive(Debug, Default)]
pub struct RequestBroker {
    requests: Mutex<HashMap<u16, InflightRequest>>,
}

impl RequestBroker {
    pub fn new() -> Self {
        Self::default()
    }

    // === Public Methods ===

    /// Register a request sent to `to`, and return the receiver of its response.
    ///
    /// Registering an already inflight transaction_id replaces the old request,
    /// whose receiver gets disconnected.
    pub fn add_request(&self, transaction_id: u16, to: SocketAddrV4) -> Receiver<Message> {
        let (sender, receiver) = flume::bounded(1);

        self.requests()
            .insert(transaction_id, InflightRequest { to, sender });

        receiver
    }

    /// Deliver a response or an error message to its inflight request.
    ///
    /// Returns `false` if no request with this transaction_id was sent to `from`.
    pub fn resolve(&self, message: Message, from: SocketAddrV4) -> bool {
        let mut requests = self.requests();

        let matches = requests
            .get(&message.transaction_id)
            .map(|request| request.does_match(&from))
            .unwrap_or(false);

        if !matches {
            trace!(
                context = "broker",
                transaction_id = message.transaction_id,
                ?from,
                "Unexpected response"
            );
            return false;
        }

        match requests.remove(&message.transaction_id) {
            // Receiver may already be gone if the round timed out.
            Some(request) => request.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Forget an inflight request, its receiver gets disconnected.
    pub fn remove(&self, transaction_id: u16) -> bool {
        self.requests().remove(&transaction_id).is_some()
    }

    /// Returns `true` if this transaction_id is still inflight.
    pub fn contains(&self, transaction_id: u16) -> bool {
        self.requests().contains_key(&transaction_id)
    }

    pub fn len(&self) -> usize {
        self.requests().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests().is_empty()
    }

    // === Private Methods ===

    fn requests(&self) -> MutexGuard<'_, HashMap<u16, InflightRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wait for all requests to resolve, for at most `timeout` in total.
///
/// Each request resolves to its response, or to `None` if it wasn't answered in time.
pub fn fan_in(requests: Vec<Request>, timeout: Duration) -> Vec<(Request, Option<Message>)> {
    let deadline = Instant::now() + timeout;

    requests
        .into_iter()
        .map(|request| {
            let response = request.response.recv_deadline(deadline).ok();
            (request, response)
        })
        .collect()
}
