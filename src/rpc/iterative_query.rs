//! State of a single iterative find_node lookup.

use tracing::{debug, trace};

use super::closest_nodes::{ClosestNodes, QueryState};
use crate::common::{Id, Node};

/// An iterative process of concurrently sending find_node requests to the closest known
/// nodes to the target, merging the closer nodes discovered in the responses, and
/// repeating this process until no closer nodes (that aren't already queried) are found.
#[derive(Debug)]
pub struct IterativeQuery {
    closest: ClosestNodes,
    /// Distance between the target and the closest candidate as of the previous round.
    last_distance: Option<Id>,
    rounds: usize,
    k: usize,
}

impl IterativeQuery {
    pub fn new(target: Id, k: usize) -> Self {
        trace!(?target, "New Query");

        Self {
            closest: ClosestNodes::new(target),
            last_distance: None,
            rounds: 0,
            k,
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.closest.target()
    }

    /// Every node discovered so far, closest first, with its query state.
    pub fn closest(&self) -> &ClosestNodes {
        &self.closest
    }

    /// Number of completed convergence checks.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Nodes that answered a find_node request, closest first.
    pub fn responders(&self) -> impl Iterator<Item = &Node> {
        self.closest.responders()
    }

    // === Public Methods ===

    /// Merge a batch of discovered nodes as new candidates.
    ///
    /// Returns the number of nodes that were not known before.
    pub fn add_result(&mut self, nodes: Vec<Node>) -> usize {
        nodes
            .into_iter()
            .filter(|node| self.closest.add(node.clone()))
            .count()
    }

    /// Pending candidates with a usable address, closest first.
    pub fn pending_nodes(&self) -> impl Iterator<Item = &Node> {
        self.closest
            .iter()
            .filter(|candidate| candidate.state == QueryState::Pending)
            .map(|candidate| &candidate.node)
            .filter(|node| node.has_usable_address())
    }

    /// Returns `true` if any candidate could still be sent a request.
    pub fn has_queryable(&self) -> bool {
        self.pending_nodes().next().is_some()
    }

    pub fn mark_queried(&mut self, id: &Id) {
        self.closest.set_state(id, QueryState::Queried);
    }

    pub fn mark_responded(&mut self, id: &Id) {
        self.closest.set_state(id, QueryState::Responded);
    }

    /// Count a round, and decide whether the lookup converged.
    ///
    /// It did if the closest candidate got no closer since the previous round,
    /// and every one of the `2 * k` closest candidates was already queried.
    pub fn is_close_enough(&mut self) -> bool {
        self.rounds += 1;

        let closest = match self.closest.first() {
            Some(candidate) => candidate.node.id,
            None => return false,
        };

        if closest.is_zero() {
            return false;
        }

        let distance = self.target().xor(&closest);

        let stalled = match self.last_distance {
            Some(last) => {
                let stalled = distance >= last;
                debug!(target = ?self.target(), stalled, ?distance, ?last, "Is close enough?");
                stalled
            }
            None => false,
        };

        self.last_distance = Some(distance);

        if !stalled {
            return false;
        }

        if self
            .closest
            .iter()
            .take(self.k * 2)
            .any(|candidate| candidate.state == QueryState::Pending)
        {
            debug!(target = ?self.target(), "Not queried nodes");
            return false;
        }

        debug!(target = ?self.target(), rounds = self.rounds, "Finish searching");

        true
    }
}
