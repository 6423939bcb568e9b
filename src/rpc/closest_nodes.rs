use std::slice::Iter;

use crate::common::{Id, Node};

/// Where a candidate stands within a single lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Known, but no request was sent to it yet.
    Pending,
    /// A find_node request was sent (or attempted) and must never be repeated.
    Queried,
    /// Queried, and answered with a `nodes` field.
    Responded,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub node: Node,
    pub state: QueryState,
}

/// Nodes discovered during a lookup, sorted by their distance to the target.
#[derive(Debug, Clone)]
pub struct ClosestNodes {
    target: Id,
    candidates: Vec<Candidate>,
}

impl ClosestNodes {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            candidates: Vec::with_capacity(200),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// The candidate closest to the target.
    pub fn first(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn iter(&self) -> Iter<'_, Candidate> {
        self.candidates.iter()
    }

    pub fn state(&self, id: &Id) -> Option<QueryState> {
        self.position(id).map(|index| self.candidates[index].state)
    }

    /// Nodes that answered a find_node request, closest first.
    pub fn responders(&self) -> impl Iterator<Item = &Node> {
        self.candidates
            .iter()
            .filter(|candidate| candidate.state == QueryState::Responded)
            .map(|candidate| &candidate.node)
    }

    // === Public Methods ===

    /// Insert a [QueryState::Pending] candidate at its sorted position.
    ///
    /// Returns `false` if the node is the target itself or is already known.
    pub fn add(&mut self, node: Node) -> bool {
        if node.id == self.target {
            return false;
        }

        // Xor with the same target is a bijection, so equal distances mean equal ids.
        let seek = node.id.xor(&self.target);

        match self
            .candidates
            .binary_search_by(|probe| probe.node.id.xor(&self.target).cmp(&seek))
        {
            Ok(_) => false,
            Err(pos) => {
                self.candidates.insert(
                    pos,
                    Candidate {
                        node,
                        state: QueryState::Pending,
                    },
                );
                true
            }
        }
    }

    /// Returns `false` if no candidate has this id.
    pub fn set_state(&mut self, id: &Id, state: QueryState) -> bool {
        match self.position(id) {
            Some(index) => {
                self.candidates[index].state = state;
                true
            }
            None => false,
        }
    }

    // === Private Methods ===

    fn position(&self, id: &Id) -> Option<usize> {
        let seek = id.xor(&self.target);

        self.candidates
            .binary_search_by(|probe| probe.node.id.xor(&self.target).cmp(&seek))
            .ok()
    }
}

impl<'a> IntoIterator for &'a ClosestNodes {
    type Item = &'a Candidate;
    type IntoIter = Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sorted_by_distance() {
        let target = Id::random();

        let mut closest_nodes = ClosestNodes::new(target);

        for _ in 0..100 {
            assert!(closest_nodes.add(Node::random()));
        }

        assert_eq!(closest_nodes.len(), 100);

        let distances = closest_nodes
            .iter()
            .map(|candidate| candidate.node.id.xor(&target))
            .collect::<Vec<_>>();

        let mut sorted = distances.clone();
        sorted.sort();

        assert_eq!(sorted, distances);
        assert!(closest_nodes
            .iter()
            .all(|candidate| candidate.state == QueryState::Pending));
    }

    #[test]
    fn reject_target_and_duplicates() {
        let target = Id::random();
        let mut closest_nodes = ClosestNodes::new(target);

        let node = Node::random();

        assert!(!closest_nodes.add(Node::new(target, "1.1.1.1:1".parse().unwrap())));
        assert!(closest_nodes.add(node.clone()));
        assert!(!closest_nodes.add(Node::new(node.id, "2.2.2.2:2".parse().unwrap())));

        assert_eq!(closest_nodes.len(), 1);
        assert_eq!(closest_nodes.first().unwrap().node.address(), node.address());
    }

    #[test]
    fn duplicate_does_not_reset_state() {
        let mut closest_nodes = ClosestNodes::new(Id::random());
        let node = Node::random();

        closest_nodes.add(node.clone());
        assert!(closest_nodes.set_state(&node.id, QueryState::Queried));

        assert!(!closest_nodes.add(node.clone()));
        assert_eq!(closest_nodes.state(&node.id), Some(QueryState::Queried));
    }

    #[test]
    fn responders() {
        let mut closest_nodes = ClosestNodes::new(Id::random());

        let nodes = (0..5).map(|_| Node::random()).collect::<Vec<_>>();
        for node in &nodes {
            closest_nodes.add(node.clone());
        }

        closest_nodes.set_state(&nodes[1].id, QueryState::Responded);
        closest_nodes.set_state(&nodes[3].id, QueryState::Queried);

        assert!(!closest_nodes.set_state(&Id::random(), QueryState::Queried));

        let responders = closest_nodes.responders().collect::<Vec<_>>();
        assert_eq!(responders, vec![&nodes[1]]);
    }
}
