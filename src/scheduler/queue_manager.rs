use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

/// Named queues and their node memberships.
///
/// A scheduling queue is a logical grouping of nodes, not a data-structure
/// queue: jobs target a queue name, which resolves to a candidate node set.
/// The queue-to-nodes relation is the single source of truth; the reverse
/// lookup is derived under the same lock, so readers can never observe the
/// two directions disagreeing.
#[derive(Debug, Default)]
pub struct QueueManager {
    membership: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, BTreeSet<String>>> {
        self.membership.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a queue. Idempotent.
    pub fn add_queue(&self, name: &str) {
        self.lock().entry(name.to_string()).or_default();
    }

    /// Remove a queue and its membership edges. Nodes themselves are
    /// untouched, as are jobs already dispatched from this queue. Returns
    /// whether the queue existed.
    pub fn remove_queue(&self, name: &str) -> bool {
        let removed = self.lock().remove(name);
        if let Some(members) = &removed {
            tracing::info!(queue = name, members = members.len(), "Queue removed");
        }
        removed.is_some()
    }

    /// Add a node to a queue's membership. Idempotent. Returns false when
    /// the queue does not exist (membership is never created implicitly).
    pub fn add_node_to_queue(&self, node_id: &str, queue: &str) -> bool {
        match self.lock().get_mut(queue) {
            Some(members) => {
                members.insert(node_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Remove a node from a queue's membership. Idempotent.
    pub fn remove_node_from_queue(&self, node_id: &str, queue: &str) -> bool {
        match self.lock().get_mut(queue) {
            Some(members) => {
                members.remove(node_id);
                true
            }
            None => false,
        }
    }

    /// Member node ids of a queue, or `None` for an unknown queue name.
    pub fn nodes(&self, queue: &str) -> Option<BTreeSet<String>> {
        self.lock().get(queue).cloned()
    }

    /// Queues a node belongs to. Derived view over the membership relation.
    pub fn queues_for_node(&self, node_id: &str) -> BTreeSet<String> {
        self.lock()
            .iter()
            .filter(|(_, members)| members.contains(node_id))
            .map(|(queue, _)| queue.clone())
            .collect()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_queue_is_idempotent() {
        let qm = QueueManager::new();
        qm.add_queue("q1");
        qm.add_node_to_queue("n1", "q1");
        qm.add_queue("q1");
        // Re-adding must not wipe membership.
        assert!(qm.nodes("q1").unwrap().contains("n1"));
    }

    #[test]
    fn membership_round_trip() {
        let qm = QueueManager::new();
        qm.add_queue("q1");
        qm.add_queue("q2");
        assert!(qm.add_node_to_queue("n1", "q1"));
        assert!(qm.add_node_to_queue("n1", "q2"));
        assert!(qm.add_node_to_queue("n2", "q1"));

        assert_eq!(qm.nodes("q1").unwrap().len(), 2);
        let queues = qm.queues_for_node("n1");
        assert!(queues.contains("q1") && queues.contains("q2"));
    }

    #[test]
    fn unknown_queue_is_none_not_empty() {
        let qm = QueueManager::new();
        assert!(qm.nodes("ghost").is_none());
        assert!(!qm.add_node_to_queue("n1", "ghost"));
    }

    #[test]
    fn remove_queue_drops_edges_only() {
        let qm = QueueManager::new();
        qm.add_queue("q1");
        qm.add_queue("q2");
        qm.add_node_to_queue("n1", "q1");
        qm.add_node_to_queue("n1", "q2");

        assert!(qm.remove_queue("q1"));
        assert!(!qm.remove_queue("q1"));
        assert!(qm.nodes("q1").is_none());
        assert_eq!(qm.queues_for_node("n1"), ["q2".to_string()].into());
    }

    #[test]
    fn remove_node_from_queue_is_idempotent() {
        let qm = QueueManager::new();
        qm.add_queue("q1");
        qm.add_node_to_queue("n1", "q1");
        assert!(qm.remove_node_from_queue("n1", "q1"));
        assert!(qm.remove_node_from_queue("n1", "q1"));
        assert!(qm.nodes("q1").unwrap().is_empty());
    }
}
