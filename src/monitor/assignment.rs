use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::MonitorError;
use crate::monitor::Monitor;
use crate::node::ResourceNode;

#[derive(Debug)]
struct NodeEntry {
    node: ResourceNode,
    load: u32,
}

/// In-memory [`Monitor`] backed by a single node/load table.
///
/// All operations take one short critical section, so `assign_load` and
/// `reduce_load` are atomic with respect to each other and to snapshots.
#[derive(Debug, Default)]
pub struct AssignmentMonitor {
    table: Mutex<HashMap<String, NodeEntry>>,
}

impl AssignmentMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a monitor pre-populated with a node set, each at zero load.
    pub fn with_nodes(nodes: Vec<ResourceNode>) -> Self {
        let table = nodes
            .into_iter()
            .map(|node| (node.node_id.clone(), NodeEntry { node, load: 0 }))
            .collect();
        Self {
            table: Mutex::new(table),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, NodeEntry>> {
        // Load-table mutations never panic while holding the lock, so a
        // poisoned mutex still guards consistent state.
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Monitor for AssignmentMonitor {
    fn nodes(&self) -> Result<Vec<ResourceNode>, MonitorError> {
        let table = self.lock();
        let mut nodes: Vec<ResourceNode> = table.values().map(|e| e.node.clone()).collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }

    fn node_by_id(&self, node_id: &str) -> Result<Option<ResourceNode>, MonitorError> {
        Ok(self.lock().get(node_id).map(|e| e.node.clone()))
    }

    fn load(&self, node_id: &str) -> Result<u32, MonitorError> {
        self.lock()
            .get(node_id)
            .map(|e| e.load)
            .ok_or_else(|| MonitorError::NodeNotFound(node_id.to_string()))
    }

    fn assign_load(&self, node_id: &str, amount: u32) -> Result<bool, MonitorError> {
        let mut table = self.lock();
        let entry = table
            .get_mut(node_id)
            .ok_or_else(|| MonitorError::NodeNotFound(node_id.to_string()))?;

        // Checked: `amount` is caller-supplied and may exceed any sane
        // capacity; overflow must read as "does not fit", not wrap.
        match entry.load.checked_add(amount) {
            Some(total) if total <= entry.node.capacity => {
                entry.load = total;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn reduce_load(&self, node_id: &str, amount: u32) -> Result<bool, MonitorError> {
        let mut table = self.lock();
        match table.get_mut(node_id) {
            Some(entry) => {
                entry.load = entry.load.saturating_sub(amount);
                Ok(true)
            }
            // The node may have been removed while a job ran there.
            None => Ok(false),
        }
    }

    fn add_node(&self, node: ResourceNode) -> Result<(), MonitorError> {
        let mut table = self.lock();
        let load = table.get(&node.node_id).map(|e| e.load).unwrap_or(0);
        if load > node.capacity {
            tracing::warn!(
                node_id = %node.node_id,
                load,
                capacity = node.capacity,
                "Node re-registered below its reserved load; new admissions blocked until jobs drain"
            );
        }
        tracing::info!(node_id = %node.node_id, capacity = node.capacity, "Node registered");
        table.insert(node.node_id.clone(), NodeEntry { node, load });
        Ok(())
    }

    fn remove_node(&self, node_id: &str) -> Result<(), MonitorError> {
        let mut table = self.lock();
        match table.remove(node_id) {
            Some(entry) => {
                if entry.load > 0 {
                    tracing::warn!(
                        node_id,
                        load = entry.load,
                        "Node removed with reserved load; running jobs there are orphaned"
                    );
                }
                Ok(())
            }
            None => Err(MonitorError::NodeNotFound(node_id.to_string())),
        }
    }

    fn set_capacity(&self, node_id: &str, capacity: u32) -> Result<(), MonitorError> {
        let mut table = self.lock();
        let entry = table
            .get_mut(node_id)
            .ok_or_else(|| MonitorError::NodeNotFound(node_id.to_string()))?;
        if entry.load > capacity {
            tracing::warn!(
                node_id,
                load = entry.load,
                capacity,
                "Capacity set below reserved load; new admissions blocked until jobs drain"
            );
        }
        entry.node.capacity = capacity;
        Ok(())
    }
}
