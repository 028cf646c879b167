use serde::{Deserialize, Serialize};

/// A compute node known to the resource manager.
///
/// Identity is immutable; capacity may be updated administratively through
/// the monitor. Capacity is measured in abstract load units, not OS-level
/// utilization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Unique node identifier.
    pub node_id: String,
    /// Network endpoint in host:port format.
    pub address: String,
    /// Total load units this node can hold.
    pub capacity: u32,
}

impl ResourceNode {
    pub fn new(node_id: impl Into<String>, address: impl Into<String>, capacity: u32) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
            capacity,
        }
    }
}
