pub mod assignment;

pub use assignment::AssignmentMonitor;

use crate::error::MonitorError;
use crate::node::ResourceNode;

/// Tracks the live node set and each node's reserved load.
///
/// `assign_load` is the sole admission-control gate: it must be an atomic
/// test-and-set, since concurrent dispatch decisions and completion callbacks
/// compete for the same node's headroom. Every successful `assign_load` is
/// paired with exactly one `reduce_load` when the job reaches a terminal
/// state.
pub trait Monitor: Send + Sync {
    /// Snapshot of all known nodes.
    fn nodes(&self) -> Result<Vec<ResourceNode>, MonitorError>;

    /// Look up a node by id. Unknown ids are `Ok(None)`, not an error, so
    /// dangling queue-membership references are tolerated at dispatch time.
    fn node_by_id(&self, node_id: &str) -> Result<Option<ResourceNode>, MonitorError>;

    /// Current reserved load on a node.
    fn load(&self, node_id: &str) -> Result<u32, MonitorError>;

    /// Atomically reserve `amount` load units if they fit within capacity.
    /// Returns `false` with no side effect when they do not.
    fn assign_load(&self, node_id: &str, amount: u32) -> Result<bool, MonitorError>;

    /// Atomically release `amount` load units, floored at zero. Returns
    /// `false` when the node is unknown (e.g. removed while a job ran there).
    fn reduce_load(&self, node_id: &str, amount: u32) -> Result<bool, MonitorError>;

    /// Register a node. Replaces any existing node with the same id; the
    /// replaced node's reserved load carries over.
    fn add_node(&self, node: ResourceNode) -> Result<(), MonitorError>;

    /// Remove a node. Allowed even with nonzero reserved load; jobs still
    /// running there are orphaned and surfaced as failures by the scheduler.
    fn remove_node(&self, node_id: &str) -> Result<(), MonitorError>;

    /// Administratively update a node's total capacity. May drop below the
    /// node's current reserved load: the capacity invariant is enforced at
    /// admission only, so existing reservations stand and new ones are
    /// refused until enough load drains.
    fn set_capacity(&self, node_id: &str, capacity: u32) -> Result<(), MonitorError>;
}
