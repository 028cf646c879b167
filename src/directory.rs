use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;
use crate::node::ResourceNode;

/// Supplies the initial node set and queue memberships.
///
/// The concrete storage format is a collaborator's concern; the core only
/// needs these two loads at bootstrap.
pub trait NodeDirectory {
    fn load_nodes(&self) -> Result<Vec<ResourceNode>, DirectoryError>;

    /// node id -> queue names the node belongs to.
    fn load_queue_assignments(&self)
        -> Result<HashMap<String, BTreeSet<String>>, DirectoryError>;
}

/// One node-to-queue membership edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueAssignment {
    pub node_id: String,
    pub queue: String,
}

/// Directory stored as two JSON files: an array of nodes and an array of
/// `{node_id, queue}` assignment records.
#[derive(Debug, Clone)]
pub struct JsonDirectory {
    nodes_path: PathBuf,
    assignments_path: PathBuf,
}

impl JsonDirectory {
    pub fn new(nodes_path: impl Into<PathBuf>, assignments_path: impl Into<PathBuf>) -> Self {
        Self {
            nodes_path: nodes_path.into(),
            assignments_path: assignments_path.into(),
        }
    }

    fn read<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DirectoryError> {
        let raw = fs::read_to_string(path).map_err(|source| DirectoryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| DirectoryError::Malformed {
            path: path.display().to_string(),
            source,
        })
    }
}

impl NodeDirectory for JsonDirectory {
    fn load_nodes(&self) -> Result<Vec<ResourceNode>, DirectoryError> {
        Self::read(&self.nodes_path)
    }

    fn load_queue_assignments(
        &self,
    ) -> Result<HashMap<String, BTreeSet<String>>, DirectoryError> {
        let records: Vec<QueueAssignment> = Self::read(&self.assignments_path)?;
        let mut assignments: HashMap<String, BTreeSet<String>> = HashMap::new();
        for record in records {
            assignments
                .entry(record.node_id)
                .or_default()
                .insert(record.queue);
        }
        Ok(assignments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("resman-{}-{}", std::process::id(), name));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_nodes_and_assignments() {
        let nodes = write_temp(
            "nodes.json",
            r#"[{"node_id":"n1","address":"127.0.0.1:9001","capacity":10},
                {"node_id":"n2","address":"127.0.0.1:9002","capacity":4}]"#,
        );
        let assignments = write_temp(
            "assignments.json",
            r#"[{"node_id":"n1","queue":"q1"},
                {"node_id":"n1","queue":"q2"},
                {"node_id":"n2","queue":"q1"}]"#,
        );
        let dir = JsonDirectory::new(&nodes, &assignments);

        let loaded = dir.load_nodes().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].node_id, "n1");
        assert_eq!(loaded[0].capacity, 10);

        let mapping = dir.load_queue_assignments().unwrap();
        assert_eq!(mapping["n1"].len(), 2);
        assert_eq!(mapping["n2"], ["q1".to_string()].into());

        fs::remove_file(nodes).ok();
        fs::remove_file(assignments).ok();
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = JsonDirectory::new("/nonexistent/nodes.json", "/nonexistent/assign.json");
        assert!(matches!(dir.load_nodes(), Err(DirectoryError::Io { .. })));
    }

    #[test]
    fn malformed_json_is_reported_with_path() {
        let nodes = write_temp("bad-nodes.json", "not json");
        let dir = JsonDirectory::new(&nodes, &nodes);
        match dir.load_nodes() {
            Err(DirectoryError::Malformed { path, .. }) => {
                assert!(path.contains("bad-nodes.json"));
            }
            other => panic!("expected Malformed, got {:?}", other.map(|_| ())),
        }
        fs::remove_file(nodes).ok();
    }
}
