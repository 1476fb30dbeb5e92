//! Node resolution against the cluster membership view
//!
//! The coordinator never talks to cluster membership directly. It asks a
//! [`NodeDirectory`] (an external collaborator) to map a node id from a scroll id to
//! a connectable node. [`NodeResolver`] turns a missing node into a
//! [`ScrollError::NodeUnavailable`] for that single shard. The membership view is
//! only ever read.

use crate::error::ScrollError;
use crate::identifiers::NodeId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A cluster node that shard requests can be sent to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryNode {
    id: NodeId,
    address: String,
}

impl DiscoveryNode {
    /// Create a node with the given id and transport address
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Transport address requests to this node are sent to
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for DiscoveryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{{{}}}", self.id, self.address)
    }
}

/// Read-only view of cluster membership
pub trait NodeDirectory: Send + Sync {
    /// Look up a live node by id
    fn get(&self, node_id: &NodeId) -> Option<DiscoveryNode>;
}

/// Immutable snapshot of the nodes currently in the cluster
#[derive(Debug, Clone, Default)]
pub struct DiscoveryNodes {
    nodes: FxHashMap<NodeId, DiscoveryNode>,
}

impl DiscoveryNodes {
    /// Create an empty membership view
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, replacing any node with the same id
    pub fn add(mut self, node: DiscoveryNode) -> Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over the nodes in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveryNode> {
        self.nodes.values()
    }
}

impl FromIterator<DiscoveryNode> for DiscoveryNodes {
    fn from_iter<I: IntoIterator<Item = DiscoveryNode>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().map(|node| (node.id.clone(), node)).collect(),
        }
    }
}

impl NodeDirectory for DiscoveryNodes {
    fn get(&self, node_id: &NodeId) -> Option<DiscoveryNode> {
        self.nodes.get(node_id).cloned()
    }
}

/// Resolves node ids from scroll ids into connectable nodes
#[derive(Clone)]
pub struct NodeResolver {
    directory: Arc<dyn NodeDirectory>,
}

impl NodeResolver {
    pub fn new(directory: Arc<dyn NodeDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve `node_id` against the current membership view
    ///
    /// # Errors
    /// Returns `NodeUnavailable` naming `node_id` if the node is not a cluster member.
    pub fn resolve(&self, node_id: &NodeId) -> Result<DiscoveryNode, ScrollError> {
        self.directory
            .get(node_id)
            .ok_or_else(|| ScrollError::node_unavailable(node_id))
    }
}

impl fmt::Debug for NodeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeResolver").finish_non_exhaustive()
    }
}
