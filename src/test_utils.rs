//! Test utilities for shardscroll unit tests
//!
//! Shared builders for shard context lists and membership views so the per-module
//! test blocks do not each repeat the same setup.

use crate::node_resolver::{DiscoveryNode, DiscoveryNodes};
use crate::scroll_id::ShardContextRef;

/// Build shard context references from `(node, context_id)` pairs
///
/// The ordinal of each reference is its position in `pairs`.
pub fn context_refs(pairs: &[(&str, i64)]) -> Vec<ShardContextRef> {
    pairs
        .iter()
        .map(|(node, context_id)| ShardContextRef::new(*node, *context_id))
        .collect()
}

/// Membership view with `node1`, `node2` and `node3`
pub fn three_node_directory() -> DiscoveryNodes {
    (1..=3)
        .map(|i| DiscoveryNode::new(format!("node{}", i), format!("127.0.0.1:{}", 9300 + i)))
        .collect()
}

/// The five shard contexts used by the scatter-gather scenarios
///
/// Two contexts on `node1`, one on `node2`, two on `node3`. Context `17` sits at
/// ordinal 3.
pub fn five_shard_context() -> Vec<ShardContextRef> {
    context_refs(&[("node1", 1), ("node2", 2), ("node3", 3), ("node1", 17), ("node3", 0)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_resolver::NodeDirectory;
    use crate::identifiers::NodeId;

    #[test]
    fn test_context_refs_keep_order() {
        let refs = context_refs(&[("a", 1), ("b", -1)]);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].node().as_str(), "b");
        assert_eq!(refs[1].context_id().raw(), -1);
    }

    #[test]
    fn test_three_node_directory() {
        let nodes = three_node_directory();
        assert_eq!(nodes.len(), 3);
        assert!(nodes.get(&NodeId::new("node2")).is_some());
        assert_eq!(five_shard_context().len(), 5);
    }
}
