//! Per-shard failure aggregation
//!
//! Every shard of a request that cannot be resolved, sent, or completed successfully
//! leaves exactly one [`ShardFailure`] behind. Failures are recorded concurrently
//! from shard callbacks and stored by ordinal, so the final report is always in
//! ascending ordinal order no matter in which order the failures arrived. Two runs
//! against the same failure pattern produce identical listings.

use crate::error::ScrollError;
use crate::identifiers::NodeId;
use crate::result_collector::ResultCollector;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use tracing::warn;

/// Failure of a single shard within a request
#[derive(Debug, Clone)]
pub struct ShardFailure {
    ordinal: usize,
    node: Option<NodeId>,
    cause: Arc<ScrollError>,
}

impl ShardFailure {
    /// Create a failure record for the shard at `ordinal`
    pub fn new(ordinal: usize, node: Option<NodeId>, cause: ScrollError) -> Self {
        Self {
            ordinal,
            node,
            cause: Arc::new(cause),
        }
    }

    /// Position of the failed shard within the request
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Node the shard context lives on, when known
    pub fn node(&self) -> Option<&NodeId> {
        self.node.as_ref()
    }

    pub fn cause(&self) -> &ScrollError {
        &self.cause
    }

    pub(crate) fn cause_arc(&self) -> &Arc<ScrollError> {
        &self.cause
    }

    /// Compact failure reason, e.g. `ShardExecutionError[BOOM on shard]`
    pub fn reason(&self) -> String {
        format!("{}[{}]", self.cause.kind_name(), self.cause)
    }
}

impl Display for ShardFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "shard [{}] on node [{}]: {}", self.ordinal, node, self.reason()),
            None => write!(f, "shard [{}]: {}", self.ordinal, self.reason()),
        }
    }
}

/// Thread-safe collection of shard failures keyed by ordinal
#[derive(Debug)]
pub struct ShardFailureCollector {
    slots: ResultCollector<ShardFailure>,
}

impl ShardFailureCollector {
    /// Create a collector for a request with `size` shards
    pub fn new(size: usize) -> Self {
        Self {
            slots: ResultCollector::new(size),
        }
    }

    /// Record the failure of the shard at `ordinal`
    ///
    /// Safe to call concurrently for different ordinals. Returns `false` if the
    /// ordinal already failed or is out of range; the first record is kept.
    pub fn record(&self, ordinal: usize, node: Option<NodeId>, cause: ScrollError) -> bool {
        match self.slots.set_once(ordinal, ShardFailure::new(ordinal, node, cause)) {
            Ok(()) => true,
            Err(e) => {
                warn!("Ignoring shard failure for ordinal {}: {}", ordinal, e);
                false
            }
        }
    }

    /// Number of failed shards
    pub fn len(&self) -> usize {
        self.slots.filled_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of shards this collector was sized for
    pub fn size(&self) -> usize {
        self.slots.size()
    }

    /// Check whether every shard has failed
    pub fn all_failed(&self) -> bool {
        self.size() > 0 && self.len() == self.size()
    }

    /// Failure recorded for `ordinal`, if any
    pub fn get(&self, ordinal: usize) -> Option<&ShardFailure> {
        self.slots.get(ordinal)
    }

    /// Failure with the lowest ordinal
    pub fn first(&self) -> Option<&ShardFailure> {
        self.slots.iter().next().map(|(_, failure)| failure)
    }

    /// Build the failure report in ascending ordinal order
    ///
    /// Call only after all shards have completed. When every shard failed the report
    /// holds one record per ordinal, each with its own node and cause, even when the
    /// causes are identical.
    pub fn build_report(&self) -> Vec<ShardFailure> {
        self.slots.iter().map(|(_, failure)| failure.clone()).collect()
    }
}
