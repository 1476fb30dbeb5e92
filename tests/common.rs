//! Common test utilities for integration tests
//!
//! This module provides the shard strategy and cluster fixtures shared by the
//! integration tests, which cannot access the crate's own test_utils module.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use shardscroll::{
    BoxError, DiscoveryNode, DiscoveryNodes, NodeId, PhaseResponder, ResultCollector, ScrollError,
    ScrollPhaseStrategy, ScrollToken, SearchPhase, ShardContextRef, ShardListener, ShardScrollRequest,
    QUERY_THEN_FETCH_TYPE,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Barrier;

/// Name of the phase run after shard collection
pub const TEST_PHASE: &str = "TEST_PHASE";

/// Message of every injected shard failure
pub const SHARD_FAILURE_MESSAGE: &str = "BOOM on shard";

/// What a shard returns in the first phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestShardResult {
    pub node: NodeId,
    pub context_id: i64,
}

/// Shard strategy answering from spawned tokio tasks
///
/// Replies go out from tasks on `handle`, so they complete on runtime worker threads in
/// no particular order. Without a handle every shard answers inline.
#[allow(dead_code)]
pub struct TestStrategy {
    handle: Option<Handle>,
    failing: FxHashSet<i64>,
    fail_all: bool,
    tag_failures: bool,
    next_phase_error: Option<String>,
    barrier: Option<Arc<Barrier>>,
    moved: AtomicUsize,
    sent_to: Mutex<Vec<NodeId>>,
}

#[allow(dead_code)]
impl TestStrategy {
    /// Strategy replying from tasks on the current runtime
    pub fn spawning() -> Self {
        Self::new(Some(Handle::current()))
    }

    /// Strategy replying on the dispatching thread
    pub fn inline() -> Self {
        Self::new(None)
    }

    fn new(handle: Option<Handle>) -> Self {
        Self {
            handle,
            failing: FxHashSet::default(),
            fail_all: false,
            tag_failures: false,
            next_phase_error: None,
            barrier: None,
            moved: AtomicUsize::new(0),
            sent_to: Mutex::new(Vec::new()),
        }
    }

    /// Fail the shards holding these context ids
    pub fn failing(mut self, context_ids: impl IntoIterator<Item = i64>) -> Self {
        self.failing.extend(context_ids);
        self
    }

    /// Fail every shard
    pub fn failing_all(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Append the context id to injected failure messages
    pub fn tagging_failures(mut self) -> Self {
        self.tag_failures = true;
        self
    }

    /// Make the next phase raise `message`
    pub fn next_phase_error(mut self, message: &str) -> Self {
        self.next_phase_error = Some(message.to_string());
        self
    }

    /// Hold every reply until all `parties` replies are ready
    pub fn with_barrier(mut self, parties: usize) -> Self {
        self.barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    /// How many times the next phase was built
    pub fn moved(&self) -> usize {
        self.moved.load(Ordering::SeqCst)
    }

    /// Nodes that received a first phase request
    pub fn sent_to(&self) -> Vec<NodeId> {
        self.sent_to.lock().clone()
    }

    fn reply(&self, context_id: i64, node: NodeId) -> Result<TestShardResult, ScrollError> {
        if self.fail_all || self.failing.contains(&context_id) {
            let message = if self.tag_failures {
                format!("{} [{}]", SHARD_FAILURE_MESSAGE, context_id)
            } else {
                SHARD_FAILURE_MESSAGE.to_string()
            };
            return Err(ScrollError::shard_execution(message));
        }
        Ok(TestShardResult { node, context_id })
    }
}

impl ScrollPhaseStrategy for TestStrategy {
    type ShardResult = TestShardResult;
    type Output = Vec<TestShardResult>;

    fn execute_initial_phase(
        &self,
        node: &DiscoveryNode,
        request: ShardScrollRequest,
        listener: ShardListener<TestShardResult>,
    ) {
        self.sent_to.lock().push(node.id().clone());
        let outcome = self.reply(request.context_id().raw(), node.id().clone());

        match &self.handle {
            Some(handle) => {
                let barrier = self.barrier.clone();
                handle.spawn(async move {
                    if let Some(barrier) = barrier {
                        barrier.wait().await;
                    }
                    listener.complete(outcome);
                });
            }
            None => listener.complete(outcome),
        }
    }

    fn move_to_next_phase(&self, results: Arc<ResultCollector<TestShardResult>>) -> Box<dyn SearchPhase<Self::Output>> {
        self.moved.fetch_add(1, Ordering::SeqCst);
        Box::new(CollectPhase {
            results,
            error: self.next_phase_error.clone(),
        })
    }
}

/// Next phase returning the shard results in ordinal order
struct CollectPhase {
    results: Arc<ResultCollector<TestShardResult>>,
    error: Option<String>,
}

impl SearchPhase<Vec<TestShardResult>> for CollectPhase {
    fn name(&self) -> &str {
        TEST_PHASE
    }

    fn run(self: Box<Self>, responder: PhaseResponder<Vec<TestShardResult>>) -> Result<(), BoxError> {
        let Self { results, error } = *self;
        if let Some(message) = error {
            return Err(message.into());
        }
        responder.respond(results.values().into_iter().cloned().collect());
        Ok(())
    }
}

/// Membership view with `node1`, `node2` and `node3`
#[allow(dead_code)]
pub fn three_node_directory() -> DiscoveryNodes {
    (1..=3)
        .map(|i| DiscoveryNode::new(format!("node{}", i), format!("127.0.0.1:{}", 9300 + i)))
        .collect()
}

/// The three node membership view without `missing`
#[allow(dead_code)]
pub fn directory_without(missing: &str) -> DiscoveryNodes {
    three_node_directory().iter().filter(|node| node.id().as_str() != missing).cloned().collect()
}

/// Five shard contexts: two on node1, one on node2, two on node3
///
/// Context `17` sits at ordinal 3.
#[allow(dead_code)]
pub fn five_shard_context() -> Vec<ShardContextRef> {
    vec![
        ShardContextRef::new("node1", 1),
        ShardContextRef::new("node2", 2),
        ShardContextRef::new("node3", 3),
        ShardContextRef::new("node1", 17),
        ShardContextRef::new("node3", 0),
    ]
}

/// `count` shard contexts spread round-robin over the three nodes, context id = ordinal
#[allow(dead_code)]
pub fn spread_context(count: usize) -> Vec<ShardContextRef> {
    (0..count)
        .map(|ordinal| ShardContextRef::new(format!("node{}", ordinal % 3 + 1), ordinal as i64))
        .collect()
}

/// Encode a scroll id for `context`
#[allow(dead_code)]
pub fn scroll_id_for(context: Vec<ShardContextRef>) -> String {
    ScrollToken::new(QUERY_THEN_FETCH_TYPE, context)
        .expect("test contexts are never empty")
        .encode()
}
