//! Shardscroll - scatter-gather coordination for distributed scroll requests
//!
//! Shardscroll continues a scroll across many shard contexts hosted on different cluster
//! nodes. A client-held scroll id is decoded into an ordered list of shard contexts, one
//! phase request is sent per context, the per-shard results are collected by ordinal,
//! and once every shard has answered the request either advances to its next phase or
//! fails as a whole. Shard failures short of total failure are reported alongside the
//! response rather than failing the request.
//!
//! The per-shard executor, the transport and cluster membership are external: they
//! plug in through [`ScrollPhaseStrategy`] and [`NodeDirectory`].
//!
//! ```rust
//! use shardscroll::{
//!     listener_fn, DiscoveryNode, DiscoveryNodes, ReducePhase, ResultCollector, ScrollConfig,
//!     ScrollCoordinator, ScrollPhaseStrategy, ScrollRequest, ScrollToken, SearchPhase,
//!     ShardContextRef, ShardListener, ShardScrollRequest,
//! };
//! use std::sync::Arc;
//!
//! struct CountHits;
//!
//! impl ScrollPhaseStrategy for CountHits {
//!     type ShardResult = u64;
//!     type Output = u64;
//!
//!     fn execute_initial_phase(&self, _node: &DiscoveryNode, _request: ShardScrollRequest, listener: ShardListener<u64>) {
//!         listener.on_response(10);
//!     }
//!
//!     fn move_to_next_phase(&self, results: Arc<ResultCollector<u64>>) -> Box<dyn SearchPhase<u64>> {
//!         Box::new(ReducePhase::<u64, u64>::new("fetch", results, |results: &ResultCollector<u64>| {
//!             Ok(results.values().into_iter().sum())
//!         }))
//!     }
//! }
//!
//! let nodes = DiscoveryNodes::new().add(DiscoveryNode::new("node1", "10.0.0.1:9300"));
//! let coordinator = ScrollCoordinator::new(CountHits, Arc::new(nodes), ScrollConfig::default())?;
//!
//! let scroll_id = ScrollToken::new("queryThenFetch", vec![ShardContextRef::new("node1", 7)])?.encode();
//! coordinator.start_request(
//!     ScrollRequest::scroll(scroll_id),
//!     listener_fn(|result: shardscroll::ScrollResult<u64>| {
//!         assert_eq!(result.map(|response| response.into_output()).ok(), Some(10));
//!     }),
//! );
//! # Ok::<(), shardscroll::ScrollError>(())
//! ```

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod identifiers;
pub mod listener;
pub mod monitoring;
pub mod node_resolver;
pub mod phase;
pub mod result_collector;
pub mod scroll_id;
pub mod shard_failures;

#[cfg(test)]
pub mod test_utils;

pub use config::ScrollConfig;
pub use coordinator::{
    PhaseOutcome, PhaseState, ScrollCoordinator, ScrollExecution, ScrollPhaseStrategy, ScrollRequest,
};
pub use dispatcher::{DispatchCallbacks, DispatchStats, PhaseDispatcher, ShardListener, ShardScrollRequest};
pub use error::{BoxError, ScrollError};
pub use identifiers::{ContextId, NodeId, RequestId};
pub use listener::{listener_channel, listener_fn, ScrollListener, ScrollResponse, ScrollResult};
pub use monitoring::{ScrollMetrics, ScrollMetricsSnapshot};
pub use node_resolver::{DiscoveryNode, DiscoveryNodes, NodeDirectory, NodeResolver};
pub use phase::{PhaseResponder, ReducePhase, SearchPhase};
pub use result_collector::ResultCollector;
pub use scroll_id::{
    encode_scroll_id, parse_scroll_id, ScrollToken, ShardContextRef, QUERY_AND_FETCH_TYPE, QUERY_THEN_FETCH_TYPE,
};
pub use shard_failures::{ShardFailure, ShardFailureCollector};

/// Type alias for Results using ScrollError
pub type Result<T> = std::result::Result<T, ScrollError>;
