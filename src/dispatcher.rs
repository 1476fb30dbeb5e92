//! Scatter phase requests to shard contexts and count their completions
//!
//! [`PhaseDispatcher::dispatch`] resolves the node of every shard context, sends one
//! phase request per resolvable context, and hands each request a [`ShardListener`].
//! All coordination flows through [`DispatchCallbacks`]:
//!
//! - `on_shard_success` / `on_shard_failure` fire once per ordinal, on whatever thread
//!   delivers the shard's reply
//! - `on_all_complete` fires exactly once, after the last ordinal completed, on the
//!   thread that performed the final decrement
//!
//! A shared atomic countdown starts at the number of shard contexts. Every ordinal
//! decrements it exactly once, whether it succeeded, failed in transport, or never got
//! sent because its node could not be resolved. The thread whose `fetch_sub` observes
//! the value `1` owns the completion, so racing completions can never both run it.
//!
//! The dispatcher never blocks. Sending is fire-and-forget: the transport answers
//! through the listener, possibly before `dispatch` returns.

use crate::error::ScrollError;
use crate::identifiers::{ContextId, NodeId};
use crate::node_resolver::{DiscoveryNode, NodeResolver};
use crate::scroll_id::ShardContextRef;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Phase request sent to the node holding one shard context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardScrollRequest {
    context_id: ContextId,
    keep_alive: Option<Duration>,
}

impl ShardScrollRequest {
    pub fn new(context_id: ContextId, keep_alive: Option<Duration>) -> Self {
        Self { context_id, keep_alive }
    }

    /// Search context the request continues
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// How long the shard should keep its context open after this request
    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive
    }
}

/// Receives the outcome of every dispatched ordinal
pub trait DispatchCallbacks<R>: Send + Sync {
    /// The shard at `ordinal` produced a result
    fn on_shard_success(&self, ordinal: usize, result: R);

    /// The shard at `ordinal` could not be resolved, sent, or completed
    fn on_shard_failure(&self, ordinal: usize, node: Option<&NodeId>, cause: ScrollError);

    /// Every ordinal has completed; called exactly once per dispatch
    fn on_all_complete(&self);
}

/// Counts down outstanding ordinals of one dispatch
struct DispatchState<R> {
    remaining: AtomicUsize,
    callbacks: Arc<dyn DispatchCallbacks<R>>,
}

impl<R> DispatchState<R> {
    fn complete_one(&self) {
        // AcqRel makes every slot written before an earlier decrement visible to the
        // thread that takes the count to zero.
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.callbacks.on_all_complete();
        }
    }
}

/// One-shot reply handle for a single shard request
///
/// Both completion methods consume the listener, so an ordinal can complete at most
/// once. A listener dropped without an answer completes its ordinal as a
/// [`ScrollError::ShardExecution`] failure.
pub struct ShardListener<R> {
    state: Option<Arc<DispatchState<R>>>,
    ordinal: usize,
    node: NodeId,
    context_id: ContextId,
}

impl<R> ShardListener<R> {
    /// Ordinal of the shard this listener answers for
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Node the request was sent to
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Deliver the shard's result
    pub fn on_response(mut self, result: R) {
        if let Some(state) = self.state.take() {
            state.callbacks.on_shard_success(self.ordinal, result);
            state.complete_one();
        }
    }

    /// Deliver the shard's failure
    pub fn on_failure(mut self, cause: ScrollError) {
        if let Some(state) = self.state.take() {
            state.callbacks.on_shard_failure(self.ordinal, Some(&self.node), cause);
            state.complete_one();
        }
    }

    /// Deliver either outcome
    pub fn complete(self, outcome: Result<R, ScrollError>) {
        match outcome {
            Ok(result) => self.on_response(result),
            Err(cause) => self.on_failure(cause),
        }
    }
}

impl<R> Drop for ShardListener<R> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            let cause = ScrollError::shard_execution(format!(
                "shard request for context [{}] on node [{}] was dropped without a response",
                self.context_id, self.node
            ));
            state.callbacks.on_shard_failure(self.ordinal, Some(&self.node), cause);
            state.complete_one();
        }
    }
}

impl<R> fmt::Debug for ShardListener<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardListener")
            .field("ordinal", &self.ordinal)
            .field("node", &self.node)
            .field("context_id", &self.context_id)
            .field("completed", &self.state.is_none())
            .finish()
    }
}

/// What happened while scattering one phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Requests handed to the transport
    pub sent: usize,
    /// Ordinals failed immediately because their node could not be resolved
    pub unresolved: usize,
}

/// Sends one phase request per shard context
#[derive(Debug, Clone)]
pub struct PhaseDispatcher {
    resolver: NodeResolver,
    keep_alive: Option<Duration>,
}

impl PhaseDispatcher {
    pub fn new(resolver: NodeResolver) -> Self {
        Self {
            resolver,
            keep_alive: None,
        }
    }

    /// Keep-alive attached to every shard request
    pub fn with_keep_alive(mut self, keep_alive: Option<Duration>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Scatter one phase over `context`
    ///
    /// `send` is invoked once per resolvable shard context with the resolved node, the
    /// request, and the listener the transport must answer. Ordinal `i` is the index of
    /// the context in `context`. With an empty `context`, `on_all_complete` fires before
    /// this returns.
    pub fn dispatch<R, F>(
        &self,
        context: &[ShardContextRef],
        send: F,
        callbacks: Arc<dyn DispatchCallbacks<R>>,
    ) -> DispatchStats
    where
        R: 'static,
        F: Fn(&DiscoveryNode, ShardScrollRequest, ShardListener<R>),
    {
        let mut stats = DispatchStats::default();

        if context.is_empty() {
            callbacks.on_all_complete();
            return stats;
        }

        // The count covers every ordinal before the first request goes out, so no early
        // reply can bring it to zero while we are still dispatching.
        let state = Arc::new(DispatchState {
            remaining: AtomicUsize::new(context.len()),
            callbacks,
        });

        for (ordinal, shard) in context.iter().enumerate() {
            match self.resolver.resolve(shard.node()) {
                Ok(node) => {
                    let listener = ShardListener {
                        state: Some(Arc::clone(&state)),
                        ordinal,
                        node: shard.node().clone(),
                        context_id: shard.context_id(),
                    };
                    let request = ShardScrollRequest::new(shard.context_id(), self.keep_alive);
                    stats.sent += 1;
                    send(&node, request, listener);
                }
                Err(cause) => {
                    debug!(
                        "Skipping shard {} with context [{}]: {}",
                        ordinal,
                        shard.context_id(),
                        cause
                    );
                    stats.unresolved += 1;
                    state.callbacks.on_shard_failure(ordinal, Some(shard.node()), cause);
                    state.complete_one();
                }
            }
        }

        stats
    }
}
