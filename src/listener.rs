//! Request listeners and the assembled scroll response
//!
//! A [`ScrollListener`] is notified exactly once per request: with a
//! [`ScrollResponse`] when the request produced output, or with a [`ScrollError`]
//! when it did not. Listeners consume themselves on notification.
//!
//! Two ready-made listeners cover the usual cases:
//!
//! - a `tokio::sync::oneshot::Sender`, for callers that want to `.await` the outcome
//! - [`listener_fn`], which wraps a closure

use crate::error::ScrollError;
use crate::identifiers::RequestId;
use crate::shard_failures::ShardFailure;
use std::time::Duration;
use tokio::sync::oneshot;

/// Outcome delivered to a scroll listener
pub type ScrollResult<T> = std::result::Result<ScrollResponse<T>, ScrollError>;

/// Receives the final outcome of one scroll request
pub trait ScrollListener<T>: Send {
    /// The request completed and produced `response`
    fn on_response(self: Box<Self>, response: ScrollResponse<T>);

    /// The request failed as a whole
    fn on_failure(self: Box<Self>, error: ScrollError);
}

/// Successful outcome of a scroll request
///
/// Partial success is a normal outcome: shards that failed during the first phase are
/// listed in [`ScrollResponse::shard_failures`] in ordinal order.
#[derive(Debug)]
pub struct ScrollResponse<T> {
    pub(crate) output: T,
    pub(crate) scroll_id: Option<String>,
    pub(crate) total_shards: usize,
    pub(crate) shard_failures: Vec<ShardFailure>,
    pub(crate) took: Duration,
    pub(crate) request_id: RequestId,
}

impl<T> ScrollResponse<T> {
    /// Output produced by the phase that ran after shard collection
    pub fn output(&self) -> &T {
        &self.output
    }

    pub fn into_output(self) -> T {
        self.output
    }

    /// Scroll id to hand back to the client, byte-for-byte the one it sent
    pub fn scroll_id(&self) -> Option<&str> {
        self.scroll_id.as_deref()
    }

    /// Number of shards the request addressed
    pub fn total_shards(&self) -> usize {
        self.total_shards
    }

    /// Number of shards that answered the first phase successfully
    pub fn successful_shards(&self) -> usize {
        self.total_shards - self.shard_failures.len()
    }

    pub fn failed_shards(&self) -> usize {
        self.shard_failures.len()
    }

    /// Failures of the first phase, in ordinal order
    pub fn shard_failures(&self) -> &[ShardFailure] {
        &self.shard_failures
    }

    /// Check whether some shards failed
    pub fn is_partial(&self) -> bool {
        !self.shard_failures.is_empty()
    }

    /// Wall-clock time from request start to response
    pub fn took(&self) -> Duration {
        self.took
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

impl<T: Send> ScrollListener<T> for oneshot::Sender<ScrollResult<T>> {
    fn on_response(self: Box<Self>, response: ScrollResponse<T>) {
        // The receiver may have given up waiting; nothing left to notify then.
        let _ = (*self).send(Ok(response));
    }

    fn on_failure(self: Box<Self>, error: ScrollError) {
        let _ = (*self).send(Err(error));
    }
}

/// Listener backed by a closure
pub struct FnListener<F> {
    callback: F,
}

/// Wrap a closure receiving the request outcome as a listener
pub fn listener_fn<T, F>(callback: F) -> Box<dyn ScrollListener<T>>
where
    T: 'static,
    F: FnOnce(ScrollResult<T>) + Send + 'static,
{
    Box::new(FnListener { callback })
}

impl<T, F> ScrollListener<T> for FnListener<F>
where
    F: FnOnce(ScrollResult<T>) + Send,
{
    fn on_response(self: Box<Self>, response: ScrollResponse<T>) {
        (self.callback)(Ok(response))
    }

    fn on_failure(self: Box<Self>, error: ScrollError) {
        (self.callback)(Err(error))
    }
}

/// Create a listener together with the receiver its outcome is delivered to
pub fn listener_channel<T: Send + 'static>() -> (Box<dyn ScrollListener<T>>, oneshot::Receiver<ScrollResult<T>>) {
    let (tx, rx) = oneshot::channel();
    (Box::new(tx), rx)
}
