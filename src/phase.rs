//! The phase that runs once every shard of the first phase has answered
//!
//! After shard collection the coordinator asks its strategy for a [`SearchPhase`] and
//! runs it with a [`PhaseResponder`]. The phase answers through the responder, either
//! before `run` returns or later from another task. An error returned from `run`, or a
//! call to [`PhaseResponder::fail`], reaches the request listener as
//! [`ScrollError::NextPhase`](crate::error::ScrollError::NextPhase) naming the phase.
//!
//! [`ReducePhase`] covers the common case of folding the ordinal-ordered shard results
//! into one output.

use crate::error::BoxError;
use crate::result_collector::ResultCollector;
use crate::shard_failures::ShardFailure;
use std::fmt;
use std::sync::Arc;

/// A phase executed after shard collection
pub trait SearchPhase<T>: Send {
    /// Name reported in logs and in phase failures
    fn name(&self) -> &str;

    /// Run the phase, answering through `responder`
    fn run(self: Box<Self>, responder: PhaseResponder<T>) -> Result<(), BoxError>;
}

/// Receiver of a phase's answer, implemented by the request execution
pub(crate) trait PhaseCompletion<T>: Send + Sync {
    fn respond(&self, phase: &str, output: T);

    fn fail(&self, phase: &str, cause: BoxError);

    /// The responder was dropped without answering
    fn abandon(&self, phase: &str);

    /// First phase failures, in ordinal order
    fn shard_failures(&self) -> &[ShardFailure];
}

/// One-shot handle a [`SearchPhase`] answers through
///
/// Dropping the responder without answering fails the request.
pub struct PhaseResponder<T> {
    phase: String,
    completion: Option<Arc<dyn PhaseCompletion<T>>>,
}

impl<T> PhaseResponder<T> {
    pub(crate) fn new(phase: impl Into<String>, completion: Arc<dyn PhaseCompletion<T>>) -> Self {
        Self {
            phase: phase.into(),
            completion: Some(completion),
        }
    }

    /// Name of the phase this responder answers for
    pub fn phase_name(&self) -> &str {
        &self.phase
    }

    /// Shards that failed during the first phase, in ordinal order
    pub fn shard_failures(&self) -> &[ShardFailure] {
        match &self.completion {
            Some(completion) => completion.shard_failures(),
            None => &[],
        }
    }

    /// Complete the request with `output`
    pub fn respond(mut self, output: T) {
        if let Some(completion) = self.completion.take() {
            completion.respond(&self.phase, output);
        }
    }

    /// Fail the request with `cause`
    pub fn fail(mut self, cause: impl Into<BoxError>) {
        if let Some(completion) = self.completion.take() {
            completion.fail(&self.phase, cause.into());
        }
    }
}

impl<T> Drop for PhaseResponder<T> {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion.abandon(&self.phase);
        }
    }
}

impl<T> fmt::Debug for PhaseResponder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseResponder")
            .field("phase", &self.phase)
            .field("answered", &self.completion.is_none())
            .finish()
    }
}

type Reducer<R, T> = Box<dyn FnOnce(&ResultCollector<R>) -> Result<T, BoxError> + Send>;

/// Next phase that folds the collected shard results into one output
///
/// The reducer sees every slot in ordinal order; slots of failed shards are empty.
pub struct ReducePhase<R, T> {
    name: String,
    results: Arc<ResultCollector<R>>,
    reducer: Reducer<R, T>,
}

impl<R, T> ReducePhase<R, T> {
    pub fn new<F>(name: impl Into<String>, results: Arc<ResultCollector<R>>, reducer: F) -> Self
    where
        F: FnOnce(&ResultCollector<R>) -> Result<T, BoxError> + Send + 'static,
    {
        Self {
            name: name.into(),
            results,
            reducer: Box::new(reducer),
        }
    }
}

impl<R, T> SearchPhase<T> for ReducePhase<R, T>
where
    R: Send + Sync,
    T: Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Box<Self>, responder: PhaseResponder<T>) -> Result<(), BoxError> {
        let Self { results, reducer, .. } = *self;
        let output = reducer(&results)?;
        responder.respond(output);
        Ok(())
    }
}

impl<R, T> fmt::Debug for ReducePhase<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducePhase")
            .field("name", &self.name)
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}
