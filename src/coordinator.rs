//! Scroll request coordination
//!
//! [`ScrollCoordinator`] drives one scroll request through its lifecycle:
//!
//! ```text
//! Init -> Dispatched -> Collecting -> Advancing | AllFailed -> Terminal
//! ```
//!
//! The request's scroll id is decoded into shard contexts, the first phase is scattered
//! to every context through the [`PhaseDispatcher`], and the thread delivering the last
//! shard reply makes the single advance-or-fail decision:
//!
//! - when every shard failed, the listener receives [`ScrollError::AllShardsFailed`]
//!   naming the first phase and wrapping the failure at the lowest ordinal
//! - otherwise the strategy's next phase runs against the collected results, and its
//!   answer (or [`ScrollError::NextPhase`]) goes to the listener together with the
//!   partial failures of the first phase
//!
//! What each phase does is supplied by a [`ScrollPhaseStrategy`]; the coordinator only
//! sequences, collects and reports. The listener of a request is notified exactly once.

use crate::config::ScrollConfig;
use crate::dispatcher::{DispatchCallbacks, PhaseDispatcher, ShardListener, ShardScrollRequest};
use crate::error::{BoxError, ScrollError};
use crate::identifiers::{NodeId, RequestId};
use crate::listener::{listener_channel, ScrollListener, ScrollResponse, ScrollResult};
use crate::monitoring::{ScrollMetrics, ScrollMetricsSnapshot};
use crate::node_resolver::{DiscoveryNode, NodeDirectory, NodeResolver};
use crate::phase::{PhaseCompletion, PhaseResponder, SearchPhase};
use crate::result_collector::ResultCollector;
use crate::scroll_id::{ScrollToken, ShardContextRef};
use crate::shard_failures::{ShardFailure, ShardFailureCollector};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Lifecycle state of one scroll request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PhaseState {
    /// Scroll id decoded, collectors sized
    Init = 0,
    /// First phase requests are being sent
    Dispatched = 1,
    /// Waiting for the remaining shard replies
    Collecting = 2,
    /// Running the next phase
    Advancing = 3,
    /// Every shard failed, listener is being told
    AllFailed = 4,
    /// Listener notified
    Terminal = 5,
}

impl PhaseState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Init,
            1 => Self::Dispatched,
            2 => Self::Collecting,
            3 => Self::Advancing,
            4 => Self::AllFailed,
            _ => Self::Terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Terminal
    }
}

/// Decision taken once every shard of the first phase has completed
#[derive(Debug, Clone)]
pub enum PhaseOutcome {
    /// At least one shard succeeded and the named phase ran
    Advance { next_phase: String },
    /// Every shard failed; the failure at the lowest ordinal is the cause
    AllShardsFailed { first_failure: ShardFailure },
}

/// Supplies the behavior of the phases a coordinator sequences
///
/// The first phase is sent once per shard context through
/// [`execute_initial_phase`](ScrollPhaseStrategy::execute_initial_phase), which must
/// eventually answer the given listener (directly or from another task). Once all
/// shards have answered and at least one succeeded,
/// [`move_to_next_phase`](ScrollPhaseStrategy::move_to_next_phase) is called exactly
/// once per request.
pub trait ScrollPhaseStrategy: Send + Sync + 'static {
    /// Result produced by one shard in the first phase
    type ShardResult: Send + Sync + 'static;
    /// Output of the next phase, delivered to the request listener
    type Output: Send + 'static;

    /// Name of the first phase, reported when every shard fails
    fn initial_phase_name(&self) -> &str {
        "query"
    }

    /// Send the first phase request for one shard context
    fn execute_initial_phase(
        &self,
        node: &DiscoveryNode,
        request: ShardScrollRequest,
        listener: ShardListener<Self::ShardResult>,
    );

    /// Build the phase that runs over the collected shard results
    fn move_to_next_phase(&self, results: Arc<ResultCollector<Self::ShardResult>>) -> Box<dyn SearchPhase<Self::Output>>;
}

#[derive(Debug, Clone)]
enum RequestSource {
    Token(String),
    Contexts {
        session_tag: String,
        context: Vec<ShardContextRef>,
    },
}

/// An inbound scroll request
#[derive(Debug, Clone)]
pub struct ScrollRequest {
    source: RequestSource,
    keep_alive: Option<Duration>,
}

impl ScrollRequest {
    /// Continue the scroll identified by `scroll_id`
    pub fn scroll(scroll_id: impl Into<String>) -> Self {
        Self {
            source: RequestSource::Token(scroll_id.into()),
            keep_alive: None,
        }
    }

    /// Start a request over directly supplied shard contexts
    ///
    /// An empty `context` is rejected when the request is started.
    pub fn from_contexts(session_tag: impl Into<String>, context: Vec<ShardContextRef>) -> Self {
        Self {
            source: RequestSource::Contexts {
                session_tag: session_tag.into(),
                context,
            },
            keep_alive: None,
        }
    }

    /// Keep the shard contexts open for `keep_alive` after this request
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Scroll id the request continues, if it came from one
    pub fn scroll_id(&self) -> Option<&str> {
        match &self.source {
            RequestSource::Token(token) => Some(token),
            RequestSource::Contexts { .. } => None,
        }
    }

    pub fn requested_keep_alive(&self) -> Option<Duration> {
        self.keep_alive
    }

    fn into_token(self) -> Result<(ScrollToken, Option<String>), ScrollError> {
        match self.source {
            RequestSource::Token(token) => Ok((ScrollToken::decode(&token)?, Some(token))),
            RequestSource::Contexts { session_tag, context } => Ok((ScrollToken::new(session_tag, context)?, None)),
        }
    }
}

struct PreparedRequest {
    session_tag: String,
    context: Vec<ShardContextRef>,
    scroll_id: Option<String>,
    keep_alive: Option<Duration>,
}

/// Coordinates scroll requests for one phase strategy
pub struct ScrollCoordinator<S: ScrollPhaseStrategy> {
    strategy: Arc<S>,
    resolver: NodeResolver,
    config: ScrollConfig,
    metrics: Arc<ScrollMetrics>,
}

impl<S: ScrollPhaseStrategy> ScrollCoordinator<S> {
    /// Create a coordinator resolving nodes against `directory`
    ///
    /// # Errors
    /// Returns `Config` if `config` does not validate.
    pub fn new(strategy: S, directory: Arc<dyn NodeDirectory>, config: ScrollConfig) -> Result<Self, ScrollError> {
        config.validate()?;
        Ok(Self {
            strategy: Arc::new(strategy),
            resolver: NodeResolver::new(directory),
            config,
            metrics: Arc::new(ScrollMetrics::new()),
        })
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn config(&self) -> &ScrollConfig {
        &self.config
    }

    /// Counters across every request started by this coordinator
    pub fn metrics(&self) -> ScrollMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Start a scroll request
    ///
    /// Never blocks: the first phase is handed to the strategy and the outcome reaches
    /// `listener` from whichever thread completes the request. A scroll id that cannot
    /// be decoded, or a request that fails validation, notifies `listener` before this
    /// returns and nothing is dispatched.
    pub fn start_request(
        &self,
        request: ScrollRequest,
        listener: Box<dyn ScrollListener<S::Output>>,
    ) -> Arc<ScrollExecution<S>> {
        let request_id = RequestId::new();
        let started = Instant::now();
        self.metrics.record_request_started();

        let prepared = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(error) => {
                debug!("[{}] Rejecting scroll request: {}", request_id, error);
                self.metrics.record_failure(&error, started.elapsed());
                listener.on_failure(error);
                return Arc::new(ScrollExecution::rejected(
                    request_id,
                    Arc::clone(&self.strategy),
                    Arc::clone(&self.metrics),
                    started,
                ));
            }
        };

        let keep_alive = prepared.keep_alive;
        let execution = Arc::new(ScrollExecution::new(
            request_id,
            Arc::clone(&self.strategy),
            Arc::clone(&self.metrics),
            prepared,
            listener,
            self.config.enable_detailed_logging,
            started,
        ));

        debug!(
            "[{}] Starting {} request over {} shard contexts",
            request_id,
            execution.session_tag,
            execution.total_shards()
        );

        execution.transition(&[PhaseState::Init], PhaseState::Dispatched);
        let strategy = Arc::clone(&self.strategy);
        let callbacks: Arc<dyn DispatchCallbacks<S::ShardResult>> = Arc::new(ExecutionCallbacks(Arc::clone(&execution)));
        let stats = PhaseDispatcher::new(self.resolver.clone())
            .with_keep_alive(keep_alive)
            .dispatch(
                &execution.context,
                |node, request, listener| strategy.execute_initial_phase(node, request, listener),
                callbacks,
            );
        // Replies may already have completed the request; then this is a no-op.
        execution.transition(&[PhaseState::Dispatched], PhaseState::Collecting);

        debug!(
            "[{}] Dispatched {} phase: {} sent, {} unresolved",
            request_id,
            self.strategy.initial_phase_name(),
            stats.sent,
            stats.unresolved
        );

        execution
    }

    /// Run a scroll request to completion
    pub async fn execute(&self, request: ScrollRequest) -> ScrollResult<S::Output> {
        let (listener, receiver) = listener_channel();
        self.start_request(request, listener);
        receiver
            .await
            .unwrap_or_else(|_| Err(ScrollError::shard_execution("scroll request ended without notifying its listener")))
    }

    fn prepare(&self, request: ScrollRequest) -> Result<PreparedRequest, ScrollError> {
        let requested_keep_alive = request.keep_alive;
        let (token, scroll_id) = request.into_token()?;

        if let Some(keep_alive) = requested_keep_alive {
            self.config.check_keep_alive(keep_alive)?;
        }
        self.config.check_shard_count(token.len())?;

        let keep_alive = requested_keep_alive.or_else(|| self.config.default_keep_alive());
        let (session_tag, context) = token.into_parts();

        Ok(PreparedRequest {
            session_tag,
            context,
            // Only a scroll continuation hands its id back.
            scroll_id: scroll_id.filter(|_| keep_alive.is_some()),
            keep_alive,
        })
    }
}

impl<S: ScrollPhaseStrategy> fmt::Debug for ScrollCoordinator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrollCoordinator")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

struct ListenerSlot<T> {
    listener: Option<Box<dyn ScrollListener<T>>>,
    /// Set while the next phase's `run` is on the stack
    phase_running: bool,
    /// The responder was dropped unanswered while `run` was on the stack
    abandoned: bool,
}

/// State of one scroll request
///
/// Returned by [`ScrollCoordinator::start_request`] so callers can observe the
/// request after its listener has been notified.
pub struct ScrollExecution<S: ScrollPhaseStrategy> {
    request_id: RequestId,
    strategy: Arc<S>,
    session_tag: String,
    context: Vec<ShardContextRef>,
    scroll_id: Option<String>,
    state: AtomicU8,
    results: Arc<ResultCollector<S::ShardResult>>,
    failures: ShardFailureCollector,
    report: OnceLock<Vec<ShardFailure>>,
    outcome: OnceLock<PhaseOutcome>,
    listener: Mutex<ListenerSlot<S::Output>>,
    completions: AtomicUsize,
    metrics: Arc<ScrollMetrics>,
    detailed_logging: bool,
    started: Instant,
}

impl<S: ScrollPhaseStrategy> ScrollExecution<S> {
    fn new(
        request_id: RequestId,
        strategy: Arc<S>,
        metrics: Arc<ScrollMetrics>,
        prepared: PreparedRequest,
        listener: Box<dyn ScrollListener<S::Output>>,
        detailed_logging: bool,
        started: Instant,
    ) -> Self {
        let size = prepared.context.len();
        Self {
            request_id,
            strategy,
            session_tag: prepared.session_tag,
            context: prepared.context,
            scroll_id: prepared.scroll_id,
            state: AtomicU8::new(PhaseState::Init as u8),
            results: Arc::new(ResultCollector::new(size)),
            failures: ShardFailureCollector::new(size),
            report: OnceLock::new(),
            outcome: OnceLock::new(),
            listener: Mutex::new(ListenerSlot {
                listener: Some(listener),
                phase_running: false,
                abandoned: false,
            }),
            completions: AtomicUsize::new(0),
            metrics,
            detailed_logging,
            started,
        }
    }

    /// Execution for a request rejected before dispatch
    fn rejected(request_id: RequestId, strategy: Arc<S>, metrics: Arc<ScrollMetrics>, started: Instant) -> Self {
        Self {
            request_id,
            strategy,
            session_tag: String::new(),
            context: Vec::new(),
            scroll_id: None,
            state: AtomicU8::new(PhaseState::Terminal as u8),
            results: Arc::new(ResultCollector::new(0)),
            failures: ShardFailureCollector::new(0),
            report: OnceLock::new(),
            outcome: OnceLock::new(),
            listener: Mutex::new(ListenerSlot {
                listener: None,
                phase_running: false,
                abandoned: false,
            }),
            completions: AtomicUsize::new(0),
            metrics,
            detailed_logging: false,
            started,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> PhaseState {
        PhaseState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Advance-or-fail decision, once all shards have completed
    pub fn outcome(&self) -> Option<&PhaseOutcome> {
        self.outcome.get()
    }

    pub fn session_tag(&self) -> &str {
        &self.session_tag
    }

    /// Shard contexts addressed by the request, in ordinal order
    pub fn context(&self) -> &[ShardContextRef] {
        &self.context
    }

    pub fn total_shards(&self) -> usize {
        self.context.len()
    }

    /// First phase results, one slot per ordinal
    pub fn results(&self) -> &Arc<ResultCollector<S::ShardResult>> {
        &self.results
    }

    /// Shard failures recorded so far, in ordinal order
    pub fn build_shard_failures(&self) -> Vec<ShardFailure> {
        self.failures.build_report()
    }

    /// How many times the all-complete decision ran; 1 once all shards answered
    pub fn completion_count(&self) -> usize {
        self.completions.load(Ordering::Acquire)
    }

    /// Check whether the listener has been notified
    pub fn is_finished(&self) -> bool {
        self.listener.lock().listener.is_none()
    }

    fn transition(&self, from: &[PhaseState], to: PhaseState) -> bool {
        from.iter().any(|state| {
            self.state
                .compare_exchange(*state as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    fn complete(self: &Arc<Self>) {
        self.completions.fetch_add(1, Ordering::AcqRel);

        let all_failed = self.failures.all_failed();
        let next = if all_failed {
            PhaseState::AllFailed
        } else {
            PhaseState::Advancing
        };
        if !self.transition(&[PhaseState::Dispatched, PhaseState::Collecting], next) {
            error!(
                "[{}] Shard collection completed again in state {:?}",
                self.request_id,
                self.state()
            );
            return;
        }

        let report = self.report.get_or_init(|| self.failures.build_report());

        if all_failed {
            let phase = self.strategy.initial_phase_name();
            if let Some(first) = report.first() {
                let _ = self.outcome.set(PhaseOutcome::AllShardsFailed {
                    first_failure: first.clone(),
                });
            }
            warn!(
                "[{}] All {} shards failed during {} phase",
                self.request_id,
                report.len(),
                phase
            );
            self.notify_failure(ScrollError::all_shards_failed(phase, report.clone()));
        } else {
            self.run_next_phase(report.len());
        }
    }

    fn run_next_phase(self: &Arc<Self>, failed: usize) {
        let phase = self.strategy.move_to_next_phase(Arc::clone(&self.results));
        let name = phase.name().to_string();
        let _ = self.outcome.set(PhaseOutcome::Advance {
            next_phase: name.clone(),
        });

        debug!(
            "[{}] Moving to {} phase, {} of {} shards succeeded",
            self.request_id,
            name,
            self.total_shards() - failed,
            self.total_shards()
        );

        self.listener.lock().phase_running = true;
        let completion: Arc<dyn PhaseCompletion<S::Output>> = Arc::clone(self) as Arc<dyn PhaseCompletion<S::Output>>;
        let result = phase.run(PhaseResponder::new(name.clone(), completion));
        let abandoned = {
            let mut slot = self.listener.lock();
            slot.phase_running = false;
            slot.abandoned
        };

        match result {
            Err(cause) => {
                warn!("[{}] {} phase failed: {}", self.request_id, name, cause);
                self.notify_failure(ScrollError::next_phase(name, cause));
            }
            Ok(()) if abandoned => {
                self.notify_failure(ScrollError::next_phase(name, "phase finished without responding"));
            }
            Ok(()) => {}
        }
    }

    fn notify_failure(&self, error: ScrollError) {
        let listener = self.listener.lock().listener.take();
        match listener {
            Some(listener) => {
                self.metrics.record_failure(&error, self.started.elapsed());
                self.state.store(PhaseState::Terminal as u8, Ordering::Release);
                listener.on_failure(error);
            }
            None => debug!(
                "[{}] Listener already notified, dropping failure: {}",
                self.request_id, error
            ),
        }
    }

    fn notify_response(&self, output: S::Output) {
        let listener = self.listener.lock().listener.take();
        match listener {
            Some(listener) => {
                let shard_failures = self.report.get().cloned().unwrap_or_default();
                let took = self.started.elapsed();
                self.metrics.record_response(took, !shard_failures.is_empty());
                self.state.store(PhaseState::Terminal as u8, Ordering::Release);
                debug!("[{}] Scroll request completed in {:?}", self.request_id, took);
                listener.on_response(ScrollResponse {
                    output,
                    scroll_id: self.scroll_id.clone(),
                    total_shards: self.total_shards(),
                    shard_failures,
                    took,
                    request_id: self.request_id,
                });
            }
            None => warn!("[{}] Listener already notified, dropping response", self.request_id),
        }
    }
}

impl<S: ScrollPhaseStrategy> PhaseCompletion<S::Output> for ScrollExecution<S> {
    fn respond(&self, _phase: &str, output: S::Output) {
        self.notify_response(output);
    }

    fn fail(&self, phase: &str, cause: BoxError) {
        warn!("[{}] {} phase failed: {}", self.request_id, phase, cause);
        self.notify_failure(ScrollError::next_phase(phase, cause));
    }

    fn abandon(&self, phase: &str) {
        {
            let mut slot = self.listener.lock();
            if slot.phase_running {
                slot.abandoned = true;
                return;
            }
        }
        self.notify_failure(ScrollError::next_phase(phase, "phase finished without responding"));
    }

    fn shard_failures(&self) -> &[ShardFailure] {
        self.report.get().map(Vec::as_slice).unwrap_or(&[])
    }
}

impl<S: ScrollPhaseStrategy> fmt::Debug for ScrollExecution<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrollExecution")
            .field("request_id", &self.request_id)
            .field("state", &self.state())
            .field("total_shards", &self.total_shards())
            .field("failed_shards", &self.failures.len())
            .field("completions", &self.completion_count())
            .finish()
    }
}

/// Routes dispatcher callbacks into an execution
struct ExecutionCallbacks<S: ScrollPhaseStrategy>(Arc<ScrollExecution<S>>);

impl<S: ScrollPhaseStrategy> DispatchCallbacks<S::ShardResult> for ExecutionCallbacks<S> {
    fn on_shard_success(&self, ordinal: usize, result: S::ShardResult) {
        let execution = &self.0;
        if let Err(e) = execution.results.set_once(ordinal, result) {
            error!("[{}] Dropping result for shard {}: {}", execution.request_id, ordinal, e);
            if cfg!(debug_assertions) {
                panic!("result slot invariant violated: {}", e);
            }
            return;
        }

        execution.metrics.record_shard_success();
        if execution.detailed_logging {
            debug!(
                "[{}] Shard {} answered the {} phase",
                execution.request_id,
                ordinal,
                execution.strategy.initial_phase_name()
            );
        }
    }

    fn on_shard_failure(&self, ordinal: usize, node: Option<&NodeId>, cause: ScrollError) {
        let execution = &self.0;
        if let Some(shard) = execution.context.get(ordinal) {
            debug!(
                "[{}] Failed to execute {} phase: {}",
                shard.context_id(),
                execution.strategy.initial_phase_name(),
                cause
            );
        }
        execution.metrics.record_shard_failure(&cause);
        execution.failures.record(ordinal, node.cloned(), cause);
    }

    fn on_all_complete(&self) {
        self.0.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::listener_fn;
    use crate::node_resolver::DiscoveryNodes;
    use crate::phase::ReducePhase;
    use crate::scroll_id::QUERY_THEN_FETCH_TYPE;
    use crate::test_utils::{five_shard_context, three_node_directory};
    use std::sync::mpsc;

    #[derive(Clone, Copy)]
    enum NextPhase {
        Sum,
        Fail,
        Abandon,
        RespondThenFail,
        Park,
    }

    /// Answers every shard on the calling thread
    struct SyncStrategy {
        fail_contexts: Vec<i64>,
        next: NextPhase,
        sent: AtomicUsize,
        moved: AtomicUsize,
        parked: Arc<Mutex<Option<PhaseResponder<i64>>>>,
    }

    impl SyncStrategy {
        fn new(next: NextPhase) -> Self {
            Self {
                fail_contexts: Vec::new(),
                next,
                sent: AtomicUsize::new(0),
                moved: AtomicUsize::new(0),
                parked: Arc::new(Mutex::new(None)),
            }
        }

        fn failing(mut self, contexts: &[i64]) -> Self {
            self.fail_contexts = contexts.to_vec();
            self
        }
    }

    struct TestPhase {
        next: NextPhase,
        results: Arc<ResultCollector<i64>>,
        parked: Arc<Mutex<Option<PhaseResponder<i64>>>>,
    }

    impl SearchPhase<i64> for TestPhase {
        fn name(&self) -> &str {
            "TEST_PHASE"
        }

        fn run(self: Box<Self>, responder: PhaseResponder<i64>) -> Result<(), BoxError> {
            match self.next {
                NextPhase::Sum => {
                    responder.respond(self.results.values().into_iter().sum());
                    Ok(())
                }
                NextPhase::Fail => Err("BOOM".into()),
                NextPhase::Abandon => Ok(()),
                NextPhase::RespondThenFail => {
                    responder.respond(-1);
                    Err("too late".into())
                }
                NextPhase::Park => {
                    *self.parked.lock() = Some(responder);
                    Ok(())
                }
            }
        }
    }

    impl ScrollPhaseStrategy for SyncStrategy {
        type ShardResult = i64;
        type Output = i64;

        fn execute_initial_phase(&self, _node: &DiscoveryNode, request: ShardScrollRequest, listener: ShardListener<i64>) {
            self.sent.fetch_add(1, Ordering::SeqCst);
            let context_id = request.context_id().raw();
            if self.fail_contexts.contains(&context_id) {
                listener.on_failure(ScrollError::shard_execution("BOOM on shard"));
            } else {
                listener.on_response(context_id);
            }
        }

        fn move_to_next_phase(&self, results: Arc<ResultCollector<i64>>) -> Box<dyn SearchPhase<i64>> {
            self.moved.fetch_add(1, Ordering::SeqCst);
            Box::new(TestPhase {
                next: self.next,
                results,
                parked: Arc::clone(&self.parked),
            })
        }
    }

    fn coordinator(strategy: SyncStrategy, config: ScrollConfig) -> ScrollCoordinator<SyncStrategy> {
        ScrollCoordinator::new(strategy, Arc::new(three_node_directory()), config).unwrap()
    }

    fn channel_listener() -> (Box<dyn ScrollListener<i64>>, mpsc::Receiver<ScrollResult<i64>>) {
        let (tx, rx) = mpsc::channel();
        let listener = listener_fn(move |result: ScrollResult<i64>| {
            tx.send(result).unwrap();
        });
        (listener, rx)
    }

    fn token() -> String {
        ScrollToken::new(QUERY_THEN_FETCH_TYPE, five_shard_context()).unwrap().encode()
    }

    #[test]
    fn test_successful_request_sums_results() {
        let coordinator = coordinator(SyncStrategy::new(NextPhase::Sum), ScrollConfig::default());
        let (listener, rx) = channel_listener();

        let execution = coordinator.start_request(ScrollRequest::scroll(token()), listener);

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(*response.output(), 1 + 2 + 3 + 17);
        assert_eq!(response.total_shards(), 5);
        assert_eq!(response.successful_shards(), 5);
        assert!(!response.is_partial());
        assert_eq!(execution.state(), PhaseState::Terminal);
        assert_eq!(execution.completion_count(), 1);
        assert!(matches!(execution.outcome(), Some(PhaseOutcome::Advance { next_phase }) if next_phase == "TEST_PHASE"));
        assert!(execution.is_finished());
        assert_eq!(execution.session_tag(), QUERY_THEN_FETCH_TYPE);
        assert_eq!(coordinator.strategy().moved.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.metrics().requests_succeeded, 1);
        assert_eq!(coordinator.metrics().shard_successes, 5);
    }

    #[test]
    fn test_scroll_id_is_echoed_verbatim_with_keep_alive() {
        let coordinator = coordinator(SyncStrategy::new(NextPhase::Sum), ScrollConfig::default());
        let (listener, rx) = channel_listener();
        let scroll_id = token();

        coordinator.start_request(ScrollRequest::scroll(scroll_id.clone()), listener);

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.scroll_id(), Some(scroll_id.as_str()));
    }

    #[test]
    fn test_scroll_id_is_not_echoed_without_keep_alive() {
        let config = ScrollConfig::new().default_keep_alive_ms(None);
        let coordinator = coordinator(SyncStrategy::new(NextPhase::Sum), config);
        let (listener, rx) = channel_listener();

        coordinator.start_request(ScrollRequest::scroll(token()), listener);

        assert_eq!(rx.try_recv().unwrap().unwrap().scroll_id(), None);
    }

    #[test]
    fn test_fresh_request_has_no_scroll_id() {
        let coordinator = coordinator(SyncStrategy::new(NextPhase::Sum), ScrollConfig::default());
        let (listener, rx) = channel_listener();

        let request = ScrollRequest::from_contexts(QUERY_THEN_FETCH_TYPE, five_shard_context())
            .keep_alive(Duration::from_secs(30));
        assert!(request.scroll_id().is_none());
        coordinator.start_request(request, listener);

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.scroll_id(), None);
        assert_eq!(response.total_shards(), 5);
    }

    #[test]
    fn test_empty_fresh_request_is_rejected() {
        let coordinator = coordinator(SyncStrategy::new(NextPhase::Sum), ScrollConfig::default());
        let (listener, rx) = channel_listener();

        let execution = coordinator.start_request(ScrollRequest::from_contexts(QUERY_THEN_FETCH_TYPE, Vec::new()), listener);

        assert!(matches!(rx.try_recv().unwrap(), Err(ScrollError::InvalidInput { .. })));
        assert_eq!(execution.state(), PhaseState::Terminal);
        assert_eq!(coordinator.strategy().sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_keep_alive_above_maximum_is_rejected() {
        let config = ScrollConfig::new().max_keep_alive_ms(120_000);
        let coordinator = coordinator(SyncStrategy::new(NextPhase::Sum), config);
        let (listener, rx) = channel_listener();

        coordinator.start_request(ScrollRequest::scroll(token()).keep_alive(Duration::from_secs(600)), listener);

        let error = rx.try_recv().unwrap().unwrap_err();
        assert!(error.to_string().contains("is too large"));
        assert_eq!(coordinator.strategy().sent.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.metrics().invalid_requests, 1);
    }

    #[test]
    fn test_too_many_shard_contexts_is_rejected() {
        let config = ScrollConfig::new().max_shard_contexts(4);
        let coordinator = coordinator(SyncStrategy::new(NextPhase::Sum), config);
        let (listener, rx) = channel_listener();

        coordinator.start_request(ScrollRequest::scroll(token()), listener);

        assert!(matches!(rx.try_recv().unwrap(), Err(ScrollError::InvalidInput { .. })));
        assert_eq!(coordinator.strategy().sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_token_is_rejected_before_dispatch() {
        let coordinator = coordinator(SyncStrategy::new(NextPhase::Sum), ScrollConfig::default());
        let (listener, rx) = channel_listener();

        let execution = coordinator.start_request(ScrollRequest::scroll("not a scroll id!"), listener);

        assert!(matches!(rx.try_recv().unwrap(), Err(ScrollError::MalformedToken { .. })));
        assert_eq!(execution.total_shards(), 0);
        assert_eq!(execution.completion_count(), 0);
        assert_eq!(coordinator.strategy().sent.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.metrics().malformed_tokens, 1);
    }

    #[test]
    fn test_all_shards_failed_skips_next_phase() {
        let strategy = SyncStrategy::new(NextPhase::Sum).failing(&[1, 2, 3, 17, 0]);
        let coordinator = coordinator(strategy, ScrollConfig::default());
        let (listener, rx) = channel_listener();

        let execution = coordinator.start_request(ScrollRequest::scroll(token()), listener);

        let error = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(&error, ScrollError::AllShardsFailed { phase, .. } if phase == "query"));
        assert_eq!(error.shard_failures().len(), 5);
        assert!(matches!(
            execution.outcome(),
            Some(PhaseOutcome::AllShardsFailed { first_failure }) if first_failure.ordinal() == 0
        ));
        assert_eq!(coordinator.strategy().moved.load(Ordering::SeqCst), 0);
        assert_eq!(execution.results().filled_count(), 0);
    }

    #[test]
    fn test_next_phase_error_names_the_phase() {
        let coordinator = coordinator(SyncStrategy::new(NextPhase::Fail), ScrollConfig::default());
        let (listener, rx) = channel_listener();

        coordinator.start_request(ScrollRequest::scroll(token()), listener);

        let error = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(&error, ScrollError::NextPhase { phase, .. } if phase == "TEST_PHASE"));
        assert_eq!(std::error::Error::source(&error).map(|e| e.to_string()), Some("BOOM".to_string()));
        assert!(rx.try_recv().is_err());
        assert_eq!(coordinator.metrics().next_phase_failures, 1);
    }

    #[test]
    fn test_abandoned_next_phase_fails_the_request() {
        let coordinator = coordinator(SyncStrategy::new(NextPhase::Abandon), ScrollConfig::default());
        let (listener, rx) = channel_listener();

        let execution = coordinator.start_request(ScrollRequest::scroll(token()), listener);

        let error = rx.try_recv().unwrap().unwrap_err();
        assert_eq!(error.phase_name(), Some("TEST_PHASE"));
        assert!(rx.try_recv().is_err());
        assert_eq!(execution.state(), PhaseState::Terminal);
    }

    #[test]
    fn test_listener_is_notified_once_when_phase_errors_after_responding() {
        let coordinator = coordinator(SyncStrategy::new(NextPhase::RespondThenFail), ScrollConfig::default());
        let (listener, rx) = channel_listener();

        coordinator.start_request(ScrollRequest::scroll(token()), listener);

        assert_eq!(*rx.try_recv().unwrap().unwrap().output(), -1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_next_phase_may_respond_later() {
        let coordinator = coordinator(SyncStrategy::new(NextPhase::Park), ScrollConfig::default());
        let (listener, rx) = channel_listener();

        let execution = coordinator.start_request(ScrollRequest::scroll(token()), listener);
        assert!(rx.try_recv().is_err());
        assert_eq!(execution.state(), PhaseState::Advancing);

        let responder = coordinator.strategy().parked.lock().take().unwrap();
        assert!(responder.shard_failures().is_empty());
        responder.respond(99);

        assert_eq!(*rx.try_recv().unwrap().unwrap().output(), 99);
        assert_eq!(execution.state(), PhaseState::Terminal);
    }

    #[test]
    fn test_partial_failures_are_attached_to_response() {
        let strategy = SyncStrategy::new(NextPhase::Sum).failing(&[17]);
        let coordinator = coordinator(strategy, ScrollConfig::default());
        let (listener, rx) = channel_listener();

        let execution = coordinator.start_request(ScrollRequest::scroll(token()), listener);

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.successful_shards(), 4);
        assert_eq!(response.shard_failures().len(), 1);
        assert_eq!(response.shard_failures()[0].ordinal(), 3);
        assert_eq!(response.shard_failures()[0].reason(), "ShardExecutionError[BOOM on shard]");
        assert_eq!(execution.build_shard_failures().len(), 1);
        assert_eq!(coordinator.metrics().partial_responses, 1);
    }

    #[test]
    fn test_reduce_phase_strategy() {
        struct Reducing;

        impl ScrollPhaseStrategy for Reducing {
            type ShardResult = i64;
            type Output = Vec<i64>;

            fn initial_phase_name(&self) -> &str {
                "scan"
            }

            fn execute_initial_phase(&self, _node: &DiscoveryNode, request: ShardScrollRequest, listener: ShardListener<i64>) {
                listener.on_response(request.context_id().raw());
            }

            fn move_to_next_phase(&self, results: Arc<ResultCollector<i64>>) -> Box<dyn SearchPhase<Vec<i64>>> {
                Box::new(ReducePhase::<i64, Vec<i64>>::new("merge", results, |results: &ResultCollector<i64>| {
                    Ok(results.values().into_iter().copied().collect())
                }))
            }
        }

        let nodes: DiscoveryNodes = three_node_directory().iter().filter(|n| n.id().as_str() != "node2").cloned().collect();
        let coordinator = ScrollCoordinator::new(Reducing, Arc::new(nodes), ScrollConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel();

        coordinator.start_request(
            ScrollRequest::scroll(token()),
            listener_fn(move |result: ScrollResult<Vec<i64>>| tx.send(result).unwrap()),
        );

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.output(), &vec![1, 3, 17, 0]);
        assert_eq!(response.shard_failures()[0].node().map(NodeId::as_str), Some("node2"));
    }

    #[tokio::test]
    async fn test_execute_awaits_response() {
        let coordinator = coordinator(SyncStrategy::new(NextPhase::Sum), ScrollConfig::default());
        let response = coordinator.execute(ScrollRequest::scroll(token())).await.unwrap();
        assert_eq!(response.into_output(), 23);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = ScrollCoordinator::new(
            SyncStrategy::new(NextPhase::Sum),
            Arc::new(three_node_directory()),
            ScrollConfig::new().max_shard_contexts(0),
        );
        assert!(matches!(result, Err(ScrollError::Config(_))));
    }

    #[test]
    fn test_phase_state_round_trip() {
        for state in [
            PhaseState::Init,
            PhaseState::Dispatched,
            PhaseState::Collecting,
            PhaseState::Advancing,
            PhaseState::AllFailed,
            PhaseState::Terminal,
        ] {
            assert_eq!(PhaseState::from_u8(state as u8), state);
        }
        assert!(PhaseState::Terminal.is_terminal());
        assert!(!PhaseState::Collecting.is_terminal());
    }
}
