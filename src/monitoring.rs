//! Monitoring and statistics collection
//!
//! [`ScrollMetrics`] keeps lock-free counters for every request and shard outcome a
//! coordinator observes. Counters are updated from shard callbacks on arbitrary threads
//! with relaxed atomics; [`ScrollMetrics::snapshot`] reads them into a serializable
//! [`ScrollMetricsSnapshot`].

use crate::error::ScrollError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Atomic counters for one coordinator
#[derive(Debug)]
pub struct ScrollMetrics {
    // Request counters
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    partial_responses: AtomicU64,

    // Request failure breakdown
    malformed_tokens: AtomicU64,
    invalid_requests: AtomicU64,
    all_shards_failed: AtomicU64,
    next_phase_failures: AtomicU64,

    // Shard counters
    shard_successes: AtomicU64,
    shard_failures: AtomicU64,
    nodes_unavailable: AtomicU64,

    // Timing, in microseconds
    total_took_us: AtomicU64,
    max_took_us: AtomicU64,

    start_time: Instant,
}

impl Default for ScrollMetrics {
    fn default() -> Self {
        Self {
            requests_started: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            partial_responses: AtomicU64::new(0),
            malformed_tokens: AtomicU64::new(0),
            invalid_requests: AtomicU64::new(0),
            all_shards_failed: AtomicU64::new(0),
            next_phase_failures: AtomicU64::new(0),
            shard_successes: AtomicU64::new(0),
            shard_failures: AtomicU64::new(0),
            nodes_unavailable: AtomicU64::new(0),
            total_took_us: AtomicU64::new(0),
            max_took_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl ScrollMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request_started(&self) {
        self.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request answered with a response
    pub fn record_response(&self, took: Duration, partial: bool) {
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        if partial {
            self.partial_responses.fetch_add(1, Ordering::Relaxed);
        }
        self.record_took(took);
    }

    /// Record a request answered with `error`
    pub fn record_failure(&self, error: &ScrollError, took: Duration) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        let counter = match error {
            ScrollError::MalformedToken { .. } => Some(&self.malformed_tokens),
            ScrollError::InvalidInput { .. } => Some(&self.invalid_requests),
            ScrollError::AllShardsFailed { .. } => Some(&self.all_shards_failed),
            ScrollError::NextPhase { .. } => Some(&self.next_phase_failures),
            _ => None,
        };
        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        self.record_took(took);
    }

    pub fn record_shard_success(&self) {
        self.shard_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the failure of one shard
    pub fn record_shard_failure(&self, cause: &ScrollError) {
        self.shard_failures.fetch_add(1, Ordering::Relaxed);
        if matches!(cause, ScrollError::NodeUnavailable { .. }) {
            self.nodes_unavailable.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_took(&self, took: Duration) {
        let micros = u64::try_from(took.as_micros()).unwrap_or(u64::MAX);
        self.total_took_us.fetch_add(micros, Ordering::Relaxed);
        self.max_took_us.fetch_max(micros, Ordering::Relaxed);
    }

    /// Requests that have been started but not yet answered
    pub fn in_flight(&self) -> u64 {
        let answered = self.requests_succeeded.load(Ordering::Relaxed) + self.requests_failed.load(Ordering::Relaxed);
        self.requests_started.load(Ordering::Relaxed).saturating_sub(answered)
    }

    /// Read all counters
    pub fn snapshot(&self) -> ScrollMetricsSnapshot {
        let requests_succeeded = self.requests_succeeded.load(Ordering::Relaxed);
        let requests_failed = self.requests_failed.load(Ordering::Relaxed);
        let answered = requests_succeeded + requests_failed;
        let total_took_us = self.total_took_us.load(Ordering::Relaxed);

        ScrollMetricsSnapshot {
            requests_started: self.requests_started.load(Ordering::Relaxed),
            requests_succeeded,
            requests_failed,
            partial_responses: self.partial_responses.load(Ordering::Relaxed),
            malformed_tokens: self.malformed_tokens.load(Ordering::Relaxed),
            invalid_requests: self.invalid_requests.load(Ordering::Relaxed),
            all_shards_failed: self.all_shards_failed.load(Ordering::Relaxed),
            next_phase_failures: self.next_phase_failures.load(Ordering::Relaxed),
            shard_successes: self.shard_successes.load(Ordering::Relaxed),
            shard_failures: self.shard_failures.load(Ordering::Relaxed),
            nodes_unavailable: self.nodes_unavailable.load(Ordering::Relaxed),
            average_took_ms: if answered == 0 {
                0.0
            } else {
                total_took_us as f64 / answered as f64 / 1000.0
            },
            max_took_ms: self.max_took_us.load(Ordering::Relaxed) as f64 / 1000.0,
            uptime: self.start_time.elapsed(),
        }
    }
}

/// Point-in-time copy of [`ScrollMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    /// Successful responses that carried shard failures
    pub partial_responses: u64,
    pub malformed_tokens: u64,
    pub invalid_requests: u64,
    pub all_shards_failed: u64,
    pub next_phase_failures: u64,
    pub shard_successes: u64,
    pub shard_failures: u64,
    /// Shard failures caused by a node missing from the membership view
    pub nodes_unavailable: u64,
    pub average_took_ms: f64,
    pub max_took_ms: f64,
    pub uptime: Duration,
}

impl ScrollMetricsSnapshot {
    /// Fraction of answered requests that produced a response
    pub fn success_rate(&self) -> f64 {
        let answered = self.requests_succeeded + self.requests_failed;
        if answered == 0 {
            return 0.0;
        }
        self.requests_succeeded as f64 / answered as f64
    }

    /// Fraction of shard requests that failed
    pub fn shard_failure_rate(&self) -> f64 {
        let total = self.shard_successes + self.shard_failures;
        if total == 0 {
            return 0.0;
        }
        self.shard_failures as f64 / total as f64
    }
}
