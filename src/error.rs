//! Error types for scroll coordination
//!
//! This module defines the error taxonomy used throughout shardscroll. Errors fall
//! into two groups:
//!
//! - **Shard-level** errors (`NodeUnavailable`, `ShardExecution`) are recovered
//!   locally by the coordinator and turned into [`ShardFailure`] records. They never
//!   abort the other shards of a request.
//! - **Request-level** errors (`MalformedToken`, `AllShardsFailed`, `NextPhase`,
//!   `InvalidInput`) are surfaced to the caller's listener and are never retried
//!   internally.
//!
//! `DuplicateWrite` is an invariant violation and indicates a defect in a phase
//! implementation rather than a runtime condition.

use crate::identifiers::NodeId;
use crate::shard_failures::ShardFailure;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error raised by a phase implementation
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for all scroll coordination operations
#[derive(Debug, Error)]
pub enum ScrollError {
    /// The client supplied scroll id could not be decoded
    #[error("Cannot parse scroll id: {reason}")]
    MalformedToken { reason: String },

    /// A shard context references a node that is not part of the current membership view
    #[error("node [{node}] is not available")]
    NodeUnavailable { node: NodeId },

    /// The per-shard executor reported a failure for one shard context
    #[error("{message}")]
    ShardExecution { message: String },

    /// Every shard of the request failed during the named phase
    #[error("all shards failed")]
    AllShardsFailed {
        phase: String,
        #[source]
        cause: Arc<ScrollError>,
        failures: Vec<ShardFailure>,
    },

    /// The phase that runs after shard collection failed
    #[error("Phase failed")]
    NextPhase {
        phase: String,
        #[source]
        cause: BoxError,
    },

    /// A result slot was written more than once
    #[error("Result slot [{ordinal}] has already been written")]
    DuplicateWrite { ordinal: usize },

    /// Input validation failed
    #[error("Invalid input: {field} - {reason}. {suggestion}")]
    InvalidInput {
        field: String,
        reason: String,
        suggestion: String,
    },

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScrollError {
    /// Create a malformed token error
    pub fn malformed_token(reason: impl Into<String>) -> Self {
        Self::MalformedToken { reason: reason.into() }
    }

    /// Create a node unavailable error for the given node
    pub fn node_unavailable(node: impl Into<NodeId>) -> Self {
        Self::NodeUnavailable { node: node.into() }
    }

    /// Create a shard execution error
    pub fn shard_execution(message: impl Into<String>) -> Self {
        Self::ShardExecution {
            message: message.into(),
        }
    }

    /// Create an all-shards-failed error wrapping the first recorded failure
    ///
    /// `failures` is expected in ordinal order; its first entry becomes the cause.
    /// An empty report is tolerated and yields a synthetic shard execution cause.
    pub fn all_shards_failed(phase: impl Into<String>, failures: Vec<ShardFailure>) -> Self {
        let cause = failures
            .first()
            .map(|failure| Arc::clone(failure.cause_arc()))
            .unwrap_or_else(|| Arc::new(Self::shard_execution("no shard failures were recorded")));

        Self::AllShardsFailed {
            phase: phase.into(),
            cause,
            failures,
        }
    }

    /// Create a next phase error
    pub fn next_phase(phase: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::NextPhase {
            phase: phase.into(),
            cause: cause.into(),
        }
    }

    /// Create a duplicate write error
    pub fn duplicate_write(ordinal: usize) -> Self {
        Self::DuplicateWrite { ordinal }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a detailed config error
    pub fn config_error(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Config(format!("{} - {}: {}", field.into(), reason.into(), suggestion.into()))
    }

    /// Name of this error within the scroll error taxonomy
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::MalformedToken { .. } => "MalformedTokenError",
            Self::NodeUnavailable { .. } => "NodeUnavailableError",
            Self::ShardExecution { .. } => "ShardExecutionError",
            Self::AllShardsFailed { .. } => "AllShardsFailedError",
            Self::NextPhase { .. } => "NextPhaseError",
            Self::DuplicateWrite { .. } => "DuplicateWriteError",
            Self::InvalidInput { .. } => "InvalidInputError",
            Self::Config(_) => "ConfigError",
        }
    }

    /// Check if this error only affects a single shard of a request
    pub fn is_shard_level(&self) -> bool {
        matches!(self, Self::NodeUnavailable { .. } | Self::ShardExecution { .. })
    }

    /// Check if this error terminates the whole request
    pub fn is_fatal(&self) -> bool {
        !self.is_shard_level()
    }

    /// Get the phase name carried by phase-level failures
    pub fn phase_name(&self) -> Option<&str> {
        match self {
            Self::AllShardsFailed { phase, .. } | Self::NextPhase { phase, .. } => Some(phase),
            _ => None,
        }
    }

    /// Get the per-shard failure report attached to an all-shards-failed error
    pub fn shard_failures(&self) -> &[ShardFailure] {
        match self {
            Self::AllShardsFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}
