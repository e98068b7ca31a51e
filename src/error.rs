//! Crate-wide error taxonomy.
//!
//! One flat `thiserror` enum per subsystem, folded into `AgentError` via
//! `#[from]`, plus small predicate helpers callers use to decide whether
//! a failure is retryable or fatal for the current tick.

use thiserror::Error;

use crate::property_store::PropertyKey;

pub type AgentResult<T> = Result<T, AgentError>;
pub type PropertyResult<T> = Result<T, PropertyError>;
pub type TimerResult<T> = Result<T, TimerError>;
pub type TransportResult<T> = Result<T, TransportError>;

/// Property-store failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("property not found: {0:?}")]
    NotFound(PropertyKey),

    #[error("property {key:?} expected type {expected}, got {actual}")]
    TypeError {
        key: PropertyKey,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("property {0:?} is not mutable")]
    AccessDenied(PropertyKey),

    #[error("property {key:?} rejected: {message}")]
    Validation { key: PropertyKey, message: String },

    #[error("missing required environment variable: {0}")]
    EnvironmentVariable(String),
}

/// Timer-queue failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    #[error("no timer with id {0}")]
    NotFound(u64),

    #[error("schedule_in called with a negative delay")]
    InvalidDelay,

    #[error("schedule_at called with a deadline in the past: {0}")]
    InvalidDeadline(i64),
}

/// Transport-facing failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("claim of {length} bytes on {publication} failed after {attempts} attempts")]
    ClaimFailed {
        publication: String,
        length: usize,
        attempts: u32,
    },

    #[error("{publication} back-pressured after {attempts} attempts")]
    BackPressured { publication: String, attempts: u32 },

    #[error("{0} is not connected")]
    NotConnected(String),

    #[error("stream {name}[{index}] not found")]
    StreamNotFound { name: String, index: usize },
}

/// Agent-lifecycle failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid operation {operation} in state {state}")]
    StateInvalid { state: String, operation: String },

    #[error("communications not initialized for {0}")]
    CommunicationsNotInitialized(String),

    #[error("failed to initialize communications: {0}")]
    CommunicationsInitFailed(String),

    /// Sentinel: deliberate agent shutdown. Never produced by a `From` impl —
    /// only raised explicitly from `Exit.on_entry`.
    #[error("agent termination requested")]
    Termination,
}

impl AgentError {
    /// Transient failures worth retrying within the same tick: bounded
    /// retry on `BackPressured`, never on a hard error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Transport(TransportError::BackPressured { .. })
        )
    }

    /// Failures that abort only the current publication/handler, not the
    /// whole tick.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AgentError::Termination)
    }
}
