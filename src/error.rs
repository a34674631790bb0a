//! Error types for the profiling core
//!
//! Every variant is a lifecycle or instrumentation bug in the calling code,
//! never a transient condition, so nothing here is retried.

use thiserror::Error;

/// Errors raised by the registry, accumulators and sessions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfilerError {
    #[error("Scope already active: {scope}")]
    DuplicateScope { scope: String },

    #[error("Scope not active: {scope}")]
    UnknownScope { scope: String },

    #[error("Accumulator for scope {scope} is frozen")]
    AccumulatorClosed { scope: String },

    #[error("Profiling session '{label}' is already closed")]
    SessionAlreadyClosed { label: String },

    #[error("Profiling session '{label}' is already open")]
    SessionAlreadyOpen { label: String },

    #[error("Profiling session '{label}' was never opened")]
    SessionNotOpen { label: String },

    #[error("Invalid query event timing: started_at={started_at}, ended_at={ended_at}")]
    InvalidEvent { started_at: f64, ended_at: f64 },
}

/// Result type for profiling operations
pub type Result<T> = std::result::Result<T, ProfilerError>;
