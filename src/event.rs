//! Query execution events delivered by the database layer
//!
//! Timestamps are seconds on a monotonic clock. Only their difference is
//! meaningful; the origin is whatever the producing [`EventHook`] chose.
//!
//! [`EventHook`]: crate::hook::EventHook

use crate::error::{ProfilerError, Result};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Bound statement parameters, opaque to the profiler
pub type Parameters = serde_json::Value;

/// A single completed statement execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEvent {
    /// Raw SQL text as sent to the database
    #[serde(rename = "sql")]
    pub sql_text: String,
    /// Bound parameters (null when the statement had none)
    #[serde(default, rename = "params")]
    pub parameters: Parameters,
    /// Start of execution (seconds)
    pub started_at: f64,
    /// End of execution or failure point (seconds)
    pub ended_at: f64,
    /// The statement raised an error after it started
    #[serde(default)]
    pub failed: bool,
}

impl QueryEvent {
    pub fn new(
        sql_text: impl Into<String>,
        parameters: Parameters,
        started_at: f64,
        ended_at: f64,
    ) -> Self {
        Self {
            sql_text: sql_text.into(),
            parameters,
            started_at,
            ended_at,
            failed: false,
        }
    }

    /// Mark the event as a failed execution
    pub fn with_failure(mut self) -> Self {
        self.failed = true;
        self
    }

    /// Elapsed execution time in seconds
    ///
    /// # Errors
    /// `InvalidEvent` if either timestamp is not finite or the event ends
    /// before it starts.
    pub fn duration(&self) -> Result<f64> {
        let valid = self.started_at.is_finite()
            && self.ended_at.is_finite()
            && self.ended_at >= self.started_at;
        if !valid {
            return Err(ProfilerError::InvalidEvent {
                started_at: self.started_at,
                ended_at: self.ended_at,
            });
        }
        Ok(self.ended_at - self.started_at)
    }

    /// FNV fingerprint of the bound parameters, `None` when there are none
    pub fn parameters_fingerprint(&self) -> Option<u64> {
        if self.parameters.is_null() {
            return None;
        }
        let mut hasher = fnv::FnvHasher::default();
        self.parameters.to_string().hash(&mut hasher);
        Some(hasher.finish())
    }
}
