//! Database-layer execution hook
//!
//! A database adapter calls [`ExecutionListener::on_before_execute`] right
//! before a statement is sent and [`ExecutionListener::on_after_execute`]
//! once it has finished (or failed). The hook timestamps both ends and
//! forwards the completed event to the scopes that were open when the
//! statement started and are still open when it ends.
//!
//! The hook never talks to the database itself.
//!
//! # Example
//!
//! ```
//! use querytap::hook::ExecutionOutcome;
//! use querytap::profiler::Profiler;
//! use serde_json::json;
//!
//! let profiler = Profiler::default();
//! let hook = profiler.hook();
//! let mut session = profiler.session("example", false);
//! session.enter().unwrap();
//!
//! let ctx = hook.before_execute("SELECT * FROM posts WHERE id = ?", json!([1]));
//! // ... driver runs the statement ...
//! hook.after_execute(ctx, ExecutionOutcome::Completed).unwrap();
//!
//! let stats = session.exit().unwrap();
//! assert_eq!(stats.query_count(), 1);
//! ```

use crate::error::Result;
use crate::event::{Parameters, QueryEvent};
use crate::registry::{ScopeId, ScopeRegistry};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, trace};

/// How a statement attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Ran to completion
    Completed,
    /// Started, then raised an error; still recorded
    Failed { message: String },
    /// Rejected before execution began; dropped
    NotStarted,
}

#[derive(Debug, Clone)]
struct PendingStatement {
    sql_text: String,
    parameters: Parameters,
    /// Scopes open at statement start
    scopes: Vec<ScopeId>,
}

/// Opaque state carried from `before_execute` to `after_execute`
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    started_at: f64,
    /// `None` when no scope was open at start; such statements are not attributed
    pending: Option<PendingStatement>,
}

impl ExecutionContext {
    pub fn started_at(&self) -> f64 {
        self.started_at
    }

    pub fn sql_text(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.sql_text.as_str())
    }

    /// Scopes the statement will be attributed to
    pub fn scopes(&self) -> &[ScopeId] {
        match &self.pending {
            Some(pending) => &pending.scopes,
            None => &[],
        }
    }
}

/// Subscription interface a database layer drives, once per statement attempt
pub trait ExecutionListener: Send + Sync {
    fn on_before_execute(&self, sql_text: &str, parameters: &Parameters) -> ExecutionContext;

    fn on_after_execute(&self, context: ExecutionContext, outcome: ExecutionOutcome);
}

/// Execution hook bound to one [`ScopeRegistry`]
#[derive(Debug, Clone)]
pub struct EventHook {
    registry: Arc<ScopeRegistry>,
    origin: Instant,
}

impl EventHook {
    pub fn new(registry: Arc<ScopeRegistry>) -> Self {
        Self {
            registry,
            origin: Instant::now(),
        }
    }

    /// Seconds since this hook was created (monotonic)
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// Capture the start of a statement
    ///
    /// The SQL and parameters are only copied when at least one scope is
    /// open, so an idle profiler costs an atomic load and a clock read.
    /// Scopes opened after this call never see the statement.
    pub fn before_execute(&self, sql_text: &str, parameters: Parameters) -> ExecutionContext {
        let scopes = if self.registry.active_count() > 0 {
            self.registry.active_scopes()
        } else {
            Vec::new()
        };
        let pending = (!scopes.is_empty()).then(|| PendingStatement {
            sql_text: sql_text.to_string(),
            parameters,
            scopes,
        });
        ExecutionContext {
            started_at: self.now(),
            pending,
        }
    }

    /// Complete a statement and forward it to the scopes captured at start
    ///
    /// Returns the number of scopes that recorded it (0 for dropped
    /// statements).
    pub fn after_execute(
        &self,
        context: ExecutionContext,
        outcome: ExecutionOutcome,
    ) -> Result<usize> {
        let ended_at = self.now();
        let Some(pending) = context.pending else {
            return Ok(0);
        };

        let failed = match outcome {
            ExecutionOutcome::NotStarted => {
                trace!(sql = %pending.sql_text, "statement never started; dropped");
                return Ok(0);
            }
            ExecutionOutcome::Failed { message } => {
                trace!(sql = %pending.sql_text, %message, "statement failed");
                true
            }
            ExecutionOutcome::Completed => false,
        };

        let mut event = QueryEvent::new(
            pending.sql_text,
            pending.parameters,
            context.started_at,
            ended_at,
        );
        event.failed = failed;
        self.registry.deliver_to(&event, &pending.scopes)
    }

    /// Run `execute` as one instrumented statement
    ///
    /// The closure's result is returned untouched; an `Err` is recorded as a
    /// failed execution. Delivery errors are logged, never surfaced, so
    /// profiling cannot change what the caller sees.
    pub fn instrument<T, E, F>(
        &self,
        sql_text: &str,
        parameters: Parameters,
        execute: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let context = self.before_execute(sql_text, parameters);
        let result = execute();
        let outcome = match &result {
            Ok(_) => ExecutionOutcome::Completed,
            Err(e) => ExecutionOutcome::Failed {
                message: e.to_string(),
            },
        };
        if let Err(e) = self.after_execute(context, outcome) {
            error!(error = %e, "failed to record query event");
        }
        result
    }
}

impl ExecutionListener for EventHook {
    fn on_before_execute(&self, sql_text: &str, parameters: &Parameters) -> ExecutionContext {
        self.before_execute(sql_text, parameters.clone())
    }

    fn on_after_execute(&self, context: ExecutionContext, outcome: ExecutionOutcome) {
        if let Err(e) = self.after_execute(context, outcome) {
            error!(error = %e, "failed to record query event");
        }
    }
}
