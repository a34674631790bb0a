//! Caller-facing profiling sessions
//!
//! A [`ProfilingSession`] walks `Unopened → Open → Closed` exactly once.
//! While open, its scope receives every statement delivered to the
//! registry; on close the accumulated data is frozen into [`Stats`].
//!
//! [`ProfilingSession::run`] is the guarded form: the scope is closed when
//! the block returns, returns `Err`, or panics.

use crate::error::{ProfilerError, Result};
use crate::registry::{AccumulatorHandle, ScopeId, ScopeRegistry};
use crate::report::ReportWriter;
use crate::stats::Stats;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
enum SessionState {
    Unopened,
    Open(AccumulatorHandle),
    Closed(Stats),
}

/// Externally visible lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unopened,
    Open,
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Unopened => "unopened",
            SessionStatus::Open => "open",
            SessionStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One profiling scope, opened and closed by the caller
pub struct ProfilingSession {
    registry: Arc<ScopeRegistry>,
    label: String,
    save_report: bool,
    writer: Option<Arc<dyn ReportWriter>>,
    state: SessionState,
}

impl fmt::Debug for ProfilingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfilingSession")
            .field("label", &self.label)
            .field("save_report", &self.save_report)
            .field("status", &self.status())
            .finish()
    }
}

impl ProfilingSession {
    /// Create an unopened session that does not save a report
    pub fn new(registry: Arc<ScopeRegistry>, label: impl Into<String>) -> Self {
        Self {
            registry,
            label: label.into(),
            save_report: false,
            writer: None,
            state: SessionState::Unopened,
        }
    }

    /// Hand the frozen stats to `writer` when the session closes
    pub fn with_report_writer(mut self, writer: Arc<dyn ReportWriter>) -> Self {
        self.writer = Some(writer);
        self.save_report = true;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn status(&self) -> SessionStatus {
        match self.state {
            SessionState::Unopened => SessionStatus::Unopened,
            SessionState::Open(_) => SessionStatus::Open,
            SessionState::Closed(_) => SessionStatus::Closed,
        }
    }

    /// Scope id, once the session has been entered
    pub fn scope_id(&self) -> Option<&ScopeId> {
        match &self.state {
            SessionState::Unopened => None,
            SessionState::Open(handle) => Some(handle.scope_id()),
            SessionState::Closed(stats) => Some(stats.scope_id()),
        }
    }

    /// Open the session's scope
    ///
    /// # Errors
    /// `SessionAlreadyOpen` or `SessionAlreadyClosed` outside the
    /// `Unopened` state.
    pub fn enter(&mut self) -> Result<ScopeId> {
        match self.state {
            SessionState::Open(_) => {
                return Err(ProfilerError::SessionAlreadyOpen {
                    label: self.label.clone(),
                })
            }
            SessionState::Closed(_) => {
                return Err(ProfilerError::SessionAlreadyClosed {
                    label: self.label.clone(),
                })
            }
            SessionState::Unopened => {}
        }

        let scope_id = self.registry.next_scope_id(&self.label);
        let handle = self.registry.activate(scope_id.clone())?;
        self.state = SessionState::Open(handle);
        Ok(scope_id)
    }

    /// Close the scope and return its frozen statistics
    ///
    /// The session is `Closed` afterwards even when this fails; `stats()`
    /// then holds whatever had been recorded.
    ///
    /// # Errors
    /// `SessionNotOpen` before `enter`, `SessionAlreadyClosed` on a second
    /// call, `AccumulatorClosed` if the accumulator was frozen out of band.
    pub fn exit(&mut self) -> Result<Stats> {
        let handle = match &self.state {
            SessionState::Unopened => {
                return Err(ProfilerError::SessionNotOpen {
                    label: self.label.clone(),
                })
            }
            SessionState::Closed(_) => {
                return Err(ProfilerError::SessionAlreadyClosed {
                    label: self.label.clone(),
                })
            }
            SessionState::Open(handle) => handle.clone(),
        };

        let released = self.registry.deactivate(handle.scope_id()).map(|_| ());
        let stats = match handle.freeze() {
            Ok(stats) => stats,
            Err(e) => {
                self.state = SessionState::Closed(handle.snapshot());
                return Err(e);
            }
        };
        self.state = SessionState::Closed(stats.clone());
        released?;

        if self.save_report {
            self.save(&stats);
        }
        Ok(stats)
    }

    fn save(&self, stats: &Stats) {
        // a writer that panics while unwinding would abort the process
        if std::thread::panicking() {
            warn!(scope = %stats.scope_id(), "skipping report while unwinding");
            return;
        }
        let Some(writer) = &self.writer else {
            warn!(scope = %stats.scope_id(), "report requested but no report writer configured");
            return;
        };
        match writer.write_report(stats) {
            Ok(path) => debug!(scope = %stats.scope_id(), path = %path.display(), "report written"),
            Err(e) => warn!(scope = %stats.scope_id(), error = %e, "failed to write report"),
        }
    }

    /// Enter, run `block`, exit
    ///
    /// The block's own result comes back unchanged inside the outer `Ok`.
    /// The scope is closed even if the block panics. If closing fails after
    /// the block ran, the failure is logged and `stats()` holds what was
    /// recorded; the block's result still wins.
    ///
    /// # Errors
    /// Any error from `enter`. The block is not run in that case.
    pub fn run<T, E, F>(&mut self, block: F) -> Result<std::result::Result<T, E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.run_inner(block).map(|(result, _)| result)
    }

    pub(crate) fn run_inner<T, E, F>(
        &mut self,
        block: F,
    ) -> Result<(std::result::Result<T, E>, Stats)>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.enter()?;
        let mut guard = ExitGuard {
            session: self,
            armed: true,
        };
        let result = block();
        guard.armed = false;
        let stats = match guard.session.exit() {
            Ok(stats) => stats,
            Err(e) => match guard.session.snapshot() {
                Some(stats) => {
                    warn!(label = %guard.session.label, error = %e, "session closed with error");
                    stats
                }
                None => return Err(e),
            },
        };
        Ok((result, stats))
    }

    /// Frozen statistics, once closed
    pub fn stats(&self) -> Option<&Stats> {
        match &self.state {
            SessionState::Closed(stats) => Some(stats),
            _ => None,
        }
    }

    /// Statistics recorded so far; partial while open, final once closed
    pub fn snapshot(&self) -> Option<Stats> {
        match &self.state {
            SessionState::Unopened => None,
            SessionState::Open(handle) => Some(handle.snapshot()),
            SessionState::Closed(stats) => Some(stats.clone()),
        }
    }
}

impl Drop for ProfilingSession {
    fn drop(&mut self) {
        if let SessionState::Open(handle) = &self.state {
            self.registry.release_leaked(handle.scope_id());
        }
    }
}

/// Closes the session if the guarded block unwinds
struct ExitGuard<'a> {
    session: &'a mut ProfilingSession,
    armed: bool,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.session.exit() {
                warn!(label = %self.session.label, error = %e, "failed to close session during unwind");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::QueryEvent;
    use crate::report::ReportError;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn deliver(registry: &ScopeRegistry, sql: &str) {
        registry
            .deliver(&QueryEvent::new(sql, json!(null), 0.0, 0.1))
            .unwrap();
    }

    #[derive(Debug, Default)]
    struct RecordingWriter {
        written: Mutex<Vec<ScopeId>>,
    }

    impl ReportWriter for RecordingWriter {
        fn write_report(&self, stats: &Stats) -> std::result::Result<PathBuf, ReportError> {
            self.written.lock().unwrap().push(stats.scope_id().clone());
            Ok(PathBuf::from("memory"))
        }
    }

    #[derive(Debug)]
    struct FailingWriter;

    impl ReportWriter for FailingWriter {
        fn write_report(&self, _stats: &Stats) -> std::result::Result<PathBuf, ReportError> {
            Err(ReportError::Io(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn test_lifecycle() {
        let registry = Arc::new(ScopeRegistry::new());
        let mut session = ProfilingSession::new(Arc::clone(&registry), "life");
        assert_eq!(session.status(), SessionStatus::Unopened);
        assert!(session.snapshot().is_none());

        let id = session.enter().unwrap();
        assert_eq!(session.status(), SessionStatus::Open);
        assert!(registry.is_active(&id));

        deliver(&registry, "SELECT 1");
        assert_eq!(session.snapshot().unwrap().query_count(), 1);

        let stats = session.exit().unwrap();
        assert_eq!(stats.query_count(), 1);
        assert_eq!(session.status(), SessionStatus::Closed);
        assert_eq!(session.stats(), Some(&stats));
        assert!(!registry.is_active(&id));
    }

    #[test]
    fn test_misuse_errors() {
        let registry = Arc::new(ScopeRegistry::new());
        let mut session = ProfilingSession::new(registry, "misuse");
        assert!(matches!(
            session.exit(),
            Err(ProfilerError::SessionNotOpen { .. })
        ));

        session.enter().unwrap();
        assert!(matches!(
            session.enter(),
            Err(ProfilerError::SessionAlreadyOpen { .. })
        ));

        session.exit().unwrap();
        assert!(matches!(
            session.exit(),
            Err(ProfilerError::SessionAlreadyClosed { .. })
        ));
        assert!(matches!(
            session.enter(),
            Err(ProfilerError::SessionAlreadyClosed { .. })
        ));
    }

    #[test]
    fn test_run_returns_block_result() {
        let registry = Arc::new(ScopeRegistry::new());
        let mut session = ProfilingSession::new(Arc::clone(&registry), "run");
        let result = session
            .run(|| {
                deliver(&registry, "SELECT 1");
                Err::<(), _>("query failed")
            })
            .unwrap();
        assert_eq!(result, Err("query failed"));
        assert_eq!(session.stats().unwrap().query_count(), 1);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_run_closes_on_panic() {
        let registry = Arc::new(ScopeRegistry::new());
        let mut session = ProfilingSession::new(Arc::clone(&registry), "panic");
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = session.run(|| -> std::result::Result<(), ()> {
                deliver(&registry, "SELECT 1");
                panic!("block exploded");
            });
        }));
        assert!(outcome.is_err());
        assert_eq!(session.status(), SessionStatus::Closed);
        assert_eq!(session.stats().unwrap().query_count(), 1);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.leaked_scopes(), 0);
    }

    #[test]
    fn test_run_keeps_block_error_when_exit_fails() {
        let registry = Arc::new(ScopeRegistry::new());
        let mut session = ProfilingSession::new(Arc::clone(&registry), "s");
        let result = session
            .run(|| {
                deliver(&registry, "SELECT 1");
                let scope = registry.active_scopes()[0].clone();
                registry.deactivate(&scope).unwrap();
                Err::<(), _>("caller error")
            })
            .unwrap();
        assert_eq!(result, Err("caller error"));
        assert_eq!(session.status(), SessionStatus::Closed);
        assert_eq!(session.stats().unwrap().query_count(), 1);
    }

    #[test]
    fn test_panicking_block_skips_report() {
        let registry = Arc::new(ScopeRegistry::new());
        let writer = Arc::new(RecordingWriter::default());
        let mut session = ProfilingSession::new(Arc::clone(&registry), "unwinding")
            .with_report_writer(writer.clone());
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = session.run(|| -> std::result::Result<(), ()> { panic!("block exploded") });
        }));
        assert!(outcome.is_err());
        assert_eq!(session.status(), SessionStatus::Closed);
        assert!(writer.written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_while_open_counts_leak() {
        let registry = Arc::new(ScopeRegistry::new());
        {
            let mut session = ProfilingSession::new(Arc::clone(&registry), "leak");
            session.enter().unwrap();
        }
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.leaked_scopes(), 1);

        {
            let mut session = ProfilingSession::new(Arc::clone(&registry), "closed");
            session.enter().unwrap();
            session.exit().unwrap();
        }
        assert_eq!(registry.leaked_scopes(), 1);
    }

    #[test]
    fn test_report_writer_receives_stats() {
        let registry = Arc::new(ScopeRegistry::new());
        let writer = Arc::new(RecordingWriter::default());
        let mut session = ProfilingSession::new(Arc::clone(&registry), "saved")
            .with_report_writer(writer.clone());
        let id = session.enter().unwrap();
        session.exit().unwrap();
        assert_eq!(*writer.written.lock().unwrap(), vec![id]);
    }

    #[test]
    fn test_report_failure_does_not_fail_exit() {
        let registry = Arc::new(ScopeRegistry::new());
        let mut session = ProfilingSession::new(Arc::clone(&registry), "unsaved")
            .with_report_writer(Arc::new(FailingWriter));
        session.enter().unwrap();
        deliver(&registry, "SELECT 1");
        assert_eq!(session.exit().unwrap().query_count(), 1);
    }

    #[test]
    fn test_out_of_band_freeze_surfaces_on_exit() {
        let registry = Arc::new(ScopeRegistry::new());
        let mut session = ProfilingSession::new(Arc::clone(&registry), "frozen");
        let id = session.enter().unwrap();
        deliver(&registry, "SELECT 1");

        let handle = registry
            .active_accumulators()
            .into_iter()
            .find(|h| h.scope_id() == &id)
            .unwrap();
        handle.freeze().unwrap();

        assert!(matches!(
            session.exit(),
            Err(ProfilerError::AccumulatorClosed { .. })
        ));
        assert_eq!(session.status(), SessionStatus::Closed);
        assert_eq!(session.stats().unwrap().query_count(), 1);
        assert_eq!(registry.active_count(), 0);
    }
}
