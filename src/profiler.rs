//! Profiler entry point
//!
//! A [`Profiler`] ties together one [`ScopeRegistry`], the [`EventHook`]
//! the database layer drives, and the sessions callers open. Separate
//! profilers share nothing, which keeps tests isolated.

use crate::config::ProfilerConfig;
use crate::error::Result;
use crate::hook::EventHook;
use crate::registry::ScopeRegistry;
use crate::report::ReportWriter;
use crate::session::ProfilingSession;
use crate::stats::Stats;
use std::sync::Arc;

/// Owner of a scope registry and the report writer for saved sessions
///
/// # Example
/// ```
/// use querytap::profiler::Profiler;
/// use serde_json::json;
///
/// let profiler = Profiler::default();
/// let hook = profiler.hook();
///
/// let (rows, stats) = profiler
///     .profile("list-posts", false, || {
///         hook.instrument("SELECT * FROM posts", json!(null), || Ok::<_, String>(3))
///     })
///     .unwrap();
///
/// assert_eq!(rows, Ok(3));
/// assert_eq!(stats.query_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Profiler {
    registry: Arc<ScopeRegistry>,
    config: ProfilerConfig,
    writer: Arc<dyn ReportWriter>,
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(ProfilerConfig::default())
    }
}

impl Profiler {
    /// Create a profiler with a fresh registry and the report writer
    /// selected by `config`
    pub fn new(config: ProfilerConfig) -> Self {
        let writer = config.report_writer();
        Self {
            registry: Arc::new(ScopeRegistry::new()),
            config,
            writer,
        }
    }

    /// Replace the report writer used by sessions that save
    pub fn with_report_writer(mut self, writer: Arc<dyn ReportWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn registry(&self) -> &Arc<ScopeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Execution hook bound to this profiler's registry
    pub fn hook(&self) -> EventHook {
        EventHook::new(Arc::clone(&self.registry))
    }

    /// New unopened session; with `save_report`, its stats are handed to the
    /// report writer on close
    pub fn session(&self, label: &str, save_report: bool) -> ProfilingSession {
        let session = ProfilingSession::new(Arc::clone(&self.registry), label);
        if save_report {
            session.with_report_writer(Arc::clone(&self.writer))
        } else {
            session
        }
    }

    /// Profile `block` in a fresh session and return its result with the stats
    ///
    /// # Errors
    /// Session errors only; the block's own error is returned inside the
    /// tuple, unchanged.
    pub fn profile<T, E, F>(
        &self,
        label: &str,
        save_report: bool,
        block: F,
    ) -> Result<(std::result::Result<T, E>, Stats)>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.session(label, save_report).run_inner(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profilers_are_isolated() {
        let a = Profiler::default();
        let b = Profiler::default();
        let mut session = a.session("a", false);
        session.enter().unwrap();

        let hook_b = b.hook();
        let _: std::result::Result<(), String> =
            hook_b.instrument("SELECT 1", json!(null), || Ok(()));

        assert_eq!(session.exit().unwrap().query_count(), 0);
        assert_eq!(b.registry().active_count(), 0);
    }

    #[test]
    fn test_profile_returns_block_error() {
        let profiler = Profiler::default();
        let hook = profiler.hook();
        let (result, stats) = profiler
            .profile("failing", false, || {
                hook.instrument("SELECT 1", json!(null), || Ok::<_, String>(()))?;
                hook.instrument("SELECT 2", json!(null), || Ok::<_, String>(()))?;
                Err::<(), _>("application error".to_string())
            })
            .unwrap();
        assert_eq!(result, Err("application error".to_string()));
        assert_eq!(stats.query_count(), 2);
        assert_eq!(profiler.registry().active_count(), 0);
    }

    #[test]
    fn test_session_labels_get_distinct_scopes() {
        let profiler = Profiler::default();
        let (_, first) = profiler
            .profile("same", false, || Ok::<_, ()>(()))
            .unwrap();
        let (_, second) = profiler
            .profile("same", false, || Ok::<_, ()>(()))
            .unwrap();
        assert_ne!(first.scope_id(), second.scope_id());
        assert_eq!(first.label(), second.label());
    }

    #[test]
    fn test_config_is_kept() {
        let config = ProfilerConfig {
            n_plus_one_threshold: 3,
            ..ProfilerConfig::default()
        };
        let profiler = Profiler::new(config);
        assert_eq!(profiler.config().n_plus_one_threshold, 3);
    }
}
