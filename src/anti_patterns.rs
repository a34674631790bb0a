//! N+1 query detection
//!
//! An N+1 storm shows up as one statement shape executed once per row of an
//! earlier result: a [`QueryGroup`] whose count is far above its siblings.
//!
//! - **Detection:** group executed at least `threshold` times in one scope
//! - **Impact:** round-trip latency multiplied by row count
//! - **Fix:** eager loading (`JOIN`, `IN (...)` batch fetch)
//!
//! # Example
//!
//! ```
//! use querytap::anti_patterns::Severity;
//! use querytap::profiler::Profiler;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let profiler = Profiler::default();
//! let hook = profiler.hook();
//!
//! let (_, stats) = profiler.profile("n-plus-one", false, || {
//!     for id in 0..12 {
//!         let sql = format!("SELECT * FROM authors WHERE id = {}", id);
//!         hook.instrument(&sql, json!(null), || Ok::<_, std::io::Error>(()))?;
//!     }
//!     Ok::<_, std::io::Error>(())
//! })?;
//!
//! let findings = stats.detect_repeated_queries(10);
//! assert_eq!(findings.len(), 1);
//! assert_eq!(findings[0].query_count, 12);
//! assert_eq!(findings[0].severity, Severity::Low);
//! # Ok(())
//! # }
//! ```

use crate::accumulator::QueryGroup;
use crate::normalizer::{StatementKey, Verb};
use crate::stats::Stats;
use std::fmt;

/// Severity level for a repeated statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// At or above the threshold, below twice it
    Low,
    /// Between twice and five times the threshold
    Medium,
    /// Five times the threshold or more
    High,
}

impl Severity {
    fn for_count(count: usize, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        if count >= threshold * 5 {
            Severity::High
        } else if count >= threshold * 2 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// A statement shape executed often enough to suggest an N+1 pattern
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatedQuery {
    pub key: StatementKey,
    pub verb: Verb,
    pub sample_text: String,
    pub query_count: usize,
    pub total_time: f64,
    pub distinct_parameter_sets: usize,
    pub threshold: usize,
    pub severity: Severity,
}

impl RepeatedQuery {
    fn from_group(group: &QueryGroup, threshold: usize) -> Self {
        Self {
            key: group.key().clone(),
            verb: group.verb(),
            sample_text: group.sample_text().to_string(),
            query_count: group.query_count(),
            total_time: group.total_time(),
            distinct_parameter_sets: group.distinct_parameter_sets(),
            threshold,
            severity: Severity::for_count(group.query_count(), threshold),
        }
    }
}

impl fmt::Display for RepeatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Possible N+1 ({:?}): {} executed {} times (threshold {}), {:.6}s total: {}",
            self.severity,
            self.verb,
            self.query_count,
            self.threshold,
            self.total_time,
            self.key
        )
    }
}

/// Find groups executed at least `threshold` times
///
/// Ordered by descending count, then descending total time, then first
/// occurrence. A threshold of 0 is treated as 1.
pub fn detect_repeated_queries(stats: &Stats, threshold: usize) -> Vec<RepeatedQuery> {
    let threshold = threshold.max(1);
    let mut hits: Vec<&QueryGroup> = stats
        .groups()
        .iter()
        .filter(|g| g.query_count() >= threshold)
        .collect();
    hits.sort_by(|a, b| {
        b.query_count()
            .cmp(&a.query_count())
            .then_with(|| b.total_time().total_cmp(&a.total_time()))
    });
    hits.into_iter()
        .map(|g| RepeatedQuery::from_group(g, threshold))
        .collect()
}
