//! Per-scope statement statistics
//!
//! A [`StatisticsAccumulator`] lives exactly as long as its profiling scope.
//! Each recorded event lands in the [`QueryGroup`] for its statement shape;
//! global totals are maintained incrementally, while medians and
//! percentiles are recomputed from the stored durations at read time.

use crate::error::{ProfilerError, Result};
use crate::event::QueryEvent;
use crate::normalizer::{analyze, StatementKey, Verb};
use crate::registry::ScopeId;
use crate::stats::{median, percentile, Stats};
use fnv::FnvHashSet;
use std::collections::HashMap;

/// Aggregated metrics for every execution of one statement shape
#[derive(Debug, Clone, PartialEq)]
pub struct QueryGroup {
    key: StatementKey,
    verb: Verb,
    sample_text: String,
    /// Execution order, one entry per recorded event (seconds)
    durations: Vec<f64>,
    total_time: f64,
    failures: u64,
    parameter_sets: FnvHashSet<u64>,
}

impl QueryGroup {
    fn new(key: StatementKey, verb: Verb, sample_text: &str) -> Self {
        Self {
            key,
            verb,
            sample_text: sample_text.to_string(),
            durations: Vec::new(),
            total_time: 0.0,
            failures: 0,
            parameter_sets: FnvHashSet::default(),
        }
    }

    fn push(&mut self, event: &QueryEvent, duration: f64) {
        self.durations.push(duration);
        self.total_time += duration;
        if event.failed {
            self.failures += 1;
        }
        if let Some(fingerprint) = event.parameters_fingerprint() {
            self.parameter_sets.insert(fingerprint);
        }
    }

    pub fn key(&self) -> &StatementKey {
        &self.key
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Raw SQL of the first execution seen for this shape
    pub fn sample_text(&self) -> &str {
        &self.sample_text
    }

    pub fn durations(&self) -> &[f64] {
        &self.durations
    }

    pub fn query_count(&self) -> usize {
        self.durations.len()
    }

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    pub fn mean_time(&self) -> f64 {
        if self.durations.is_empty() {
            0.0
        } else {
            self.total_time / self.durations.len() as f64
        }
    }

    pub fn median_time(&self) -> f64 {
        median(&self.durations)
    }

    pub fn min_time(&self) -> f64 {
        self.durations.iter().copied().reduce(f64::min).unwrap_or(0.0)
    }

    pub fn max_time(&self) -> f64 {
        self.durations.iter().copied().reduce(f64::max).unwrap_or(0.0)
    }

    pub fn p95_time(&self) -> f64 {
        let mut sorted = self.durations.clone();
        sorted.sort_by(f64::total_cmp);
        percentile(&sorted, 95.0)
    }

    /// Executions that raised an error after starting
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Number of distinct bound-parameter sets seen. Executions without
    /// parameters do not contribute.
    pub fn distinct_parameter_sets(&self) -> usize {
        self.parameter_sets.len()
    }
}

/// Mutable aggregate for one open profiling scope
#[derive(Debug)]
pub struct StatisticsAccumulator {
    scope_id: ScopeId,
    /// First-occurrence order
    groups: Vec<QueryGroup>,
    index: HashMap<StatementKey, usize>,
    total_query_count: usize,
    total_time: f64,
    failed_count: usize,
    closed: bool,
}

impl StatisticsAccumulator {
    pub fn new(scope_id: ScopeId) -> Self {
        Self {
            scope_id,
            groups: Vec::new(),
            index: HashMap::new(),
            total_query_count: 0,
            total_time: 0.0,
            failed_count: 0,
            closed: false,
        }
    }

    pub fn scope_id(&self) -> &ScopeId {
        &self.scope_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn query_count(&self) -> usize {
        self.total_query_count
    }

    pub fn unique_queries(&self) -> usize {
        self.groups.len()
    }

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Record one completed statement execution
    ///
    /// # Errors
    /// `AccumulatorClosed` after [`freeze`](Self::freeze); `InvalidEvent`
    /// for malformed timing.
    pub fn record(&mut self, event: &QueryEvent) -> Result<()> {
        self.ensure_open()?;
        let duration = event.duration()?;
        let (key, verb) = analyze(&event.sql_text);
        self.record_analyzed(event, &key, verb, duration)
    }

    /// Record an event whose shape and duration were already computed.
    /// Lets the registry analyze once and fan out to many scopes.
    pub(crate) fn record_analyzed(
        &mut self,
        event: &QueryEvent,
        key: &StatementKey,
        verb: Verb,
        duration: f64,
    ) -> Result<()> {
        self.ensure_open()?;

        let slot = match self.index.get(key) {
            Some(&slot) => slot,
            None => {
                self.groups
                    .push(QueryGroup::new(key.clone(), verb, &event.sql_text));
                self.index.insert(key.clone(), self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        self.groups[slot].push(event, duration);

        self.total_query_count += 1;
        self.total_time += duration;
        if event.failed {
            self.failed_count += 1;
        }
        Ok(())
    }

    /// Produce the final read-only report and refuse further records
    pub fn freeze(&mut self) -> Result<Stats> {
        self.ensure_open()?;
        self.closed = true;
        Ok(self.snapshot())
    }

    /// Read-only view of everything recorded so far, without closing
    pub fn snapshot(&self) -> Stats {
        Stats::from_parts(
            self.scope_id.clone(),
            self.groups.clone(),
            self.total_query_count,
            self.total_time,
            self.failed_count,
        )
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ProfilerError::AccumulatorClosed {
                scope: self.scope_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;
    use serde_json::json;

    fn accumulator() -> StatisticsAccumulator {
        StatisticsAccumulator::new(ScopeId::new("test", 1))
    }

    fn event(sql: &str, start: f64, end: f64) -> QueryEvent {
        QueryEvent::new(sql, json!(null), start, end)
    }

    #[test]
    fn test_same_shape_lands_in_one_group() {
        let mut acc = accumulator();
        for id in 1..=5 {
            let sql = format!("SELECT * FROM posts WHERE author_id = {}", id);
            acc.record(&event(&sql, 0.0, 0.5)).unwrap();
        }

        assert_eq!(acc.query_count(), 5);
        assert_eq!(acc.unique_queries(), 1);
        assert_eq!(acc.groups[0].query_count(), 5);
        assert_eq!(acc.groups[0].sample_text(), "SELECT * FROM posts WHERE author_id = 1");
        assert_eq!(acc.groups[0].verb(), Verb::Select);
    }

    #[test]
    fn test_distinct_shapes_get_distinct_groups() {
        let mut acc = accumulator();
        acc.record(&event("SELECT * FROM authors", 0.0, 0.25)).unwrap();
        acc.record(&event("SELECT * FROM posts", 0.0, 0.25)).unwrap();
        acc.record(&event("DELETE FROM posts", 0.0, 0.25)).unwrap();

        assert_eq!(acc.query_count(), 3);
        assert_eq!(acc.unique_queries(), 3);
    }

    #[test]
    fn test_totals_track_every_duration() {
        let mut acc = accumulator();
        acc.record(&event("SELECT 1", 0.0, 0.25)).unwrap();
        acc.record(&event("SELECT 2", 1.0, 1.5)).unwrap();
        acc.record(&event("UPDATE t SET a = 1", 2.0, 2.125)).unwrap();

        assert_eq!(acc.total_time(), 0.875);
        let select = &acc.groups[0];
        assert_eq!(select.total_time(), 0.75);
        assert_eq!(select.durations(), &[0.25, 0.5]);
    }

    #[test]
    fn test_group_derived_metrics() {
        let mut acc = accumulator();
        for (start, end) in [(0.0, 4.0), (0.0, 1.0), (0.0, 3.0), (0.0, 2.0)] {
            acc.record(&event("SELECT * FROM t WHERE id = 1", start, end))
                .unwrap();
        }

        let group = &acc.groups[0];
        assert_eq!(group.query_count(), 4);
        assert_eq!(group.total_time(), 10.0);
        assert_eq!(group.mean_time(), 2.5);
        assert_eq!(group.median_time(), 2.5);
        assert_eq!(group.min_time(), 1.0);
        assert_eq!(group.max_time(), 4.0);
        // insertion order is kept even though median sorts a copy
        assert_eq!(group.durations(), &[4.0, 1.0, 3.0, 2.0]);
    }

    #[test]
    fn test_failures_are_recorded() {
        let mut acc = accumulator();
        acc.record(&event("INSERT INTO t VALUES (1)", 0.0, 0.5).with_failure())
            .unwrap();
        acc.record(&event("INSERT INTO t VALUES (2)", 0.0, 0.5)).unwrap();

        assert_eq!(acc.query_count(), 2);
        assert_eq!(acc.groups[0].failures(), 1);
        assert_eq!(acc.snapshot().failed_count(), 1);
    }

    #[test]
    fn test_distinct_parameter_sets() {
        let mut acc = accumulator();
        let sql = "SELECT * FROM authors WHERE id = ?";
        for id in [1, 2, 2, 3] {
            acc.record(&QueryEvent::new(sql, json!([id]), 0.0, 0.1))
                .unwrap();
        }
        assert_eq!(acc.groups[0].distinct_parameter_sets(), 3);
    }

    #[test]
    fn test_invalid_event_is_rejected_without_side_effects() {
        let mut acc = accumulator();
        let err = acc.record(&event("SELECT 1", 2.0, 1.0)).unwrap_err();
        assert!(matches!(err, ProfilerError::InvalidEvent { .. }));
        assert_eq!(acc.query_count(), 0);
        assert_eq!(acc.unique_queries(), 0);
    }

    #[test]
    fn test_record_after_freeze_fails() {
        let mut acc = accumulator();
        acc.record(&event("SELECT 1", 0.0, 0.5)).unwrap();
        let stats = acc.freeze().unwrap();

        let err = acc.record(&event("SELECT 1", 0.0, 0.5)).unwrap_err();
        assert_eq!(
            err,
            ProfilerError::AccumulatorClosed {
                scope: "test#1".to_string()
            }
        );
        assert_eq!(stats.query_count(), 1);
        assert_eq!(acc.query_count(), 1);
    }

    #[test]
    fn test_double_freeze_fails() {
        let mut acc = accumulator();
        acc.freeze().unwrap();
        assert!(matches!(
            acc.freeze(),
            Err(ProfilerError::AccumulatorClosed { .. })
        ));
    }

    #[test]
    fn test_snapshot_does_not_close() {
        let mut acc = accumulator();
        acc.record(&event("SELECT 1", 0.0, 0.5)).unwrap();
        let partial = acc.snapshot();
        acc.record(&event("SELECT 1", 0.0, 0.5)).unwrap();

        assert_eq!(partial.query_count(), 1);
        assert_eq!(acc.query_count(), 2);
        assert!(!acc.is_closed());
    }

    #[test]
    fn test_empty_group_metrics_are_zero() {
        let group = QueryGroup::new(normalize("SELECT 1"), Verb::Select, "SELECT 1");
        assert_eq!(group.mean_time(), 0.0);
        assert_eq!(group.median_time(), 0.0);
        assert_eq!(group.min_time(), 0.0);
        assert_eq!(group.max_time(), 0.0);
        assert_eq!(group.p95_time(), 0.0);
    }
}
