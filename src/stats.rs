//! Frozen per-scope query statistics
//!
//! [`Stats`] is what a caller gets back when a profiling session closes. It
//! owns copies of every [`QueryGroup`], so nothing the workload executes
//! afterwards can change it.

use crate::accumulator::QueryGroup;
use crate::anti_patterns::{detect_repeated_queries, RepeatedQuery};
use crate::normalizer::{StatementKey, Verb};
use crate::registry::ScopeId;
use std::cmp::Ordering;
use std::fmt::Write as _;

/// Median of unsorted values; 0.0 when empty
///
/// Sorts a copy, so the caller's execution order is untouched. Even-length
/// inputs average the two middle values.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Calculate percentile from sorted data (linear interpolation)
pub fn percentile(sorted_data: &[f64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }
    if sorted_data.len() == 1 {
        return sorted_data[0];
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted_data[lower]
    } else {
        let weight = index - lower as f64;
        sorted_data[lower] * (1.0 - weight) + sorted_data[upper] * weight
    }
}

/// Report ordering: total time descending, then count descending. Callers
/// sort stably over first-occurrence order, which breaks remaining ties.
fn by_cost(a: &QueryGroup, b: &QueryGroup) -> Ordering {
    b.total_time()
        .total_cmp(&a.total_time())
        .then_with(|| b.query_count().cmp(&a.query_count()))
}

/// Read-only statistics for one closed (or snapshotted) scope
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    scope_id: ScopeId,
    /// First-occurrence order
    groups: Vec<QueryGroup>,
    query_count: usize,
    total_time: f64,
    failed_count: usize,
}

impl Stats {
    pub(crate) fn from_parts(
        scope_id: ScopeId,
        groups: Vec<QueryGroup>,
        query_count: usize,
        total_time: f64,
        failed_count: usize,
    ) -> Self {
        Self {
            scope_id,
            groups,
            query_count,
            total_time,
            failed_count,
        }
    }

    pub fn scope_id(&self) -> &ScopeId {
        &self.scope_id
    }

    pub fn label(&self) -> &str {
        self.scope_id.label()
    }

    /// Total statements recorded
    pub fn query_count(&self) -> usize {
        self.query_count
    }

    /// Number of distinct statement shapes
    pub fn unique_queries(&self) -> usize {
        self.groups.len()
    }

    /// Sum of every recorded duration (seconds)
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// `total_time / query_count`, 0.0 when nothing was recorded
    pub fn mean_time(&self) -> f64 {
        if self.query_count == 0 {
            0.0
        } else {
            self.total_time / self.query_count as f64
        }
    }

    /// Median over all individual durations across every group
    pub fn median_time(&self) -> f64 {
        let all: Vec<f64> = self
            .groups
            .iter()
            .flat_map(|g| g.durations().iter().copied())
            .collect();
        median(&all)
    }

    /// Statements that raised an error after starting
    pub fn failed_count(&self) -> usize {
        self.failed_count
    }

    /// All groups in first-occurrence order
    pub fn groups(&self) -> &[QueryGroup] {
        &self.groups
    }

    pub fn group(&self, key: &StatementKey) -> Option<&QueryGroup> {
        self.groups.iter().find(|g| g.key() == key)
    }

    /// All groups ordered by descending total time, then descending count,
    /// then first occurrence
    pub fn ranked_groups(&self) -> Vec<&QueryGroup> {
        let mut ranked: Vec<&QueryGroup> = self.groups.iter().collect();
        ranked.sort_by(|a, b| by_cost(a, b));
        ranked
    }

    /// Groups of one verb, in [`ranked_groups`](Self::ranked_groups) order
    pub fn get_queries_by_type(&self, verb: Verb) -> Vec<&QueryGroup> {
        let mut matching: Vec<&QueryGroup> =
            self.groups.iter().filter(|g| g.verb() == verb).collect();
        matching.sort_by(|a, b| by_cost(a, b));
        matching
    }

    /// The group with the highest total time, `None` when empty
    pub fn get_slowest_query(&self) -> Option<&QueryGroup> {
        // min_by keeps the first of equal elements, preserving first occurrence
        self.groups.iter().min_by(|a, b| by_cost(a, b))
    }

    /// Groups executed at least `threshold` times (N+1 suspects)
    pub fn detect_repeated_queries(&self, threshold: usize) -> Vec<RepeatedQuery> {
        detect_repeated_queries(self, threshold)
    }

    /// Human-readable report
    pub fn summary(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "=== Query Profile: {} ===", self.scope_id);
        let _ = writeln!(out, "Total queries:   {}", self.query_count);
        let _ = writeln!(out, "Unique queries:  {}", self.unique_queries());
        let _ = writeln!(out, "Failed queries:  {}", self.failed_count);
        let _ = writeln!(out, "Total time:      {:.6}s", self.total_time);
        let _ = writeln!(out, "Mean time:       {:.6}s", self.mean_time());
        let _ = writeln!(out, "Median time:     {:.6}s", self.median_time());

        if self.groups.is_empty() {
            let _ = writeln!(out, "\nNo queries recorded.");
            return out;
        }

        let _ = writeln!(out, "\nBy type:");
        for verb in Verb::ALL {
            let groups = self.get_queries_by_type(verb);
            if groups.is_empty() {
                continue;
            }
            let executions: usize = groups.iter().map(|g| g.query_count()).sum();
            let seconds: f64 = groups.iter().map(|g| g.total_time()).sum();
            let _ = writeln!(
                out,
                "  {:<6} {:>5} unique {:>7} executions {:>12.6}s",
                verb.as_str(),
                groups.len(),
                executions,
                seconds
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "% time     seconds       calls    failed verb   statement");
        let _ = writeln!(out, "------ ----------- ----------- --------- ------ ---------");
        for group in self.ranked_groups() {
            let time_percent = if self.total_time > 0.0 {
                group.total_time() / self.total_time * 100.0
            } else {
                0.0
            };
            let _ = writeln!(
                out,
                "{:6.2} {:>11.6} {:>11} {:>9} {:<6} {}",
                time_percent,
                group.total_time(),
                group.query_count(),
                if group.failures() > 0 {
                    group.failures().to_string()
                } else {
                    String::new()
                },
                group.verb().as_str(),
                group.key()
            );
        }

        if let Some(slowest) = self.get_slowest_query() {
            let _ = writeln!(
                out,
                "\nSlowest query: {} executed {} times, {:.6}s total, {:.6}s mean",
                slowest.verb(),
                slowest.query_count(),
                slowest.total_time(),
                slowest.mean_time()
            );
            let _ = writeln!(out, "  {}", slowest.sample_text());
        }

        out
    }
}
