//! Report persistence for closed sessions
//!
//! The profiling core only ever sees the [`ReportWriter`] trait. Two
//! writers ship with the crate, both producing one file per scope in a
//! target directory: [`JsonReportWriter`] (a serde projection of
//! [`Stats`]) and [`TextReportWriter`] (the text summary).

use crate::normalizer::Verb;
use crate::registry::ScopeId;
use crate::stats::Stats;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while persisting a report
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Receives finalized statistics when a session configured to save closes
pub trait ReportWriter: fmt::Debug + Send + Sync {
    /// Persist `stats`, returning where it went
    fn write_report(&self, stats: &Stats) -> Result<PathBuf, ReportError>;
}

/// One statement shape in a serialized report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub verb: Verb,
    pub key: String,
    pub sample_text: String,
    pub query_count: usize,
    pub failures: u64,
    pub distinct_parameter_sets: usize,
    pub total_time: f64,
    pub mean_time: f64,
    pub median_time: f64,
    pub min_time: f64,
    pub max_time: f64,
}

/// Serializable projection of [`Stats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub scope: ScopeId,
    pub query_count: usize,
    pub unique_queries: usize,
    pub failed_count: usize,
    pub total_time: f64,
    pub mean_time: f64,
    pub median_time: f64,
    /// Descending total time
    pub groups: Vec<GroupReport>,
}

impl From<&Stats> for StatsReport {
    fn from(stats: &Stats) -> Self {
        let groups = stats
            .ranked_groups()
            .into_iter()
            .map(|g| GroupReport {
                verb: g.verb(),
                key: g.key().to_string(),
                sample_text: g.sample_text().to_string(),
                query_count: g.query_count(),
                failures: g.failures(),
                distinct_parameter_sets: g.distinct_parameter_sets(),
                total_time: g.total_time(),
                mean_time: g.mean_time(),
                median_time: g.median_time(),
                min_time: g.min_time(),
                max_time: g.max_time(),
            })
            .collect();

        Self {
            scope: stats.scope_id().clone(),
            query_count: stats.query_count(),
            unique_queries: stats.unique_queries(),
            failed_count: stats.failed_count(),
            total_time: stats.total_time(),
            mean_time: stats.mean_time(),
            median_time: stats.median_time(),
            groups,
        }
    }
}

/// File stem for a scope: label reduced to `[A-Za-z0-9_-]`, then the sequence
fn report_stem(scope_id: &ScopeId) -> String {
    let label: String = scope_id
        .label()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let label = if label.is_empty() { "scope".to_string() } else { label };
    format!("{}-{}", label, scope_id.seq())
}

fn create_report_file(dir: &Path, scope_id: &ScopeId, extension: &str) -> Result<(PathBuf, BufWriter<File>), ReportError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.{}", report_stem(scope_id), extension));
    let file = File::create(&path)?;
    Ok((path, BufWriter::new(file)))
}

/// Writes `<dir>/<label>-<seq>.json`
#[derive(Debug, Clone)]
pub struct JsonReportWriter {
    dir: PathBuf,
}

impl JsonReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ReportWriter for JsonReportWriter {
    fn write_report(&self, stats: &Stats) -> Result<PathBuf, ReportError> {
        let (path, mut writer) = create_report_file(&self.dir, stats.scope_id(), "json")?;
        serde_json::to_writer_pretty(&mut writer, &StatsReport::from(stats))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(path)
    }
}

/// Writes `<dir>/<label>-<seq>.txt` containing [`Stats::summary`]
#[derive(Debug, Clone)]
pub struct TextReportWriter {
    dir: PathBuf,
}

impl TextReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ReportWriter for TextReportWriter {
    fn write_report(&self, stats: &Stats) -> Result<PathBuf, ReportError> {
        let (path, mut writer) = create_report_file(&self.dir, stats.scope_id(), "txt")?;
        writer.write_all(stats.summary().as_bytes())?;
        writer.flush()?;
        Ok(path)
    }
}
