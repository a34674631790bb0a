//! Profiler configuration
//!
//! Every field has a default, so an empty TOML file is a valid config.
//!
//! # Example TOML
//! ```toml
//! report_dir = "target/query-reports"
//! report_format = "text"
//! n_plus_one_threshold = 5
//! ```

use crate::report::{JsonReportWriter, ReportWriter, TextReportWriter};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// On-disk format for saved session reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Text,
}

/// Settings shared by every session of a [`Profiler`](crate::profiler::Profiler)
///
/// # Example
/// ```
/// use querytap::config::{ProfilerConfig, ReportFormat};
///
/// let config = ProfilerConfig::default();
/// assert_eq!(config.report_format, ReportFormat::Json);
/// assert_eq!(config.n_plus_one_threshold, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerConfig {
    /// Directory receiving one report file per saved session
    pub report_dir: PathBuf,

    /// Format of saved reports
    pub report_format: ReportFormat,

    /// Executions of one statement shape within a scope at which it is
    /// reported as a possible N+1 pattern
    pub n_plus_one_threshold: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            report_dir: PathBuf::from("querytap-reports"),
            report_format: ReportFormat::Json,
            n_plus_one_threshold: 10,
        }
    }
}

impl ProfilerConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if the file can't be read, has invalid TOML syntax,
    /// contains unknown keys or fails validation.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).context("Failed to parse TOML profiler configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_plus_one_threshold == 0 {
            anyhow::bail!("n_plus_one_threshold must be at least 1");
        }
        Ok(())
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    pub fn with_report_format(mut self, format: ReportFormat) -> Self {
        self.report_format = format;
        self
    }

    /// Writer matching `report_format`, targeting `report_dir`
    pub fn report_writer(&self) -> Arc<dyn ReportWriter> {
        match self.report_format {
            ReportFormat::Json => Arc::new(JsonReportWriter::new(&self.report_dir)),
            ReportFormat::Text => Arc::new(TextReportWriter::new(&self.report_dir)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_toml_is_default() {
        let config = ProfilerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ProfilerConfig::default());
    }

    #[test]
    fn test_parse_all_fields() {
        let config = ProfilerConfig::from_toml_str(
            r#"
            report_dir = "out/reports"
            report_format = "text"
            n_plus_one_threshold = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.report_dir, PathBuf::from("out/reports"));
        assert_eq!(config.report_format, ReportFormat::Text);
        assert_eq!(config.n_plus_one_threshold, 3);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(ProfilerConfig::from_toml_str("report_directory = \"x\"").is_err());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let err = ProfilerConfig::from_toml_str("n_plus_one_threshold = 0").unwrap_err();
        assert!(err.to_string().contains("n_plus_one_threshold"));
    }

    #[test]
    fn test_bad_format_rejected() {
        assert!(ProfilerConfig::from_toml_str("report_format = \"html\"").is_err());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "n_plus_one_threshold = 4").unwrap();
        let config = ProfilerConfig::from_toml(file.path()).unwrap();
        assert_eq!(config.n_plus_one_threshold, 4);
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = ProfilerConfig::from_toml("/nonexistent/querytap.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/querytap.toml"));
    }

    #[test]
    fn test_builders() {
        let config = ProfilerConfig::default()
            .with_report_dir("/tmp/q")
            .with_report_format(ReportFormat::Text);
        assert_eq!(config.report_dir, PathBuf::from("/tmp/q"));
        assert_eq!(config.report_format, ReportFormat::Text);
    }
}
