//! CLI argument parsing for querytap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the replayed profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary (default)
    Text,
    /// JSON report for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "querytap")]
#[command(version)]
#[command(about = "Replay recorded SQL query events through the query profiler", long_about = None)]
pub struct Cli {
    /// JSON-lines file of query events
    #[arg(value_name = "EVENTS_FILE")]
    pub events: PathBuf,

    /// Label for the profiling scope
    #[arg(short, long, default_value = "replay")]
    pub label: String,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Also write a report file to the configured report directory
    #[arg(long)]
    pub save: bool,

    /// Profiler configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the N+1 detection threshold from the config
    #[arg(long = "n-plus-one", value_name = "N")]
    pub n_plus_one: Option<usize>,

    /// Enable debug tracing output to stderr
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_events_file() {
        let cli = Cli::parse_from(["querytap", "events.jsonl"]);
        assert_eq!(cli.events, PathBuf::from("events.jsonl"));
        assert_eq!(cli.label, "replay");
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(!cli.save);
        assert!(!cli.debug);
        assert!(cli.config.is_none());
        assert!(cli.n_plus_one.is_none());
    }

    #[test]
    fn test_cli_requires_events_file() {
        assert!(Cli::try_parse_from(["querytap"]).is_err());
    }

    #[test]
    fn test_cli_all_flags() {
        let cli = Cli::parse_from([
            "querytap",
            "--label",
            "checkout",
            "--format",
            "json",
            "--save",
            "-c",
            "querytap.toml",
            "--n-plus-one",
            "3",
            "--debug",
            "events.jsonl",
        ]);
        assert_eq!(cli.label, "checkout");
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.save);
        assert_eq!(cli.config, Some(PathBuf::from("querytap.toml")));
        assert_eq!(cli.n_plus_one, Some(3));
        assert!(cli.debug);
    }

    #[test]
    fn test_cli_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["querytap", "--format", "csv", "e.jsonl"]).is_err());
    }

    #[test]
    fn test_cli_rejects_non_numeric_threshold() {
        assert!(Cli::try_parse_from(["querytap", "--n-plus-one", "many", "e.jsonl"]).is_err());
    }
}
