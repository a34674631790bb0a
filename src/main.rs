use anyhow::{Context, Result};
use clap::Parser;
use querytap::cli::{Cli, OutputFormat};
use querytap::config::ProfilerConfig;
use querytap::profiler::Profiler;
use querytap::replay;
use querytap::report::StatsReport;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(args: &Cli) -> Result<ProfilerConfig> {
    let mut config = match &args.config {
        Some(path) => ProfilerConfig::from_toml(path)?,
        None => ProfilerConfig::default(),
    };
    if let Some(threshold) = args.n_plus_one {
        config.n_plus_one_threshold = threshold;
        config
            .validate()
            .context("Invalid value for --n-plus-one")?;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = load_config(&args)?;
    let threshold = config.n_plus_one_threshold;
    let profiler = Profiler::new(config);

    let events = replay::read_events(&args.events)?;
    let stats = replay::replay(&profiler, &args.label, args.save, &events)?;

    match args.format {
        OutputFormat::Text => print!("{}", stats.summary()),
        OutputFormat::Json => {
            let report = StatsReport::from(&stats);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    for finding in stats.detect_repeated_queries(threshold) {
        eprintln!("{}", finding);
    }

    Ok(())
}
