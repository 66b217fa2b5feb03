//! opgate - CLI entry point

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use opgate::cli::{Cli, Command};
use opgate::config::Config;
use opgate::demo::{DemoOptions, DemoReport, SimulatedRemote, run_demo};
use opgate::events::{EventSink, FanoutSink, JsonlEventSink, MemorySink, TracingSink, read_events};

fn parse_level(level: &str) -> Option<tracing::Level> {
    match level.to_uppercase().as_str() {
        "TRACE" => Some(tracing::Level::TRACE),
        "DEBUG" => Some(tracing::Level::DEBUG),
        "INFO" => Some(tracing::Level::INFO),
        "WARN" | "WARNING" => Some(tracing::Level::WARN),
        "ERROR" => Some(tracing::Level::ERROR),
        _ => None,
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<PathBuf> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("opgate")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => parse_level(s).unwrap_or_else(|| {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }),
        None => tracing::Level::INFO,
    };

    let log_path = log_dir.join("opgate.log");
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(log_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let log_path = setup_logging(cli.log_level.as_deref(), config.log_level.as_deref())
        .context("Failed to setup logging")?;
    debug!(?log_path, command = ?cli.command, "main: dispatching command");

    match cli.command {
        Command::Demo {
            operations,
            groups,
            keys,
            fail_every,
            request_delay_ms,
        } => {
            let options = DemoOptions {
                operations,
                groups,
                keys_per_operation: keys,
                fail_every,
            };
            cmd_demo(config, options, request_delay_ms).await
        }
        Command::Config => cmd_config(&config),
        Command::Events { path, tail } => cmd_events(&path, tail),
    }
}

async fn cmd_demo(mut config: Config, options: DemoOptions, request_delay_ms: Option<u64>) -> Result<()> {
    if let Some(delay) = request_delay_ms {
        config.fetch.request_delay_ms = delay;
    }

    let memory = Arc::new(MemorySink::new());
    let mut sink = FanoutSink::new().with(Arc::new(TracingSink)).with(memory.clone());
    if let Some(path) = &config.events.log_file {
        let jsonl = JsonlEventSink::open(path).context(format!("Failed to open event log {}", path.display()))?;
        sink = sink.with(Arc::new(jsonl));
    }
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    println!(
        "{} {} operations, {} keys each, limit {} per {}s",
        "Submitting".bold(),
        options.operations,
        options.keys_per_operation,
        config.limiter.limit,
        config.limiter.window_secs
    );

    let report = run_demo(&config, &options, SimulatedRemote::default(), sink).await?;
    print_report(&report, memory.records().len());
    Ok(())
}

fn print_report(report: &DemoReport, event_count: usize) {
    for (description, position) in &report.positions {
        let marker = if *position > 1 {
            format!("#{} in line", position).yellow()
        } else {
            "running now".green()
        };
        println!("  {:<32} {}", description, marker);
    }

    println!();
    println!(
        "{} fetched {}, not found {}, errors {}",
        "Results:".bold(),
        report.fetched.to_string().green(),
        report.not_found.to_string().yellow(),
        report.errors.to_string().red()
    );
    for failure in &report.failures {
        println!("  {} {}", "failed".red().bold(), failure);
    }
    println!(
        "{} {} used, {} remaining of {}",
        "Rate limit:".bold(),
        report.rate.used,
        report.rate.remaining,
        report.rate.limit
    );
    println!(
        "{} {} succeeded, {} failed, peak queue depth {}, {} events",
        "Scheduler:".bold(),
        report.stats.total_succeeded,
        report.stats.total_failed,
        report.stats.peak_queue_depth,
        event_count
    );
}

fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}

fn cmd_events(path: &Path, tail: Option<usize>) -> Result<()> {
    let records = read_events(path).context(format!("Failed to read event log {}", path.display()))?;
    let skip = tail.map(|n| records.len().saturating_sub(n)).unwrap_or(0);

    for record in records.iter().skip(skip) {
        let kind = if record.kind.is_failure() {
            record.kind.as_str().red()
        } else {
            record.kind.as_str().cyan()
        };
        println!(
            "{} {:<20} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            kind,
            record.details
        );
    }
    Ok(())
}
