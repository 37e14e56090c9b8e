//! loadshiftd — the loadshift daemon.
//!
//! Runs next to a primary service and moves its delegated duty onto a
//! dedicated worker process while load stays above a threshold.
//!
//! # Usage
//!
//! ```text
//! loadshiftd init --path loadshift.toml
//! loadshiftd sample --config loadshift.toml
//! loadshiftd run --config loadshift.toml --threshold 25
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

const DEFAULT_FILTER: &str = "info,loadshiftd=debug,loadshift=debug";

#[derive(Parser)]
#[command(
    name = "loadshiftd",
    about = "Load-driven handoff between a primary service and a worker",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor until interrupted.
    Run {
        /// Path to loadshift.toml.
        #[arg(short, long, default_value = "loadshift.toml")]
        config: PathBuf,

        /// Override [scaling].load_threshold.
        #[arg(long)]
        threshold: Option<f64>,

        /// Override [scaling].poll_interval_ms.
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },
    /// Query the primary's load once and print it as JSON.
    Sample {
        #[arg(short, long, default_value = "loadshift.toml")]
        config: PathBuf,
    },
    /// Write a starter loadshift.toml.
    Init {
        #[arg(short, long, default_value = "loadshift.toml")]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            threshold,
            poll_interval_ms,
        } => {
            let overrides = commands::run::Overrides {
                threshold,
                poll_interval_ms,
            };
            commands::run::run(&config, overrides).await
        }
        Command::Sample { config } => commands::sample::sample(&config).await,
        Command::Init { path, force } => commands::init::init(&path, force),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "loadshiftd",
            "run",
            "--config",
            "/etc/loadshift.toml",
            "--threshold",
            "35.5",
            "--poll-interval-ms",
            "2500",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Command::Run {
                config,
                threshold,
                poll_interval_ms,
            } => {
                assert_eq!(config, PathBuf::from("/etc/loadshift.toml"));
                assert_eq!(threshold, Some(35.5));
                assert_eq!(poll_interval_ms, Some(2500));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn defaults_to_text_logs_and_local_config() {
        let cli = Cli::try_parse_from(["loadshiftd", "sample"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Text);
        match cli.command {
            Command::Sample { config } => assert_eq!(config, PathBuf::from("loadshift.toml")),
            _ => panic!("expected sample"),
        }
    }

    #[test]
    fn rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["loadshiftd", "--log-format", "xml", "init"]).is_err());
    }

    #[test]
    fn default_filter_parses() {
        assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
    }
}
