//! Command-line interface

use clap::{Parser, Subcommand, ValueEnum};
use core_pipeline::PipelineMode;
use core_runtime::config::SchedulerMode;
use core_runtime::logging::{LogFormat, LogLevel};
use std::time::Duration;

use crate::bootstrap::Overrides;

#[derive(Debug, Parser)]
#[command(name = "imgflow")]
#[command(about = "Upscale raw images on a Nextcloud share and file them by tag", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Seconds between polling cycles
    #[arg(short, long, default_value_t = 300, global = true)]
    pub frequency: u64,

    /// Override the number of items processed concurrently
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    /// Run a single cycle and exit
    #[arg(long, global = true)]
    pub once: bool,

    /// Wait for a whole batch to finish before starting the next one
    #[arg(long, global = true)]
    pub barrier: bool,

    /// pretty, json or compact (default: pretty in debug builds, json otherwise)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[arg(long, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Where credentials and directory settings are read from
    #[arg(long, value_enum, default_value_t = SecretSource::Env, global = true)]
    pub secrets: SecretSource,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Scale raw images into the unsorted directory
    Scale,
    /// Move tagged images into their category directories
    Relocate,
    /// Scale, then relocate, every cycle
    Run,
}

impl Command {
    pub fn mode(&self) -> PipelineMode {
        match self {
            Command::Scale => PipelineMode::Scale,
            Command::Relocate => PipelineMode::Relocate,
            Command::Run => PipelineMode::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SecretSource {
    /// `IMGFLOW_*` environment variables
    Env,
    /// OS keychain, service `imgflow`
    #[cfg(feature = "secure-store")]
    Keyring,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            threads_limit: self.threads,
            poll_interval: Some(Duration::from_secs(self.frequency)),
            scheduler_mode: self.barrier.then_some(SchedulerMode::Barrier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["imgflow", "run"]).unwrap();
        assert_eq!(cli.command.mode(), PipelineMode::All);
        assert_eq!(cli.frequency, 300);
        assert!(!cli.once);
        assert_eq!(cli.secrets, SecretSource::Env);
        assert_eq!(cli.log_level, LogLevel::Info);

        let overrides = cli.overrides();
        assert_eq!(overrides.poll_interval, Some(Duration::from_secs(300)));
        assert_eq!(overrides.threads_limit, None);
        assert_eq!(overrides.scheduler_mode, None);
    }

    #[test]
    fn test_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "imgflow",
            "relocate",
            "--once",
            "-f",
            "60",
            "--threads",
            "4",
            "--barrier",
            "--log-format",
            "json",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.command, Command::Relocate);
        assert!(cli.once);
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert_eq!(cli.log_level, LogLevel::Debug);

        let overrides = cli.overrides();
        assert_eq!(overrides.poll_interval, Some(Duration::from_secs(60)));
        assert_eq!(overrides.threads_limit, Some(4));
        assert_eq!(overrides.scheduler_mode, Some(SchedulerMode::Barrier));
    }

    #[test]
    fn test_rejects_unknown_values() {
        assert!(Cli::try_parse_from(["imgflow", "scale", "--log-level", "loud"]).is_err());
        assert!(Cli::try_parse_from(["imgflow", "scale", "--frequency", "soon"]).is_err());
        assert!(Cli::try_parse_from(["imgflow"]).is_err());
    }
}
