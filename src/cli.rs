//! Command-line interface definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use procpool::FailurePolicy;
use procpool::logging::{LogConfig, LogFormat};
use std::path::PathBuf;

/// Run named jobs in a pool of isolated worker processes.
#[derive(Parser, Debug)]
#[command(name = "procpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress everything except errors and job output.
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Log format for stderr.
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormatArg>,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run tasks on a pool of workers.
    Run(RunArgs),

    /// List the jobs workers know about.
    Jobs,
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Tasks to run, each a job name followed by its arguments (e.g. "echo hi").
    pub tasks: Vec<String>,

    /// Read tasks from a file, one per line ("-" for stdin).
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Number of worker processes.
    #[arg(short, long, env = "PROCPOOL_WORKERS", default_value_t = num_cpus())]
    pub workers: usize,

    /// What to do when a worker process dies.
    #[arg(
        long,
        value_enum,
        env = "PROCPOOL_ON_WORKER_FAILURE",
        default_value_t = FailurePolicyArg::Respawn
    )]
    pub on_worker_failure: FailurePolicyArg,

    /// Give up if the pool has not finished after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Failure policy argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicyArg {
    /// Start a replacement worker.
    #[default]
    Respawn,
    /// Leave the slot empty.
    Retire,
    /// Stop and report the failure as an error.
    Escalate,
}

impl From<FailurePolicyArg> for FailurePolicy {
    fn from(arg: FailurePolicyArg) -> Self {
        match arg {
            FailurePolicyArg::Respawn => FailurePolicy::Respawn,
            FailurePolicyArg::Retire => FailurePolicy::Retire,
            FailurePolicyArg::Escalate => FailurePolicy::Escalate,
        }
    }
}

/// Log format argument.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

/// Verbosity level for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Default: warnings, errors and the run summary.
    Normal,
    /// -v: pool lifecycle events.
    Info,
    /// -vv: every dispatch and completion.
    Debug,
}

impl From<u8> for Verbosity {
    fn from(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Info,
            _ => Verbosity::Debug,
        }
    }
}

impl Cli {
    /// Get the verbosity level based on -v flags.
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from(self.verbose)
    }

    /// Logging configuration from flags and environment; flags win.
    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::for_coordinator();
        if self.quiet {
            config = config.with_filter("error".to_string());
        } else {
            match self.verbosity() {
                Verbosity::Normal => {}
                Verbosity::Info => config = config.with_filter("procpool=info".to_string()),
                Verbosity::Debug => config = config.with_filter("procpool=debug".to_string()),
            }
        }

        config = config.with_env_overrides();

        if let Some(format) = self.log_format {
            config = config.with_format(format.into());
        }
        if let Some(path) = &self.log_file {
            config = config.with_file(path.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parsing() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command() {
        let args = Cli::try_parse_from(["procpool", "run", "echo hi", "sleep 10"]).unwrap();
        match args.command {
            Commands::Run(run) => {
                assert_eq!(run.tasks, vec!["echo hi", "sleep 10"]);
                assert!(run.file.is_none());
                assert!(run.timeout.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_options() {
        let args = Cli::try_parse_from([
            "procpool",
            "run",
            "--workers",
            "3",
            "--on-worker-failure",
            "escalate",
            "--timeout",
            "5",
            "--file",
            "tasks.txt",
        ])
        .unwrap();
        match args.command {
            Commands::Run(run) => {
                assert_eq!(run.workers, 3);
                assert_eq!(run.on_worker_failure, FailurePolicyArg::Escalate);
                assert_eq!(run.timeout, Some(5));
                assert_eq!(run.file, Some(PathBuf::from("tasks.txt")));
                assert!(run.tasks.is_empty());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_jobs_command() {
        let args = Cli::try_parse_from(["procpool", "jobs"]).unwrap();
        assert!(matches!(args.command, Commands::Jobs));
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let args = Cli::try_parse_from(["procpool", "jobs", "-vv", "--log-format", "json"]).unwrap();
        assert_eq!(args.verbosity(), Verbosity::Debug);
        assert_eq!(args.log_format, Some(LogFormatArg::Json));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["procpool", "-v", "-q", "jobs"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_log_format() {
        let args = Cli::try_parse_from(["procpool", "--log-format", "compact", "jobs"]).unwrap();
        assert_eq!(args.log_config().format, LogFormat::Compact);
    }

    #[test]
    fn test_failure_policy_conversion() {
        assert_eq!(FailurePolicy::from(FailurePolicyArg::Retire), FailurePolicy::Retire);
        assert_eq!(FailurePolicyArg::default(), FailurePolicyArg::Respawn);
    }
}
