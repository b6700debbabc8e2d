//! procpool - run named jobs in a pool of isolated worker processes

mod cli;
mod jobs;

use anyhow::{Context, Result, bail};
use clap::Parser;
use owo_colors::{
    OwoColorize,
    Stream::{Stderr, Stdout},
};
use procpool::logging::{self, LogConfig};
use procpool::{PoolConfig, ProcessPool, WorkerCommand, is_worker_process, run_worker_main};
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use cli::{Cli, Commands, RunArgs};

fn main() {
    // Workers are this binary started with a sentinel argument
    if is_worker_process(std::env::args_os()) {
        logging::init(LogConfig::for_worker().with_env_overrides());
        run_worker_main(&jobs::registry());
    }

    let cli = Cli::parse();
    logging::init(cli.log_config());

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args),
        Commands::Jobs => {
            cmd_jobs();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Gather tasks from the command line and the task file, in that order.
///
/// Blank lines and lines starting with `#` in the file are skipped.
fn collect_tasks(args: &RunArgs) -> Result<Vec<String>> {
    let mut tasks = args.tasks.clone();

    if let Some(path) = &args.file {
        let text = if path == Path::new("-") {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read tasks from stdin")?;
            text
        } else {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read task file {}", path.display()))?
        };

        tasks.extend(
            text.lines()
                .map(|line| line.trim_end())
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from),
        );
    }

    Ok(tasks)
}

fn cmd_run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let tasks = collect_tasks(args)?;
    if tasks.is_empty() {
        bail!("No tasks given; pass them as arguments or with --file");
    }

    // Workers inherit our stderr; hand them the same filter so -v reaches them
    let command =
        WorkerCommand::default().env("PROCPOOL_LOG", cli.log_config().filter_directive());
    let config = PoolConfig::default()
        .with_workers(args.workers)
        .with_command(command)
        .with_failure_policy(args.on_worker_failure.into());

    let started = Instant::now();
    let pool = ProcessPool::new(config).context("Failed to start worker pool")?;

    let task_count = tasks.len();
    for task in tasks {
        pool.schedule(task);
    }

    let finished = match args.timeout {
        Some(secs) => pool.wait_idle_timeout(Duration::from_secs(secs)),
        None => pool.wait_idle(),
    };
    let stats = pool.stats();
    let failures = pool.take_failures();

    if !cli.quiet {
        for failure in &failures {
            eprintln!(
                "{}: {}",
                "warning".if_supports_color(Stderr, |text| text.yellow()),
                failure
            );
        }
        eprintln!(
            "{} {} of {} task(s) on {} worker(s) in {:.2?}",
            "Finished".if_supports_color(Stderr, |text| text.green()),
            stats.tasks_completed,
            task_count,
            stats.workers,
            started.elapsed()
        );
    }

    finished.context("Pool did not finish cleanly")
}

fn cmd_jobs() {
    for job in jobs::JOBS {
        println!(
            "{:<8} {}",
            job.name.if_supports_color(Stdout, |text| text.bold()),
            job.about
        );
        println!("         usage: {}", job.usage);
    }
}
