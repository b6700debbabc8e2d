//! Demo jobs compiled into the `procpool` binary.
//!
//! Workers are this same binary, so anything listed here can be scheduled
//! from the command line.

use procpool::{JobOutput, JobRegistry};
use std::time::Duration;

/// A built-in job with its help text.
pub struct Job {
    pub name: &'static str,
    pub usage: &'static str,
    pub about: &'static str,
    run: fn(&[String], &mut JobOutput<'_>) -> i32,
}

pub const JOBS: &[Job] = &[
    Job {
        name: "echo",
        usage: "echo [WORDS...]",
        about: "Print the arguments joined by spaces",
        run: echo,
    },
    Job {
        name: "sleep",
        usage: "sleep MS",
        about: "Sleep for MS milliseconds",
        run: sleep,
    },
    Job {
        name: "lines",
        usage: "lines N",
        about: "Print N numbered lines",
        run: lines,
    },
    Job {
        name: "fail",
        usage: "fail [CODE]",
        about: "Return CODE (default 1) without printing anything else",
        run: fail,
    },
    Job {
        name: "crash",
        usage: "crash",
        about: "Abort the worker process",
        run: crash,
    },
];

/// Registry holding every demo job.
pub fn registry() -> JobRegistry {
    JOBS.iter()
        .fold(JobRegistry::new(), |registry, job| registry.with_job(job.name, job.run))
}

fn parse_number<T: std::str::FromStr>(args: &[String], out: &mut JobOutput<'_>) -> Option<T> {
    let Some(raw) = args.first() else {
        out.print("missing numeric argument");
        return None;
    };
    match raw.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            out.print(format!("not a number: {}", raw));
            None
        }
    }
}

fn echo(args: &[String], out: &mut JobOutput<'_>) -> i32 {
    out.print(args.join(" "));
    0
}

fn sleep(args: &[String], out: &mut JobOutput<'_>) -> i32 {
    let Some(ms) = parse_number::<u64>(args, out) else {
        return 2;
    };
    std::thread::sleep(Duration::from_millis(ms));
    out.print(format!("slept {}ms", ms));
    0
}

fn lines(args: &[String], out: &mut JobOutput<'_>) -> i32 {
    let Some(count) = parse_number::<u32>(args, out) else {
        return 2;
    };
    for i in 1..=count {
        out.print(format!("line {}", i));
    }
    0
}

fn fail(args: &[String], _out: &mut JobOutput<'_>) -> i32 {
    args.first().and_then(|code| code.parse().ok()).unwrap_or(1)
}

fn crash(_args: &[String], _out: &mut JobOutput<'_>) -> i32 {
    std::process::abort()
}
