use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod demo;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fork a worker, derive a doubled value from an input and follow it.
    Demo(DemoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Demo(args) => demo::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Initial value of the input.
    #[arg(long, default_value_t = 5, allow_negative_numbers = true)]
    pub input: i64,
    /// Value assigned to the input before pulling again.
    #[arg(long, default_value_t = 7, allow_negative_numbers = true)]
    pub update: i64,
    /// How long shutdown waits for the acknowledgement and the exit (e.g. 1s, 500ms).
    #[arg(long, env = "CELLWIRE_QUIT_TIMEOUT", default_value = "1s")]
    pub quit_timeout: String,
    /// Longest wait between worker liveness checks.
    #[arg(long, env = "CELLWIRE_POLL_SLICE", default_value = "210ms")]
    pub poll_slice: String,
    /// How long to wait for the worker to deliver a pulled value.
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Log every protocol message (raises the log level to debug).
    #[arg(long)]
    pub trace_messages: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `150ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
