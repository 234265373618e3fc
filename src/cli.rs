// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::engine::ParameterValue;
use crate::types::Principal;

/// Command-line arguments for `jobtrigger`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobtrigger",
    version,
    about = "Trigger a job from a catalog and report the downstream result.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the job catalog (TOML).
    ///
    /// Default: `Jobs.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Jobs.toml")]
    pub catalog: String,

    /// Job to trigger, resolved like a top-level reference.
    #[arg(long, value_name = "NAME", required_unless_present = "dry_run")]
    pub job: Option<String>,

    /// Parameter for the triggered build, as `NAME=VALUE`. Repeatable.
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<ParameterValue>,

    /// Return once the build is queued instead of waiting for its result.
    #[arg(long)]
    pub no_wait: bool,

    /// Do not mirror a failed or unstable result onto the exit status.
    #[arg(long)]
    pub no_propagate: bool,

    /// Principal to trigger as (`SYSTEM`, `anonymous` or a user name).
    ///
    /// If omitted, the catalog's `run_as` is used.
    #[arg(long = "as", value_name = "PRINCIPAL")]
    pub principal: Option<Principal>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBTRIGGER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate the catalog, print it, but don't trigger anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_param(raw: &str) -> Result<ParameterValue, String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("parameter '{raw}' must look like NAME=VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("parameter '{raw}' has an empty name"));
    }
    Ok(ParameterValue::new(name, value))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
