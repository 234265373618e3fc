// src/exec/task_runner.rs

//! Build command process runner.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::exec::backend::{RunOutcome, StartedRun};
use crate::types::RunStatus;

/// Stdout lines of this shape export a build variable.
const SET_VARIABLE_PATTERN: &str = r"^::set-variable\s+([A-Za-z_][A-Za-z0-9_]*)=(.*)$";

/// How long stdout may stay open after the build process exited.
const STDOUT_DRAIN: Duration = Duration::from_millis(500);

/// Run `cmd` for `run` and turn the exit status into a build result.
///
/// - Parameters are exported as environment variables, together with
///   `JOB_NAME` and `BUILD_NUMBER`.
/// - `::set-variable NAME=value` lines on stdout become build variables.
/// - If the run's interrupt fires, the child process is killed and the run
///   ends with the interrupt's status and no captured variables.
pub async fn run_command(run: &StartedRun, cmd: &str) -> RunOutcome {
    match run_command_inner(run, cmd).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(run = %run.id, error = %err, "build command error");
            RunOutcome::with_status(RunStatus::Failure)
        }
    }
}

async fn run_command_inner(run: &StartedRun, cmd: &str) -> Result<RunOutcome> {
    info!(run = %run.id, %cmd, "starting build process");

    let set_variable = Regex::new(SET_VARIABLE_PATTERN).context("compiling set-variable pattern")?;

    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };

    command
        .env("JOB_NAME", &run.job.full_name)
        .env("BUILD_NUMBER", run.id.number.to_string());
    for param in run.parameters.iter() {
        command.env(&param.name, param.value.as_text());
    }

    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning process for build {}", run.id))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let run_label = run.id.to_string();
    let variables: Arc<Mutex<BTreeMap<String, String>>> = Arc::default();
    let sink = Arc::clone(&variables);
    let mut reader = tokio::spawn(async move {
        let Some(stdout) = stdout else {
            return;
        };
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match set_variable.captures(&line) {
                Some(caps) => {
                    debug!(run = %run_label, variable = &caps[1], "captured build variable");
                    sink.lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .insert(caps[1].to_string(), caps[2].to_string());
                }
                None => debug!(run = %run_label, "stdout: {}", line),
            }
        }
    });

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = stderr {
        let run_label = run.id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(run = %run_label, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        exit = child.wait() => {
            let exit = exit.with_context(|| format!("waiting for process of build {}", run.id))?;
            let code = exit.code().unwrap_or(-1);
            info!(run = %run.id, exit_code = code, success = exit.success(), "build process exited");
            let status = if exit.success() {
                RunStatus::Success
            } else {
                RunStatus::Failure
            };
            // A backgrounded grandchild may keep stdout open past the exit.
            match tokio::time::timeout(STDOUT_DRAIN, &mut reader).await {
                Ok(Err(e)) => warn!(run = %run.id, error = %e, "stdout reader task failed"),
                Ok(Ok(())) => {}
                Err(_) => {
                    debug!(run = %run.id, "stdout still open after exit; no longer reading it");
                    reader.abort();
                }
            }
            let variables = std::mem::take(
                &mut *variables.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
            );
            Ok(RunOutcome { status, variables })
        }

        cause = run.interrupt.interrupted() => {
            info!(run = %run.id, reason = %cause.reason, "build interrupted; killing process");
            if let Err(e) = child.kill().await {
                warn!(run = %run.id, error = %e, "failed to kill build process on interrupt");
            }
            // Grandchildren may still hold stdout open.
            reader.abort();
            Ok(RunOutcome::with_status(cause.status))
        }
    }
}
