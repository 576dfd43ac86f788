// src/exec/run.rs

//! One-call helpers for callers that just want a result.

use tracing::warn;

use crate::errors::CmdrunError;
use crate::exec::engine::EngineConfig;
use crate::exec::job::{CmdJob, JobOptions};
use crate::exec::result::CmdResult;

/// Run `command` to completion and return its result.
pub async fn run(command: impl Into<String>, options: JobOptions, engine: &EngineConfig) -> CmdResult {
    let mut job = CmdJob::new(command, options, engine.clone());
    job.run_to_completion().await;
    job.into_result()
}

/// Like [`run`], for a command that arrives as an untyped config value.
///
/// Anything but a string yields `STATUS_INVALID_INPUT` without spawning.
pub async fn run_value(command: &toml::Value, options: JobOptions, engine: &EngineConfig) -> CmdResult {
    match job_from_value(command, options, engine) {
        Ok(mut job) => {
            job.run_to_completion().await;
            job.into_result()
        }
        Err(result) => result,
    }
}

/// Build a job from an untyped command value, or the input-error result if
/// the value is not a string.
pub fn job_from_value(
    command: &toml::Value,
    options: JobOptions,
    engine: &EngineConfig,
) -> std::result::Result<CmdJob, CmdResult> {
    match command.as_str() {
        Some(cmd) => Ok(CmdJob::new(cmd, options, engine.clone())),
        None => {
            let err = CmdrunError::InvalidCommand(command.type_str().to_string());
            warn!(error = %err, "refusing to run command");
            Err(CmdResult::invalid_input(err.to_string()))
        }
    }
}
