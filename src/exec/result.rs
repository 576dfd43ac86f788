// src/exec/result.rs

//! The record a job hands back to its caller.

use std::borrow::Cow;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

/// Exit status reported when the command value was not a string.
pub const STATUS_INVALID_INPUT: i32 = -1;

/// Exit status reported when the shell could not be spawned.
pub const STATUS_SPAWN_FAILED: i32 = -2;

/// Exit status reported when every signal was sent and the process still
/// did not die. Needs an operator.
pub const STATUS_ESCALATION_EXHAUSTED: i32 = -3;

/// Why a job's run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEnd {
    /// The child exited on its own.
    Exited,
    /// The deadline passed first.
    TimedOut,
    /// The cancel predicate returned true.
    Cancelled,
    /// `stop()` or a `StopHandle` asked for termination.
    Stopped,
    /// The command was not a string; nothing was spawned.
    InvalidInput,
    /// The shell could not be spawned.
    SpawnFailed,
}

/// Outcome of one job.
///
/// Fields are only stable once the job's `run_to_completion()` (or `stop()`)
/// has returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CmdResult {
    /// Exit code, `128 + N` for a child killed by signal `N`, or one of the
    /// negative `STATUS_*` sentinels. `None` while the child is running.
    pub exit_status: Option<i32>,
    /// Signal that terminated the child, if any.
    pub signal: Option<i32>,
    /// Captured stdout; `None` when capture was disabled.
    pub stdout: Option<Vec<u8>>,
    /// Captured stderr; `None` when capture was disabled.
    pub stderr: Option<Vec<u8>>,
    pub duration: Duration,
    /// True iff the run loop ended because the deadline passed.
    pub timed_out: bool,
    pub end: Option<JobEnd>,
    /// The escalator ran out of signals without the process dying.
    pub escalation_exhausted: bool,
    /// Reason for a sentinel status.
    pub error: Option<String>,
}

impl CmdResult {
    /// Result for a command value of the wrong type. No process, zero duration.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            exit_status: Some(STATUS_INVALID_INPUT),
            end: Some(JobEnd::InvalidInput),
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Reset to the empty state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// True for a zero exit status.
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.stdout.as_deref().unwrap_or_default())
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.stderr.as_deref().unwrap_or_default())
    }

    pub(crate) fn record_status(&mut self, status: ExitStatus) {
        self.signal = status.signal();
        self.exit_status = Some(exit_code_of(status));
    }
}

/// Map an `ExitStatus` to a shell-style integer code.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => STATUS_ESCALATION_EXHAUSTED,
    }
}
