// src/exec/job.rs

//! Job controller: one child process from spawn to final result.

use std::fmt;
use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::errors::{CmdrunError, Result};
use crate::exec::engine::EngineConfig;
use crate::exec::mux::{OutputChannel, StreamKind, StreamSet};
use crate::exec::result::{
    CmdResult, JobEnd, STATUS_ESCALATION_EXHAUSTED, STATUS_SPAWN_FAILED,
};
use crate::exec::signal::{Escalation, escalate};

/// Log a lifecycle event at `info`, or at `debug` for silent jobs.
macro_rules! lifecycle {
    ($silent:expr, $($arg:tt)+) => {
        if $silent {
            tracing::debug!($($arg)+)
        } else {
            tracing::info!($($arg)+)
        }
    };
}

type ChildStreams = StreamSet<ChildStdout, ChildStderr, ChildStdin>;

/// Polled once per loop iteration; returning true ends the job early.
pub type CancelPredicate = Box<dyn FnMut() -> bool + Send>;

/// Per-job knobs. Everything is optional; the defaults capture both streams
/// and run without a timeout.
pub struct JobOptions {
    pub timeout: Option<Duration>,
    /// Written to the child's stdin in `write_chunk` pieces, then closed.
    /// Without a payload the child's stdin is `/dev/null`.
    pub stdin: Option<String>,
    pub stdout_tee: Option<Box<dyn Write + Send>>,
    pub stderr_tee: Option<Box<dyn Write + Send>>,
    pub cancel: Option<CancelPredicate>,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
    /// Flush a stream's tee after every chunk forwarded to it.
    pub flush_tee: bool,
    /// Demote lifecycle logs to `debug`.
    pub silent: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            stdin: None,
            stdout_tee: None,
            stderr_tee: None,
            cancel: None,
            capture_stdout: true,
            capture_stderr: true,
            flush_tee: false,
            silent: false,
        }
    }
}

impl fmt::Debug for JobOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobOptions")
            .field("timeout", &self.timeout)
            .field("stdin_bytes", &self.stdin.as_ref().map(String::len))
            .field("stdout_tee", &self.stdout_tee.is_some())
            .field("stderr_tee", &self.stderr_tee.is_some())
            .field("cancel", &self.cancel.is_some())
            .field("capture_stdout", &self.capture_stdout)
            .field("capture_stderr", &self.capture_stderr)
            .field("flush_tee", &self.flush_tee)
            .field("silent", &self.silent)
            .finish()
    }
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    pub fn tee_stdout(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stdout_tee = Some(Box::new(sink));
        self
    }

    pub fn tee_stderr(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stderr_tee = Some(Box::new(sink));
        self
    }

    pub fn cancel_when(mut self, predicate: impl FnMut() -> bool + Send + 'static) -> Self {
        self.cancel = Some(Box::new(predicate));
        self
    }

    pub fn capture_stdout(mut self, capture: bool) -> Self {
        self.capture_stdout = capture;
        self
    }

    pub fn capture_stderr(mut self, capture: bool) -> Self {
        self.capture_stderr = capture;
        self
    }

    pub fn flush_tee(mut self, flush: bool) -> Self {
        self.flush_tee = flush;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }
}

/// Lets another task ask a running job to stop.
///
/// The job notices the request between stream operations, escalates, drains
/// and finalizes its result with [`JobEnd::Stopped`].
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    requested: AtomicBool,
    notify: Notify,
}

impl StopHandle {
    pub fn stop(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolves once `stop()` has been called.
    async fn requested(&self) {
        loop {
            // Registered before the flag check so a concurrent stop() is not lost.
            let notified = self.inner.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Started,
    Running,
    Draining,
    Final,
}

/// One managed execution of a shell command line.
pub struct CmdJob {
    command: String,
    engine: EngineConfig,
    timeout: Option<Duration>,
    stdin: Option<String>,
    cancel: Option<CancelPredicate>,
    silent: bool,
    stdout: OutputChannel,
    stderr: OutputChannel,
    stop: StopHandle,

    state: JobState,
    killed: bool,
    start_time: Option<Instant>,
    deadline: Option<Instant>,
    child: Option<Child>,
    streams: Option<ChildStreams>,
    result: CmdResult,
}

impl fmt::Debug for CmdJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmdJob")
            .field("command", &self.command)
            .field("state", &self.state)
            .field("timeout", &self.timeout)
            .field("killed", &self.killed)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl CmdJob {
    pub fn new(command: impl Into<String>, options: JobOptions, engine: EngineConfig) -> Self {
        let JobOptions {
            timeout,
            stdin,
            stdout_tee,
            stderr_tee,
            cancel,
            capture_stdout,
            capture_stderr,
            flush_tee,
            silent,
        } = options;

        Self {
            command: command.into(),
            engine,
            timeout,
            stdin,
            cancel,
            silent,
            stdout: OutputChannel::new(StreamKind::Stdout, capture_stdout, stdout_tee, flush_tee),
            stderr: OutputChannel::new(StreamKind::Stderr, capture_stderr, stderr_tee, flush_tee),
            stop: StopHandle::default(),
            state: JobState::Created,
            killed: false,
            start_time: None,
            deadline: None,
            child: None,
            streams: None,
            result: CmdResult::default(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn started(&self) -> bool {
        self.state != JobState::Created
    }

    /// True once the signal escalator has been invoked for this job.
    pub fn killed(&self) -> bool {
        self.killed
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Pid of the running child, `None` before start and after reaping.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// The result so far; only stable once the job is final.
    pub fn result(&self) -> &CmdResult {
        &self.result
    }

    pub fn into_result(self) -> CmdResult {
        self.result
    }

    /// Spawn the child. Must be called from within a Tokio runtime.
    ///
    /// On error the job stays `Created` and nothing was spawned.
    pub fn start(&mut self) -> Result<()> {
        if self.state != JobState::Created {
            return Err(CmdrunError::AlreadyStarted);
        }

        let mut cmd = Command::new(&self.engine.shell);
        cmd.arg("-c")
            .arg(&self.command)
            .env("LANG", &self.engine.locale)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| CmdrunError::Spawn {
            cmd: self.command.clone(),
            source,
        })?;

        let now = Instant::now();
        self.start_time = Some(now);
        // A timeout too large to represent as an instant never expires.
        self.deadline = self.timeout.and_then(|t| now.checked_add(t));

        let payload = self.stdin.take().map(String::into_bytes).unwrap_or_default();
        self.streams = Some(StreamSet::new(
            child.stdout.take(),
            child.stderr.take(),
            child.stdin.take(),
            payload,
            self.engine.read_chunk,
            self.engine.write_chunk,
        ));

        lifecycle!(
            self.silent,
            cmd = %self.command,
            pid = child.id(),
            timeout_ms = self.timeout.map(|t| t.as_millis() as u64),
            "job started"
        );

        self.child = Some(child);
        self.state = JobState::Started;
        Ok(())
    }

    /// Run the job until it exits, times out, is cancelled or stopped, and
    /// return the final result.
    ///
    /// Starts the job if needed; a spawn failure becomes a result with
    /// `STATUS_SPAWN_FAILED`. Calling this again returns the cached result.
    pub async fn run_to_completion(&mut self) -> &CmdResult {
        match self.state {
            JobState::Final => return &self.result,
            JobState::Created => {
                if let Err(e) = self.start() {
                    warn!(cmd = %self.command, error = %e, "failed to start job");
                    self.result.exit_status = Some(STATUS_SPAWN_FAILED);
                    self.result.end = Some(JobEnd::SpawnFailed);
                    self.result.error = Some(e.to_string());
                    self.state = JobState::Final;
                    return &self.result;
                }
            }
            _ => {}
        }

        let end = self.wait_for_exit().await;
        self.finish(end).await;
        &self.result
    }

    /// Terminate the job now: escalate, drain and finalize.
    ///
    /// A job that never started is finalized without a status. A final job
    /// is left untouched.
    pub async fn stop(&mut self) -> &CmdResult {
        match self.state {
            JobState::Final => return &self.result,
            JobState::Created => {
                self.result.end = Some(JobEnd::Stopped);
                self.state = JobState::Final;
                return &self.result;
            }
            _ => {}
        }

        self.kill().await;
        self.finish(JobEnd::Stopped).await;
        &self.result
    }

    /// Drive the multiplexer until something ends the run.
    ///
    /// Each iteration waits at most `poll_interval` (or the time left before
    /// the deadline), so timeout, stop and cancellation are noticed within
    /// one interval.
    async fn wait_for_exit(&mut self) -> JobEnd {
        self.state = JobState::Running;
        let poll_interval = self.engine.poll_interval;

        let (Some(child), Some(streams)) = (self.child.as_mut(), self.streams.as_mut()) else {
            return JobEnd::Exited;
        };

        loop {
            let now = Instant::now();
            let wait = match self.deadline {
                Some(deadline) if now >= deadline => return JobEnd::TimedOut,
                Some(deadline) => poll_interval.min(deadline - now),
                None => poll_interval,
            };

            tokio::select! {
                biased;

                status = child.wait() => {
                    match status {
                        Ok(status) => self.result.record_status(status),
                        Err(e) => warn!(cmd = %self.command, error = %e, "waiting for child failed"),
                    }
                    return JobEnd::Exited;
                }
                _ = self.stop.requested() => return JobEnd::Stopped,
                events = streams.poll_once(wait, &mut self.stdout, &mut self.stderr) => {
                    trace!(?events, "stream events");
                }
            }

            if let Some(cancel) = self.cancel.as_mut() {
                if cancel() {
                    debug!(cmd = %self.command, "cancel predicate fired");
                    return JobEnd::Cancelled;
                }
            }
        }
    }

    /// Escalate if the child is still alive, drain, and finalize the result.
    async fn finish(&mut self, end: JobEnd) {
        if self.result.exit_status.is_none() {
            self.kill().await;
        }

        self.state = JobState::Draining;
        if let Some(mut streams) = self.streams.take() {
            let drained = streams
                .drain(self.engine.drain_idle, &mut self.stdout, &mut self.stderr)
                .await;
            trace!(bytes = drained, "final drain complete");
        }
        self.stdout.flush_tee();
        self.stderr.flush_tee();

        self.result.stdout = self.stdout.take_capture();
        self.result.stderr = self.stderr.take_capture();
        self.result.duration = self
            .start_time
            .map(|start| start.elapsed())
            .unwrap_or_default();
        self.result.timed_out = end == JobEnd::TimedOut;
        self.result.end = Some(end);
        self.state = JobState::Final;

        lifecycle!(
            self.silent,
            cmd = %self.command,
            exit_status = self.result.exit_status,
            timed_out = self.result.timed_out,
            end = ?end,
            elapsed_ms = self.result.duration.as_millis() as u64,
            "job finished"
        );
    }

    /// Run the signal escalator and record what it reports.
    async fn kill(&mut self) {
        self.killed = true;
        let Some(child) = self.child.as_mut() else {
            return;
        };

        match escalate(child, &self.engine.escalation).await {
            Ok(Escalation::AlreadyExited(status)) => self.result.record_status(status),
            Ok(Escalation::Terminated { status, signal }) => {
                debug!(cmd = %self.command, ?signal, "job terminated by signal");
                self.result.record_status(status);
            }
            Ok(Escalation::Exhausted) => {
                warn!(cmd = %self.command, pid = child.id(), "job could not be terminated");
                self.result.exit_status = Some(STATUS_ESCALATION_EXHAUSTED);
                self.result.escalation_exhausted = true;
                self.result.error = Some("process survived every termination signal".to_string());
            }
            Err(e) => {
                warn!(cmd = %self.command, error = %e, "escalation failed");
                self.result.exit_status = Some(STATUS_ESCALATION_EXHAUSTED);
                self.result.escalation_exhausted = true;
                self.result.error = Some(format!("escalation failed: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_engine() -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_millis(100),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut job = CmdJob::new("true", JobOptions::default(), quick_engine());
        job.start().expect("first start");
        assert_eq!(job.state(), JobState::Started);
        assert!(matches!(job.start(), Err(CmdrunError::AlreadyStarted)));
        job.run_to_completion().await;
    }

    #[tokio::test]
    async fn deadline_only_exists_with_timeout() {
        let mut no_timeout = CmdJob::new("true", JobOptions::default(), quick_engine());
        no_timeout.start().expect("start");
        assert!(no_timeout.deadline().is_none());
        no_timeout.run_to_completion().await;

        let mut with_timeout = CmdJob::new(
            "true",
            JobOptions::new().timeout(Duration::from_secs(5)),
            quick_engine(),
        );
        assert!(with_timeout.deadline().is_none());
        with_timeout.start().expect("start");
        let deadline = with_timeout.deadline().expect("deadline set on start");
        with_timeout.run_to_completion().await;
        assert_eq!(with_timeout.deadline(), Some(deadline));
    }

    #[tokio::test]
    async fn spawn_failure_leaves_nothing_running() {
        let engine = EngineConfig {
            shell: "/nonexistent/shell".to_string(),
            ..quick_engine()
        };
        let mut job = CmdJob::new("echo hi", JobOptions::default(), engine);
        assert!(matches!(job.start(), Err(CmdrunError::Spawn { .. })));
        assert_eq!(job.state(), JobState::Created);

        let result = job.run_to_completion().await.clone();
        assert_eq!(result.exit_status, Some(STATUS_SPAWN_FAILED));
        assert_eq!(result.end, Some(JobEnd::SpawnFailed));
        assert!(!job.killed());
    }

    #[tokio::test]
    async fn stop_before_start_finalizes_empty_result() {
        let mut job = CmdJob::new("sleep 10", JobOptions::default(), quick_engine());
        let result = job.stop().await.clone();
        assert_eq!(result.end, Some(JobEnd::Stopped));
        assert_eq!(result.exit_status, None);
        assert_eq!(job.state(), JobState::Final);
        assert!(job.pid().is_none());
    }

    #[tokio::test]
    async fn natural_exit_does_not_invoke_escalator() {
        let mut job = CmdJob::new("exit 0", JobOptions::default(), quick_engine());
        job.run_to_completion().await;
        assert!(!job.killed());
        assert!(job.result().success());
    }
}
