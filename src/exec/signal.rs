// src/exec/signal.rs

//! Signal escalation: send progressively harsher signals until a process
//! dies, checking liveness a bounded number of times after each one.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::exec::liveness::process_is_alive;

/// Which signals to send and how long to wait for each to take effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
    /// Sent in order, e.g. `SIGTERM` then `SIGKILL`.
    pub signals: Vec<Signal>,
    /// Liveness checks after each signal.
    pub retries: u32,
    /// Wait between liveness checks.
    pub retry_delay: Duration,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            signals: vec![Signal::SIGTERM, Signal::SIGKILL],
            retries: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// How an escalation against an owned child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// The child had already exited; no signal was sent.
    AlreadyExited(ExitStatus),
    /// The child died after `signal` was sent.
    Terminated { status: ExitStatus, signal: Signal },
    /// Every signal was sent and the child is still alive.
    Exhausted,
}

/// Escalate against a child we own, reaping it as soon as it dies.
///
/// Each liveness check waits at most `retry_delay` for the child to exit, so
/// a cooperative child is reaped without sleeping the full delay.
pub async fn escalate(child: &mut Child, policy: &EscalationPolicy) -> io::Result<Escalation> {
    if let Some(status) = child.try_wait()? {
        return Ok(Escalation::AlreadyExited(status));
    }

    let Some(raw_pid) = child.id() else {
        // Already reaped by an earlier wait; this returns the cached status.
        let status = child.wait().await?;
        return Ok(Escalation::AlreadyExited(status));
    };
    let pid = Pid::from_raw(raw_pid as i32);

    for &signal in &policy.signals {
        send_signal(pid, signal);

        for attempt in 1..=policy.retries.max(1) {
            if let Ok(status) = timeout(policy.retry_delay, child.wait()).await {
                let status = status?;
                debug!(%pid, ?signal, attempt, "process terminated");
                return Ok(Escalation::Terminated { status, signal });
            }
            debug!(%pid, ?signal, attempt, "process still alive after signal");
        }
    }

    warn!(
        %pid,
        signals = ?policy.signals,
        retries = policy.retries,
        "process survived every signal; manual intervention required"
    );
    Ok(Escalation::Exhausted)
}

/// Send `signal` to a pid we do not own and wait for it to disappear.
///
/// Returns true if the process was observed dead within the retry budget.
/// Non-positive pids name process groups or every process and are refused.
pub async fn send_signal_to_pid(pid: Pid, signal: Signal, policy: &EscalationPolicy) -> bool {
    if !is_single_process(pid) {
        warn!(%pid, "refusing to signal a non-positive pid");
        return false;
    }
    send_signal(pid, signal);

    for attempt in 1..=policy.retries.max(1) {
        match process_is_alive(pid) {
            Ok(false) => return true,
            Ok(true) => {}
            Err(e) => {
                warn!(%pid, error = %e, "liveness check failed");
            }
        }
        debug!(%pid, ?signal, attempt, "process still alive after signal");
        sleep(policy.retry_delay).await;
    }

    false
}

/// Escalate against a bare pid. Returns true once the process is gone.
///
/// Only positive pids are accepted; anything else returns false untouched.
pub async fn terminate_pid(pid: Pid, policy: &EscalationPolicy) -> bool {
    if !is_single_process(pid) {
        warn!(%pid, "refusing to signal a non-positive pid");
        return false;
    }
    if matches!(process_is_alive(pid), Ok(false)) {
        debug!(%pid, "process already gone");
        return true;
    }

    for &signal in &policy.signals {
        if send_signal_to_pid(pid, signal, policy).await {
            return true;
        }
    }

    warn!(%pid, "process survived every signal; manual intervention required");
    false
}

fn is_single_process(pid: Pid) -> bool {
    pid.as_raw() > 0
}

/// `kill(2)`, tolerating a process that already died.
fn send_signal(pid: Pid, signal: Signal) {
    match kill(pid, signal) {
        Ok(()) => debug!(%pid, ?signal, "signal sent"),
        Err(Errno::ESRCH) => debug!(%pid, ?signal, "process already gone"),
        Err(e) => warn!(%pid, ?signal, error = %e, "failed to send signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Stdio;
    use tokio::process::Command;

    fn fast_policy(signals: Vec<Signal>) -> EscalationPolicy {
        EscalationPolicy {
            signals,
            retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }

    fn spawn(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sh")
    }

    #[tokio::test]
    async fn exited_child_is_not_signalled() {
        let mut child = spawn("exit 4");
        child.wait().await.expect("wait");

        let outcome = escalate(&mut child, &EscalationPolicy::default())
            .await
            .expect("escalate");
        match outcome {
            Escalation::AlreadyExited(status) => assert_eq!(status.code(), Some(4)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sigterm_is_enough_for_a_cooperative_child() {
        let mut child = spawn("exec sleep 30");

        let outcome = escalate(&mut child, &fast_policy(vec![Signal::SIGTERM, Signal::SIGKILL]))
            .await
            .expect("escalate");
        match outcome {
            Escalation::Terminated { status, signal } => {
                assert_eq!(signal, Signal::SIGTERM);
                assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ignored_sigterm_escalates_to_sigkill() {
        let mut child = spawn("trap '' TERM; while :; do sleep 0.1; done");
        // Give the shell time to install its trap.
        sleep(Duration::from_millis(200)).await;

        let outcome = escalate(&mut child, &fast_policy(vec![Signal::SIGTERM, Signal::SIGKILL]))
            .await
            .expect("escalate");
        assert!(matches!(
            outcome,
            Escalation::Terminated {
                signal: Signal::SIGKILL,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn exhausted_when_no_signal_kills() {
        let mut child = spawn("trap '' TERM; while :; do sleep 0.1; done");
        sleep(Duration::from_millis(200)).await;

        let policy = EscalationPolicy {
            signals: vec![Signal::SIGTERM],
            retries: 2,
            retry_delay: Duration::from_millis(100),
        };
        let outcome = escalate(&mut child, &policy).await.expect("escalate");
        assert_eq!(outcome, Escalation::Exhausted);

        child.kill().await.expect("cleanup kill");
    }

    #[tokio::test]
    async fn zero_retries_still_waits_once_per_signal() {
        let mut child = spawn("exec sleep 30");
        let policy = EscalationPolicy {
            signals: vec![Signal::SIGKILL],
            retries: 0,
            retry_delay: Duration::from_millis(500),
        };

        let outcome = escalate(&mut child, &policy).await.expect("escalate");
        assert!(matches!(
            outcome,
            Escalation::Terminated {
                signal: Signal::SIGKILL,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn non_positive_pids_are_refused() {
        let policy = fast_policy(vec![Signal::SIGTERM]);
        for raw in [0, -1, -42] {
            let pid = Pid::from_raw(raw);
            assert!(!terminate_pid(pid, &policy).await, "pid {raw}");
            assert!(!send_signal_to_pid(pid, Signal::SIGTERM, &policy).await, "pid {raw}");
        }
    }

    #[tokio::test]
    async fn terminate_pid_stops_a_foreign_process() {
        let mut std_child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = Pid::from_raw(std_child.id() as i32);

        // The zombie left behind counts as dead.
        assert!(terminate_pid(pid, &fast_policy(vec![Signal::SIGTERM])).await);
        std_child.wait().expect("reap sleep");
    }
}
