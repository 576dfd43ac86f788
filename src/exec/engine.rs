// src/exec/engine.rs

use std::time::Duration;

use crate::exec::signal::EscalationPolicy;

/// Settings shared by every job an application runs.
///
/// Built once (from `[engine]` / `[escalation]` or `Default`) and handed to
/// each `CmdJob`; there is no process-wide engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Shell used as `<shell> -c <command>`.
    pub shell: String,
    /// Forced into the child's `LANG`.
    pub locale: String,
    /// Longest single readiness wait. Timeouts, cancellation and stop
    /// requests are noticed no later than one interval after they happen.
    pub poll_interval: Duration,
    /// Silence window after which the final drain gives up on a stream.
    pub drain_idle: Duration,
    /// Largest single read from stdout/stderr.
    pub read_chunk: usize,
    /// Largest single write to stdin; at most `PIPE_BUF` keeps each write atomic.
    pub write_chunk: usize,
    pub escalation: EscalationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            locale: "en_US.UTF-8".to_string(),
            poll_interval: Duration::from_secs(1),
            drain_idle: Duration::from_millis(50),
            read_chunk: 1024,
            write_chunk: 512,
            escalation: EscalationPolicy::default(),
        }
    }
}
