// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`job`] owns one child process's lifecycle (`CmdJob`).
//! - [`mux`] multiplexes the child's stdin/stdout/stderr with bounded waits.
//! - [`signal`] escalates termination signals; [`liveness`] checks bare pids.
//! - [`result`] is the record a finished job produces.
//! - [`run`] wraps a job in a single call.

pub mod engine;
pub mod job;
pub mod liveness;
pub mod mux;
pub mod result;
pub mod run;
pub mod signal;

pub use engine::EngineConfig;
pub use job::{CancelPredicate, CmdJob, JobOptions, JobState, StopHandle};
pub use result::{
    CmdResult, JobEnd, STATUS_ESCALATION_EXHAUSTED, STATUS_INVALID_INPUT, STATUS_SPAWN_FAILED,
};
pub use run::{job_from_value, run, run_value};
pub use signal::{Escalation, EscalationPolicy};
