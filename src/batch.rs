// src/batch.rs

//! Run every `[[job]]` from a config file, each as an independent job on its
//! own Tokio task.

use std::fs::File;
use std::io::Write;

use anyhow::Context;
use tracing::{debug, error, info};

use crate::config::{ConfigFile, JobSpec, TeeTarget};
use crate::errors::Result;
use crate::exec::{CmdJob, CmdResult, JobOptions, StopHandle, job_from_value};

/// Outcome of one batch entry.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub name: String,
    pub result: CmdResult,
}

impl JobReport {
    pub fn success(&self) -> bool {
        self.result.success()
    }
}

enum Prepared {
    Ready(CmdJob),
    /// Resolved before spawning (e.g. a non-string `cmd`).
    Done(CmdResult),
}

/// A set of jobs built from config, ready to run.
pub struct Batch {
    jobs: Vec<(String, Prepared)>,
}

impl Batch {
    /// Build every job, opening tee files up front.
    ///
    /// Fails only if a tee file cannot be created; nothing has been spawned
    /// at that point.
    pub fn prepare(cfg: &ConfigFile) -> Result<Self> {
        let mut jobs = Vec::with_capacity(cfg.jobs.len());

        for spec in &cfg.jobs {
            let options = job_options(spec)?;
            let prepared = match job_from_value(&spec.cmd, options, &cfg.engine) {
                Ok(job) => Prepared::Ready(job),
                Err(result) => Prepared::Done(result),
            };
            jobs.push((spec.name.clone(), prepared));
        }

        Ok(Self { jobs })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Stop handles for every runnable job, e.g. for a Ctrl-C handler.
    pub fn stop_handles(&self) -> Vec<StopHandle> {
        self.jobs
            .iter()
            .filter_map(|(_, prepared)| match prepared {
                Prepared::Ready(job) => Some(job.stop_handle()),
                Prepared::Done(_) => None,
            })
            .collect()
    }

    /// Run all jobs concurrently and collect reports in config order.
    ///
    /// A job that panics is reported with an error; it does not affect the
    /// others.
    pub async fn run(self) -> Vec<JobReport> {
        let mut pending = Vec::with_capacity(self.jobs.len());

        for (name, prepared) in self.jobs {
            match prepared {
                Prepared::Ready(mut job) => {
                    debug!(job = %name, cmd = %job.command(), "spawning batch job");
                    let handle = tokio::spawn(async move {
                        job.run_to_completion().await;
                        job.into_result()
                    });
                    pending.push((name, Ok(handle)));
                }
                Prepared::Done(result) => pending.push((name, Err(result))),
            }
        }

        let mut reports = Vec::with_capacity(pending.len());
        for (name, entry) in pending {
            let result = match entry {
                Ok(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(job = %name, error = %e, "batch job task failed");
                        CmdResult {
                            error: Some(format!("job task failed: {e}")),
                            ..CmdResult::default()
                        }
                    }
                },
                Err(result) => result,
            };

            info!(
                job = %name,
                exit_status = result.exit_status,
                timed_out = result.timed_out,
                "batch job done"
            );
            reports.push(JobReport { name, result });
        }

        reports
    }
}

fn job_options(spec: &JobSpec) -> Result<JobOptions> {
    let mut options = JobOptions::new()
        .capture_stdout(spec.capture_stdout)
        .capture_stderr(spec.capture_stderr)
        .flush_tee(spec.flush_tee)
        .silent(spec.silent);

    options.timeout = spec.timeout;
    options.stdin = spec.stdin.clone();
    options.stdout_tee = spec
        .tee_stdout
        .as_ref()
        .map(|target| open_tee(target, Box::new(std::io::stdout())))
        .transpose()?;
    options.stderr_tee = spec
        .tee_stderr
        .as_ref()
        .map(|target| open_tee(target, Box::new(std::io::stderr())))
        .transpose()?;

    Ok(options)
}

fn open_tee(target: &TeeTarget, terminal: Box<dyn Write + Send>) -> Result<Box<dyn Write + Send>> {
    match target {
        TeeTarget::Terminal => Ok(terminal),
        TeeTarget::File(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating tee file {:?}", path))?;
            Ok(Box::new(file))
        }
    }
}
