// src/config/validate.rs

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::Signal;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, EngineSection, EscalationSection, JobConfig, JobSpec, RawConfigFile, TeeTarget,
};
use crate::errors::{CmdrunError, Result};
use crate::exec::{EngineConfig, EscalationPolicy};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = CmdrunError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let escalation = validate_escalation(&raw.escalation)?;
        let engine = validate_engine(&raw.engine, escalation)?;
        let jobs = validate_jobs(&raw.job)?;
        Ok(ConfigFile::new_unchecked(engine, jobs))
    }
}

fn validate_engine(section: &EngineSection, escalation: EscalationPolicy) -> Result<EngineConfig> {
    if section.shell.trim().is_empty() {
        return Err(CmdrunError::ConfigError(
            "[engine].shell must not be empty".to_string(),
        ));
    }

    let poll_interval = duration_field("[engine].poll_interval", &section.poll_interval)?;
    if poll_interval.is_zero() {
        return Err(CmdrunError::ConfigError(
            "[engine].poll_interval must be greater than zero".to_string(),
        ));
    }
    let drain_idle = duration_field("[engine].drain_idle", &section.drain_idle)?;

    if section.read_chunk == 0 {
        return Err(CmdrunError::ConfigError(
            "[engine].read_chunk must be >= 1 (got 0)".to_string(),
        ));
    }
    if section.write_chunk == 0 {
        return Err(CmdrunError::ConfigError(
            "[engine].write_chunk must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(EngineConfig {
        shell: section.shell.clone(),
        locale: section.locale.clone(),
        poll_interval,
        drain_idle,
        read_chunk: section.read_chunk,
        write_chunk: section.write_chunk,
        escalation,
    })
}

fn validate_escalation(section: &EscalationSection) -> Result<EscalationPolicy> {
    if section.signals.is_empty() {
        return Err(CmdrunError::ConfigError(
            "[escalation].signals must name at least one signal".to_string(),
        ));
    }
    if section.retries == 0 {
        return Err(CmdrunError::ConfigError(
            "[escalation].retries must be >= 1 (got 0)".to_string(),
        ));
    }

    let signals = section
        .signals
        .iter()
        .map(|name| {
            Signal::from_str(name.trim()).map_err(|_| {
                CmdrunError::ConfigError(format!("[escalation].signals: unknown signal '{}'", name))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(EscalationPolicy {
        signals,
        retries: section.retries,
        retry_delay: duration_field("[escalation].retry_delay", &section.retry_delay)?,
    })
}

fn validate_jobs(jobs: &[JobConfig]) -> Result<Vec<JobSpec>> {
    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(jobs.len());

    for (idx, job) in jobs.iter().enumerate() {
        let name = job
            .name
            .clone()
            .unwrap_or_else(|| format!("job-{}", idx));

        if !seen.insert(name.clone()) {
            return Err(CmdrunError::ConfigError(format!(
                "duplicate job name '{}' in [[job]]",
                name
            )));
        }

        let timeout = job
            .timeout
            .as_deref()
            .map(|s| duration_field(&format!("job '{}' timeout", name), s))
            .transpose()?;

        specs.push(JobSpec {
            name,
            cmd: job.cmd.clone(),
            timeout,
            stdin: job.stdin.clone(),
            capture_stdout: job.capture_stdout,
            capture_stderr: job.capture_stderr,
            tee_stdout: job.tee_stdout.as_deref().map(TeeTarget::parse),
            tee_stderr: job.tee_stderr.as_deref().map(TeeTarget::parse),
            flush_tee: job.flush_tee,
            silent: job.silent,
        });
    }

    Ok(specs)
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| CmdrunError::ConfigError(format!("{}: {}", field, e)))
}
