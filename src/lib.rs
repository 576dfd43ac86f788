// src/lib.rs

#[cfg(not(unix))]
compile_error!("cmdrun relies on POSIX signals and pipes and only supports unix targets");

pub mod batch;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;

use std::io::Write;

use anyhow::{Context, Result, anyhow};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::batch::{Batch, JobReport};
use crate::cli::{CliArgs, CliCommand, ExecArgs};
use crate::config::{
    ConfigFile, default_config_path, load_and_validate, load_or_default, parse_duration,
};
use crate::exec::signal::terminate_pid;
use crate::exec::{CmdJob, CmdResult, JobOptions, StopHandle};

/// High-level entry point used by `main.rs`.
///
/// Returns the process exit code: the child's own status for `exec`, and
/// 0/1 for `batch` and `kill`.
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = args.config.unwrap_or_else(default_config_path);

    match args.command {
        CliCommand::Exec(exec) => {
            let cfg = load_or_default(&config_path)
                .with_context(|| format!("loading config {:?}", config_path))?;
            run_exec(exec, &cfg).await
        }
        CliCommand::Batch { dry_run } => {
            let cfg = load_and_validate(&config_path)
                .with_context(|| format!("loading config {:?}", config_path))?;
            if dry_run {
                print_dry_run(&cfg);
                return Ok(0);
            }
            run_batch(&cfg).await
        }
        CliCommand::Kill { pid } => {
            let cfg = load_or_default(&config_path)
                .with_context(|| format!("loading config {:?}", config_path))?;
            let gone = terminate_pid(Pid::from_raw(pid), &cfg.engine.escalation).await;
            info!(pid, gone, "kill finished");
            Ok(if gone { 0 } else { 1 })
        }
    }
}

async fn run_exec(exec: ExecArgs, cfg: &ConfigFile) -> Result<i32> {
    let mut options = JobOptions::new()
        .capture_stdout(!exec.no_capture)
        .capture_stderr(!exec.no_capture)
        .flush_tee(exec.flush_tee);

    if let Some(ref t) = exec.timeout {
        let timeout = parse_duration(t).map_err(|e| anyhow!("--timeout: {e}"))?;
        options = options.timeout(timeout);
    }
    if let Some(stdin) = exec.stdin {
        options = options.stdin(stdin);
    }
    if exec.tee {
        options = options
            .tee_stdout(std::io::stdout())
            .tee_stderr(std::io::stderr());
    }

    let mut job = CmdJob::new(exec.cmd, options, cfg.engine.clone());
    stop_on_ctrl_c(vec![job.stop_handle()]);

    let result = job.run_to_completion().await;

    if !exec.tee {
        if let Some(ref out) = result.stdout {
            std::io::stdout().write_all(out).context("writing command stdout")?;
        }
        if let Some(ref err) = result.stderr {
            std::io::stderr().write_all(err).context("writing command stderr")?;
        }
    }

    if let Some(ref e) = result.error {
        warn!(error = %e, "command did not complete normally");
    }

    Ok(exit_code_for(result))
}

async fn run_batch(cfg: &ConfigFile) -> Result<i32> {
    let batch = Batch::prepare(cfg).context("preparing batch jobs")?;
    if batch.is_empty() {
        info!("no [[job]] entries; nothing to do");
        return Ok(0);
    }

    stop_on_ctrl_c(batch.stop_handles());

    let reports = batch.run().await;
    for report in &reports {
        println!("{}", summary_line(report));
    }

    let failed = reports.iter().filter(|r| !r.success()).count();
    debug!(jobs = reports.len(), failed, "batch complete");
    Ok(if failed == 0 { 0 } else { 1 })
}

/// Ctrl-C → stop every given job.
fn stop_on_ctrl_c(handles: Vec<StopHandle>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        info!(jobs = handles.len(), "Ctrl+C received; stopping jobs");
        for handle in &handles {
            handle.stop();
        }
    });
}

/// Our own exit code for a finished job: the child's status when it fits in
/// a byte, 1 for sentinels and anything else.
pub fn exit_code_for(result: &CmdResult) -> i32 {
    match result.exit_status {
        Some(code) if (0..=255).contains(&code) => code,
        _ => 1,
    }
}

fn summary_line(report: &JobReport) -> String {
    let r = &report.result;
    let status = r
        .exit_status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string());
    let mut line = format!(
        "{}: exit={} duration={:.3}s timed_out={}",
        report.name,
        status,
        r.duration_secs(),
        r.timed_out
    );
    if let Some(ref e) = r.error {
        line.push_str(&format!(" error={e:?}"));
    }
    line
}

/// Simple dry-run output: print engine settings and jobs.
fn print_dry_run(cfg: &ConfigFile) {
    println!("cmdrun dry-run");
    println!("  engine.shell = {}", cfg.engine.shell);
    println!("  engine.poll_interval = {:?}", cfg.engine.poll_interval);
    println!("  escalation.signals = {:?}", cfg.engine.escalation.signals);
    println!();

    println!("jobs ({}):", cfg.jobs.len());
    for job in &cfg.jobs {
        println!("  - {}", job.name);
        match job.cmd.as_str() {
            Some(cmd) => println!("      cmd: {cmd}"),
            None => println!("      cmd: <invalid: {}>", job.cmd.type_str()),
        }
        if let Some(timeout) = job.timeout {
            println!("      timeout: {timeout:?}");
        }
        if let Some(ref stdin) = job.stdin {
            println!("      stdin: {} bytes", stdin.len());
        }
        if let Some(ref tee) = job.tee_stdout {
            println!("      tee_stdout: {tee:?}");
        }
        if let Some(ref tee) = job.tee_stderr {
            println!("      tee_stderr: {tee:?}");
        }
    }

    debug!("dry-run complete (no execution)");
}
