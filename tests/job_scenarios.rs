mod common;
use crate::common::{SharedSink, init_tracing, quick_engine};

use std::error::Error;
use std::fs;

use cmdrun::exec::{CmdJob, JobEnd, JobOptions, JobState, run};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn echo_hello_is_captured() -> TestResult {
    init_tracing();

    let result = run("echo hello", JobOptions::default(), &quick_engine()).await;

    assert_eq!(result.exit_status, Some(0));
    assert_eq!(result.stdout.as_deref(), Some(&b"hello\n"[..]));
    assert_eq!(result.stderr.as_deref(), Some(&b""[..]));
    assert!(!result.timed_out);
    assert_eq!(result.end, Some(JobEnd::Exited));
    assert!(result.success());
    Ok(())
}

#[tokio::test]
async fn real_exit_code_and_stderr_are_reported() -> TestResult {
    init_tracing();

    let result = run(
        "echo oops >&2; exit 7",
        JobOptions::new().timeout(std::time::Duration::from_secs(10)),
        &quick_engine(),
    )
    .await;

    assert_eq!(result.exit_status, Some(7));
    assert_eq!(result.stderr_lossy(), "oops\n");
    assert!(!result.timed_out);
    assert!(!result.success());
    Ok(())
}

#[tokio::test]
async fn shell_pipes_and_locale_are_honoured() -> TestResult {
    init_tracing();

    let result = run(
        "printf 'b\\na\\n' | sort; echo \"$LANG\"",
        JobOptions::default(),
        &quick_engine(),
    )
    .await;

    assert_eq!(result.stdout_lossy(), "a\nb\nen_US.UTF-8\n");
    Ok(())
}

#[tokio::test]
async fn default_shell_understands_bash_syntax() -> TestResult {
    init_tracing();

    let result = run(
        "set -o pipefail; [[ 2 -gt 1 ]] && echo {1..3}",
        JobOptions::default(),
        &quick_engine(),
    )
    .await;

    assert_eq!(result.exit_status, Some(0));
    assert_eq!(result.stdout_lossy(), "1 2 3\n");
    Ok(())
}

#[tokio::test]
async fn stdin_payload_crosses_chunk_boundaries() -> TestResult {
    init_tracing();

    let payload = "A".repeat(1500);
    let result = run("cat", JobOptions::new().stdin(payload.clone()), &quick_engine()).await;

    assert_eq!(result.exit_status, Some(0));
    assert_eq!(result.stdout.as_deref(), Some(payload.as_bytes()));
    Ok(())
}

#[tokio::test]
async fn large_stdin_does_not_deadlock_against_output() -> TestResult {
    init_tracing();

    // Much larger than a pipe buffer in both directions.
    let payload: String = (0..200_000).map(|i| (b'a' + (i % 26) as u8) as char).collect();
    let result = run("cat", JobOptions::new().stdin(payload.clone()), &quick_engine()).await;

    assert_eq!(result.exit_status, Some(0));
    assert_eq!(result.stdout.as_ref().map(Vec::len), Some(payload.len()));
    assert_eq!(result.stdout.as_deref(), Some(payload.as_bytes()));
    Ok(())
}

#[tokio::test]
async fn command_ignoring_stdin_still_completes() -> TestResult {
    init_tracing();

    let payload = "x".repeat(300_000);
    let result = run("echo done", JobOptions::new().stdin(payload), &quick_engine()).await;

    assert_eq!(result.exit_status, Some(0));
    assert_eq!(result.stdout_lossy(), "done\n");
    Ok(())
}

#[tokio::test]
async fn tee_receives_exactly_the_captured_bytes() -> TestResult {
    init_tracing();

    let out_sink = SharedSink::default();
    let err_sink = SharedSink::default();
    let options = JobOptions::new()
        .tee_stdout(out_sink.clone())
        .tee_stderr(err_sink.clone());

    let script = "i=0; while [ $i -lt 300 ]; do echo \"line $i\"; echo \"err $i\" >&2; i=$((i+1)); done";
    let result = run(script, options, &quick_engine()).await;

    assert_eq!(result.exit_status, Some(0));
    let stdout = result.stdout.clone().unwrap_or_default();
    let stderr = result.stderr.clone().unwrap_or_default();
    assert_eq!(out_sink.bytes(), stdout);
    assert_eq!(err_sink.bytes(), stderr);
    assert!(result.stdout_lossy().starts_with("line 0\nline 1\n"));
    assert!(result.stdout_lossy().ends_with("line 299\n"));
    assert!(result.stderr_lossy().ends_with("err 299\n"));
    Ok(())
}

#[tokio::test]
async fn reads_never_exceed_the_read_chunk() -> TestResult {
    init_tracing();

    let sink = SharedSink::default();
    let result = run(
        "head -c 10000 /dev/zero",
        JobOptions::new().tee_stdout(sink.clone()),
        &quick_engine(),
    )
    .await;

    assert_eq!(result.stdout.as_ref().map(Vec::len), Some(10_000));
    assert!(sink.chunk_count() >= 10);
    Ok(())
}

#[tokio::test]
async fn flush_tee_flushes_the_stream_that_was_read() -> TestResult {
    init_tracing();

    let out_sink = SharedSink::default();
    let err_sink = SharedSink::default();
    let options = JobOptions::new()
        .tee_stdout(out_sink.clone())
        .tee_stderr(err_sink.clone())
        .flush_tee(true);

    let result = run("echo only-stdout", options, &quick_engine()).await;

    assert_eq!(result.exit_status, Some(0));
    // One flush per forwarded chunk plus the final flush.
    assert!(out_sink.flush_count() >= 2);
    // stderr produced nothing, so it only sees the final flush.
    assert_eq!(err_sink.flush_count(), 1);
    Ok(())
}

#[tokio::test]
async fn disabled_capture_still_tees() -> TestResult {
    init_tracing();

    let sink = SharedSink::default();
    let options = JobOptions::new()
        .capture_stdout(false)
        .capture_stderr(false)
        .tee_stdout(sink.clone());

    let result = run("echo streamed; echo hidden >&2", options, &quick_engine()).await;

    assert_eq!(result.stdout, None);
    assert_eq!(result.stderr, None);
    assert_eq!(sink.bytes(), b"streamed\n");
    Ok(())
}

#[tokio::test]
async fn output_written_right_before_exit_is_not_lost() -> TestResult {
    init_tracing();

    let result = run(
        "head -c 100000 /dev/zero; echo tail >&2",
        JobOptions::default(),
        &quick_engine(),
    )
    .await;

    assert_eq!(result.stdout.as_ref().map(Vec::len), Some(100_000));
    assert_eq!(result.stderr_lossy(), "tail\n");
    Ok(())
}

#[tokio::test]
async fn run_to_completion_is_idempotent() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("runs");
    let cmd = format!("echo run >> '{}'; echo out", marker.display());

    let mut job = CmdJob::new(cmd, JobOptions::default(), quick_engine());
    let first = job.run_to_completion().await.clone();
    let second = job.run_to_completion().await.clone();

    assert_eq!(first, second);
    assert_eq!(job.state(), JobState::Final);
    assert_eq!(fs::read_to_string(&marker)?, "run\n");
    assert!(job.start().is_err());
    Ok(())
}
