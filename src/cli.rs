// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `cmdrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cmdrun",
    version,
    about = "Run shell commands with timeouts, output capture and signal escalation.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Defaults to `cmdrun.toml`. Optional for `exec` and `kill`; engine
    /// defaults apply when the file is missing.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CMDRUN_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// Run a single command line and exit with its status.
    Exec(ExecArgs),

    /// Run every `[[job]]` in the config file concurrently.
    Batch {
        /// Parse + validate, print the jobs, but don't execute anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Send the escalation signal sequence to an arbitrary pid.
    Kill {
        /// A single process; process groups are not supported.
        #[arg(value_name = "PID", value_parser = clap::value_parser!(i32).range(1..))]
        pid: i32,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ExecArgs {
    /// Command line, interpreted by the configured shell.
    #[arg(value_name = "CMD")]
    pub cmd: String,

    /// Wall-clock limit, e.g. `30s`, `500ms`, `2m`.
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,

    /// Text to feed to the command's stdin.
    #[arg(long, value_name = "TEXT")]
    pub stdin: Option<String>,

    /// Stream the command's output to our stdout/stderr as it arrives.
    #[arg(long)]
    pub tee: bool,

    /// Flush the tee after every chunk.
    #[arg(long, requires = "tee")]
    pub flush_tee: bool,

    /// Don't keep output in memory (only useful together with `--tee`).
    #[arg(long)]
    pub no_capture: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_accepts_only_positive_pids() {
        let args = CliArgs::try_parse_from(["cmdrun", "kill", "1234"]).expect("valid pid");
        assert!(matches!(args.command, CliCommand::Kill { pid: 1234 }));

        assert!(CliArgs::try_parse_from(["cmdrun", "kill", "0"]).is_err());
        assert!(CliArgs::try_parse_from(["cmdrun", "kill", "--", "-1"]).is_err());
    }

    #[test]
    fn flush_tee_requires_tee() {
        assert!(CliArgs::try_parse_from(["cmdrun", "exec", "--flush-tee", "true"]).is_err());
        let args = CliArgs::try_parse_from(["cmdrun", "exec", "--tee", "--flush-tee", "echo hi"])
            .expect("valid exec");
        match args.command {
            CliCommand::Exec(exec) => {
                assert!(exec.tee && exec.flush_tee);
                assert_eq!(exec.cmd, "echo hi");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
