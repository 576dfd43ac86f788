// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::exec::EngineConfig;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// shell = "bash"
/// poll_interval = "1s"
///
/// [escalation]
/// signals = ["SIGTERM", "SIGKILL"]
/// retries = 5
/// retry_delay = "1s"
///
/// [[job]]
/// name = "hello"
/// cmd = "echo hello"
/// timeout = "5s"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Engine tuning from `[engine]`.
    #[serde(default)]
    pub engine: EngineSection,

    /// Termination policy from `[escalation]`.
    #[serde(default)]
    pub escalation: EscalationSection,

    /// All jobs from `[[job]]`, in file order.
    #[serde(default)]
    pub job: Vec<JobConfig>,
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Shell used to interpret command lines (`<shell> -c <cmd>`).
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Value forced into `LANG` for every child.
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Upper bound on one readiness wait; also the timeout/cancel granularity.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// How long the final drain waits for more bytes before giving up on a
    /// stream that has not reached EOF.
    #[serde(default = "default_drain_idle")]
    pub drain_idle: String,

    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,

    #[serde(default = "default_write_chunk")]
    pub write_chunk: usize,
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_locale() -> String {
    "en_US.UTF-8".to_string()
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

fn default_drain_idle() -> String {
    "50ms".to_string()
}

fn default_read_chunk() -> usize {
    1024
}

fn default_write_chunk() -> usize {
    512
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            locale: default_locale(),
            poll_interval: default_poll_interval(),
            drain_idle: default_drain_idle(),
            read_chunk: default_read_chunk(),
            write_chunk: default_write_chunk(),
        }
    }
}

/// `[escalation]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationSection {
    /// Signal names sent in order, e.g. `["SIGTERM", "SIGKILL"]`.
    #[serde(default = "default_signals")]
    pub signals: Vec<String>,

    /// Liveness checks after each signal.
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,
}

fn default_signals() -> Vec<String> {
    vec!["SIGTERM".to_string(), "SIGKILL".to_string()]
}

fn default_retries() -> u32 {
    5
}

fn default_retry_delay() -> String {
    "1s".to_string()
}

impl Default for EscalationSection {
    fn default() -> Self {
        Self {
            signals: default_signals(),
            retries: default_retries(),
            retry_delay: default_retry_delay(),
        }
    }
}

/// One `[[job]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Display name; defaults to `job-<index>`.
    #[serde(default)]
    pub name: Option<String>,

    /// The command line. Kept untyped so that a non-string value turns into
    /// an input-error result for that job instead of rejecting the file.
    pub cmd: toml::Value,

    /// Optional wall-clock limit, e.g. `"30s"`.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Text written to the child's stdin, then closed.
    #[serde(default)]
    pub stdin: Option<String>,

    #[serde(default = "default_true")]
    pub capture_stdout: bool,

    #[serde(default = "default_true")]
    pub capture_stderr: bool,

    /// `"-"` for our own stdout, anything else is a file path.
    #[serde(default)]
    pub tee_stdout: Option<String>,

    /// `"-"` for our own stderr, anything else is a file path.
    #[serde(default)]
    pub tee_stderr: Option<String>,

    #[serde(default)]
    pub flush_tee: bool,

    #[serde(default)]
    pub silent: bool,
}

fn default_true() -> bool {
    true
}

/// Where a tee'd stream goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeeTarget {
    /// The matching stream of this process.
    Terminal,
    /// A file, truncated when the job starts.
    File(PathBuf),
}

impl TeeTarget {
    pub fn parse(s: &str) -> Self {
        if s.trim() == "-" {
            TeeTarget::Terminal
        } else {
            TeeTarget::File(PathBuf::from(s))
        }
    }
}

/// A validated `[[job]]` entry.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub cmd: toml::Value,
    pub timeout: Option<Duration>,
    pub stdin: Option<String>,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
    pub tee_stdout: Option<TeeTarget>,
    pub tee_stderr: Option<TeeTarget>,
    pub flush_tee: bool,
    pub silent: bool,
}

/// Validated configuration.
///
/// Construct via `ConfigFile::try_from(raw)` or
/// [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineConfig,
    pub jobs: Vec<JobSpec>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(engine: EngineConfig, jobs: Vec<JobSpec>) -> Self {
        Self { engine, jobs }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            jobs: Vec::new(),
        }
    }
}
