//! Engine configuration parsing and validation.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Worker executable settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Worker binary (e.g., `agent-worker`, `python3`).
    pub program: String,
    /// Arguments passed to the worker before anything else.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variable names inherited by the worker on top of
    /// the built-in allow-list.
    #[serde(default)]
    pub env_passthrough: Vec<String>,
}

/// Timeout values governing one execution.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Maximum silence between two output lines.
    #[serde(default = "default_message_seconds")]
    pub message_seconds: u64,
    /// Maximum total wall-clock time of one execution.
    #[serde(default = "default_session_seconds")]
    pub session_seconds: u64,
    /// Time between the termination signal and the forced kill.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
    /// Upper bound on how long a single read may block before the stop
    /// check is polled again.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl TimeoutConfig {
    /// Sliding per-read timeout.
    #[must_use]
    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_seconds)
    }

    /// Absolute per-execution timeout.
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_seconds)
    }

    /// Grace period between SIGTERM and SIGKILL.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_seconds)
    }

    /// Stop-check polling interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            message_seconds: default_message_seconds(),
            session_seconds: default_session_seconds(),
            grace_seconds: default_grace_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_message_seconds() -> u64 {
    300
}

fn default_session_seconds() -> u64 {
    3600
}

fn default_grace_seconds() -> u64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    250
}

/// Capability lists from the config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolsConfig {
    /// Allowed tools; empty means "fall through to the built-in default".
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Tools always removed from the allowed set.
    #[serde(default)]
    pub disallowed: Vec<String>,
}

/// Session store layout.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionStoreConfig {
    /// Directories whose immediate children are project directories.
    #[serde(default = "default_session_roots")]
    pub roots: Vec<PathBuf>,
    /// Transcript file extension, without the dot.
    #[serde(default = "default_session_extension")]
    pub extension: String,
    /// Upper bound on project directories inspected per root.
    #[serde(default = "default_max_projects")]
    pub max_projects: usize,
    /// Known project directory names and the working directory they encode.
    #[serde(default)]
    pub mappings: HashMap<String, PathBuf>,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            roots: default_session_roots(),
            extension: default_session_extension(),
            max_projects: default_max_projects(),
            mappings: HashMap::new(),
        }
    }
}

fn default_session_roots() -> Vec<PathBuf> {
    env::var_os("HOME")
        .map(|home| vec![PathBuf::from(home).join(".claude").join("projects")])
        .unwrap_or_default()
}

fn default_session_extension() -> String {
    "jsonl".into()
}

fn default_max_projects() -> usize {
    2000
}

/// Resource limits applied to worker output.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LimitsConfig {
    /// Longest accepted stdout line; longer lines are discarded.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Bytes of stderr kept for failure reports.
    #[serde(default = "default_stderr_tail_bytes")]
    pub stderr_tail_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
            stderr_tail_bytes: default_stderr_tail_bytes(),
        }
    }
}

fn default_max_line_bytes() -> usize {
    1_048_576
}

fn default_stderr_tail_bytes() -> usize {
    8192
}

/// Engine configuration parsed from `agent-runner.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Base directories a worker may run in. Canonicalized on load.
    pub allowed_base_dirs: Vec<PathBuf>,
    /// Worker executable settings.
    pub worker: WorkerConfig,
    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Capability lists.
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Session store layout.
    #[serde(default)]
    pub sessions: SessionStoreConfig,
    /// Output limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.worker.program.trim().is_empty() {
            return Err(AppError::Config("worker.program must not be empty".into()));
        }

        if self.allowed_base_dirs.is_empty() {
            return Err(AppError::Config(
                "allowed_base_dirs must not be empty".into(),
            ));
        }

        if self.timeouts.message_seconds == 0 || self.timeouts.session_seconds == 0 {
            return Err(AppError::Config(
                "message and session timeouts must be greater than zero".into(),
            ));
        }

        if self.timeouts.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }

        if self.limits.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }

        let mut canonical = Vec::with_capacity(self.allowed_base_dirs.len());
        for dir in &self.allowed_base_dirs {
            let resolved = dir.canonicalize().map_err(|err| {
                AppError::Config(format!(
                    "allowed base dir {} invalid: {err}",
                    dir.display()
                ))
            })?;
            canonical.push(resolved);
        }
        self.allowed_base_dirs = canonical;

        for root in &self.sessions.roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "session store root does not exist yet");
            }
        }

        Ok(())
    }
}
