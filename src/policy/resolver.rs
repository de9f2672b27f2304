//! Effective tool allow-list for one execution.
//!
//! Resolution is a pure function of an explicit [`ToolSettings`] snapshot.
//! The snapshot is captured once per execution, so a concurrent change to
//! the process environment never affects a resolution already in progress.

use std::env;

use tracing::debug;

use crate::config::ToolsConfig;

/// Comma-separated allow-list read from the environment.
pub const ALLOWED_TOOLS_ENV: &str = "AGENT_ALLOWED_TOOLS";

/// Comma-separated deny-list read from the environment.
pub const DISALLOWED_TOOLS_ENV: &str = "AGENT_DISALLOWED_TOOLS";

/// Tools granted when no other source names any.
pub const DEFAULT_TOOLS: &[&str] = &[
    "Read",
    "Write",
    "Edit",
    "MultiEdit",
    "Glob",
    "Grep",
    "LS",
    "Bash",
    "WebFetch",
    "WebSearch",
    "TodoWrite",
];

/// Snapshot of every configuration source that feeds tool resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolSettings {
    /// Raw value of [`ALLOWED_TOOLS_ENV`].
    pub env_allowed: Option<String>,
    /// Raw value of [`DISALLOWED_TOOLS_ENV`].
    pub env_disallowed: Option<String>,
    /// `[tools] allowed` from the config file.
    pub file_allowed: Vec<String>,
    /// `[tools] disallowed` from the config file.
    pub file_disallowed: Vec<String>,
}

impl ToolSettings {
    /// Capture the current environment together with the file settings.
    #[must_use]
    pub fn capture(tools: &ToolsConfig) -> Self {
        Self {
            env_allowed: env::var(ALLOWED_TOOLS_ENV).ok(),
            env_disallowed: env::var(DISALLOWED_TOOLS_ENV).ok(),
            file_allowed: tools.allowed.clone(),
            file_disallowed: tools.disallowed.clone(),
        }
    }
}

/// Resolved, ordered, duplicate-free tool list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPolicy {
    tools: Vec<String>,
}

impl ToolPolicy {
    /// Tools in resolution order.
    #[must_use]
    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    /// Whether `tool` is permitted.
    #[must_use]
    pub fn allows(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }
}

/// Compute the tool policy for one execution.
///
/// The allow side comes from the first non-empty source among the explicit
/// `override_tools`, the environment, the config file, and
/// [`DEFAULT_TOOLS`]. The deny side (environment, else config file) is then
/// removed unconditionally.
#[must_use]
pub fn resolve(override_tools: Option<&[String]>, settings: &ToolSettings) -> ToolPolicy {
    let env_allowed = settings.env_allowed.as_deref().map(split_list).unwrap_or_default();
    let file_allowed = normalize(settings.file_allowed.iter().map(String::as_str));
    let explicit = override_tools
        .map(|tools| normalize(tools.iter().map(String::as_str)))
        .unwrap_or_default();

    let (source, allowed) = if !explicit.is_empty() {
        ("override", explicit)
    } else if !env_allowed.is_empty() {
        ("env", env_allowed)
    } else if !file_allowed.is_empty() {
        ("config", file_allowed)
    } else {
        ("default", normalize(DEFAULT_TOOLS.iter().copied()))
    };

    let env_denied = settings.env_disallowed.as_deref().map(split_list).unwrap_or_default();
    let denied = if env_denied.is_empty() {
        normalize(settings.file_disallowed.iter().map(String::as_str))
    } else {
        env_denied
    };

    let tools: Vec<String> = allowed
        .into_iter()
        .filter(|tool| !denied.contains(tool))
        .collect();

    debug!(source, ?tools, ?denied, "tool policy resolved");
    ToolPolicy { tools }
}

fn split_list(raw: &str) -> Vec<String> {
    normalize(raw.split(','))
}

fn normalize<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items.map(str::trim).filter(|s| !s.is_empty()) {
        if !out.iter().any(|existing| existing == item) {
            out.push(item.to_owned());
        }
    }
    out
}
