//! Launch payload construction.
//!
//! The worker receives a single JSON document on stdin. Protocol output must
//! be printed between two sentinel lines that are unique per execution, so
//! anything the worker's dependencies print to stdout can be told apart from
//! protocol records. The markers are carried both in the document and in
//! the environment, where a worker wrapper can pick them up before it parses
//! any input.

use std::path::Path;

use serde::Serialize;
use uuid::Uuid;

use crate::policy::ToolPolicy;
use crate::{AppError, Result};

/// Environment variable carrying the start marker.
pub const START_MARKER_ENV: &str = "AGENT_PROTOCOL_START";
/// Environment variable carrying the end marker.
pub const END_MARKER_ENV: &str = "AGENT_PROTOCOL_END";
/// Environment variable carrying the model identifier.
pub const MODEL_ENV: &str = "AGENT_MODEL";
/// Environment variable carrying the session being resumed, if any.
pub const RESUME_ENV: &str = "AGENT_RESUME_SESSION";

/// Launch document format version.
pub const PAYLOAD_VERSION: u32 = 1;

const START_PREFIX: &str = "<<<AGENT-PROTOCOL-BEGIN ";
const END_PREFIX: &str = "<<<AGENT-PROTOCOL-END ";
const MARKER_SUFFIX: &str = ">>>";

/// Start/end sentinel lines delimiting protocol output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Markers {
    /// Printed on its own line before the first protocol record.
    pub start: String,
    /// Printed on its own line after the last protocol record.
    pub end: String,
}

impl Markers {
    /// Fresh markers tagged with a random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self::with_tag(&Uuid::new_v4().simple().to_string())
    }

    /// Markers for a known tag.
    #[must_use]
    pub fn with_tag(tag: &str) -> Self {
        Self {
            start: format!("{START_PREFIX}{tag}{MARKER_SUFFIX}"),
            end: format!("{END_PREFIX}{tag}{MARKER_SUFFIX}"),
        }
    }

    /// Recover the markers used in a captured transcript from its first
    /// start marker.
    #[must_use]
    pub fn detect(raw: &str) -> Option<Self> {
        let begin = raw.find(START_PREFIX)? + START_PREFIX.len();
        let len = raw[begin..].find(MARKER_SUFFIX)?;
        let tag = &raw[begin..begin + len];
        if tag.is_empty() || tag.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self::with_tag(tag))
    }

    /// Surround `body` with the marker lines, as a well-behaved worker would.
    #[must_use]
    pub fn wrap(&self, body: &str) -> String {
        format!("{}\n{body}\n{}\n", self.start, self.end)
    }
}

/// Sanitized inputs for one launch.
#[derive(Debug, Clone, Copy)]
pub struct LaunchInput<'a> {
    /// User prompt.
    pub prompt: &'a str,
    /// Optional system prompt.
    pub system_prompt: Option<&'a str>,
    /// Model identifier.
    pub model: &'a str,
    /// Validated working directory.
    pub working_dir: &'a Path,
    /// Resolved tool policy.
    pub tools: &'a ToolPolicy,
    /// Session to resume.
    pub resume: Option<&'a str>,
}

/// Everything handed to the worker process at spawn time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPayload {
    /// Newline-terminated JSON document written to the worker's stdin.
    pub stdin: String,
    /// Variables injected into the worker's environment.
    pub env: Vec<(String, String)>,
    /// Sentinel lines the worker was told to print.
    pub markers: Markers,
}

#[derive(Serialize)]
struct LaunchDocument<'a> {
    version: u32,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
    model: &'a str,
    working_dir: &'a str,
    allowed_tools: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    resume: Option<&'a str>,
    framing: &'a Markers,
}

/// Build the launch payload for `input`, framing protocol output with `markers`.
///
/// # Errors
///
/// Returns `AppError::Encoding` if the working directory is not valid
/// UTF-8, a value destined for the environment contains a NUL byte, or the
/// document cannot be serialized.
pub fn build(input: &LaunchInput<'_>, markers: Markers) -> Result<LaunchPayload> {
    let working_dir = input.working_dir.to_str().ok_or_else(|| {
        AppError::Encoding(format!(
            "working directory {} is not valid UTF-8",
            input.working_dir.display()
        ))
    })?;

    let mut env = vec![
        (START_MARKER_ENV.to_owned(), markers.start.clone()),
        (END_MARKER_ENV.to_owned(), markers.end.clone()),
        (MODEL_ENV.to_owned(), input.model.to_owned()),
    ];
    if let Some(resume) = input.resume {
        env.push((RESUME_ENV.to_owned(), resume.to_owned()));
    }
    if let Some((key, _)) = env.iter().find(|(_, value)| value.contains('\0')) {
        return Err(AppError::Encoding(format!(
            "{key} contains a NUL byte and cannot be passed through the environment"
        )));
    }

    let document = LaunchDocument {
        version: PAYLOAD_VERSION,
        prompt: input.prompt,
        system_prompt: input.system_prompt,
        model: input.model,
        working_dir,
        allowed_tools: input.tools.tools(),
        resume: input.resume,
        framing: &markers,
    };
    let mut stdin = serde_json::to_string(&document)
        .map_err(|err| AppError::Encoding(format!("cannot serialize launch document: {err}")))?;
    stdin.push('\n');

    Ok(LaunchPayload {
        stdin,
        env,
        markers,
    })
}
