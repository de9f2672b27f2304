//! Execution request and the caller-supplied hooks it carries.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::Result;

/// Caller-supplied text that may not be valid Unicode yet.
///
/// Chat front-ends hand over text from many sources: UTF-16 buffers with
/// lone surrogates, byte strings with surrogates encoded as 3-byte sequences,
/// or plain Rust strings. Everything is normalized by
/// [`sanitize`](crate::worker::sanitize::sanitize) before transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawText {
    /// Already valid UTF-8.
    Utf8(String),
    /// UTF-16 code units, possibly containing unpaired surrogates.
    Wide(Vec<u16>),
    /// Bytes in a UTF-8 superset (WTF-8 / CESU-8 surrogate encodings allowed).
    Bytes(Vec<u8>),
}

impl From<String> for RawText {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl From<&str> for RawText {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<Vec<u16>> for RawText {
    fn from(value: Vec<u16>) -> Self {
        Self::Wide(value)
    }
}

impl From<Vec<u8>> for RawText {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Pollable cancellation predicate, checked once per read-loop iteration.
#[derive(Clone)]
pub struct StopCheck(Arc<dyn Fn() -> bool + Send + Sync>);

impl StopCheck {
    /// Wrap an arbitrary predicate.
    pub fn new(check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(check))
    }

    /// A check that never requests a stop.
    #[must_use]
    pub fn never() -> Self {
        Self::new(|| false)
    }

    /// Poll the predicate.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        (self.0)()
    }
}

impl From<CancellationToken> for StopCheck {
    fn from(token: CancellationToken) -> Self {
        Self::new(move || token.is_cancelled())
    }
}

impl Default for StopCheck {
    fn default() -> Self {
        Self::never()
    }
}

impl fmt::Debug for StopCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StopCheck")
    }
}

type CleanupFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Hook invoked at most once when an execution times out or is stopped.
pub struct CleanupHook(CleanupFn);

impl CleanupHook {
    /// Wrap a cleanup closure.
    pub fn new(hook: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self(Box::new(hook))
    }

    /// Run the hook. Errors and panics are logged and swallowed.
    pub fn run(self, execution_id: &str) {
        match catch_unwind(AssertUnwindSafe(self.0)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(execution_id, %err, "cleanup callback failed"),
            Err(_) => warn!(execution_id, "cleanup callback panicked"),
        }
    }
}

impl fmt::Debug for CleanupHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CleanupHook")
    }
}

/// Everything needed to run one worker invocation.
#[derive(Debug)]
pub struct ExecutionRequest {
    /// User prompt.
    pub prompt: RawText,
    /// Requested working directory; replaced by the recovered directory
    /// when resuming a session that can be located.
    pub working_dir: PathBuf,
    /// Model identifier handed to the worker.
    pub model: String,
    /// Explicit tool override; `None` or empty falls through to settings.
    pub allowed_tools: Option<Vec<String>>,
    /// Optional system prompt.
    pub system_prompt: Option<RawText>,
    /// Session to resume.
    pub session_id: Option<String>,
    /// Cooperative cancellation predicate.
    pub stop_check: StopCheck,
    /// Abnormal-termination hook.
    pub cleanup: Option<CleanupHook>,
}

impl ExecutionRequest {
    /// Create a request with no override, no resume, and a never-firing stop check.
    pub fn new(
        prompt: impl Into<RawText>,
        working_dir: impl Into<PathBuf>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            model: model.into(),
            allowed_tools: None,
            system_prompt: None,
            session_id: None,
            stop_check: StopCheck::never(),
            cleanup: None,
        }
    }

    /// Override the tool allow-list for this request.
    #[must_use]
    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = Some(tools);
        self
    }

    /// Attach a system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<RawText>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Resume an existing session.
    #[must_use]
    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Install a cancellation predicate.
    #[must_use]
    pub fn with_stop_check(mut self, stop_check: impl Into<StopCheck>) -> Self {
        self.stop_check = stop_check.into();
        self
    }

    /// Install the abnormal-termination hook.
    #[must_use]
    pub fn on_cleanup(mut self, hook: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        self.cleanup = Some(CleanupHook::new(hook));
        self
    }
}
