//! Events yielded by one execution.

use serde::Serialize;
use serde_json::Value;

/// Failure category attached to a terminal [`ExecutionEvent::Error`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Working directory rejected or other invalid setup. Never retried.
    Configuration,
    /// Launch payload not transmittable even after sanitization.
    Encoding,
    /// The OS failed to create the worker process.
    Spawn,
    /// The idle or session deadline elapsed.
    Timeout,
    /// The stop check reported true.
    Cancelled,
    /// Non-zero exit, worker-reported error, or exit without a terminal record.
    WorkerProtocol,
}

/// One item of the lazy event sequence returned by
/// [`Engine::execute`](crate::engine::Engine::execute).
///
/// At most one `Init` precedes everything else, and exactly one of `Done` or
/// `Error` ends the sequence.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Worker announced the session it is running under.
    Init {
        /// Session identifier usable for a later resume.
        session_id: String,
    },
    /// Assistant text output.
    Text {
        /// Text chunk in emission order.
        content: String,
    },
    /// Worker invoked a tool.
    ToolUse {
        /// Tool descriptor exactly as emitted by the worker.
        descriptor: Value,
    },
    /// Successful completion.
    Done {
        /// Final session identifier.
        session_id: Option<String>,
        /// Worker-reported statistics (cost, turns, duration ...).
        stats: Value,
    },
    /// Unsuccessful completion.
    Error {
        /// Failure category.
        kind: ErrorKind,
        /// Human-readable description.
        message: String,
    },
}

impl ExecutionEvent {
    /// Build a terminal error event.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    /// Whether this event ends the sequence.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
