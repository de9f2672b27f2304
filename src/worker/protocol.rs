//! Worker record decoding.
//!
//! Each protocol line is a JSON object tagged by `type`:
//!
//! | `type`  | Fields                          | Maps to                    |
//! |---------|---------------------------------|----------------------------|
//! | `init`  | `session_id`                    | [`WorkerRecord::Init`]     |
//! | `text`  | `content`                       | [`WorkerRecord::Text`]     |
//! | `tool`  | `descriptor` or inline fields   | [`WorkerRecord::Tool`]     |
//! | `done`  | `session_id`, `stats`           | [`WorkerRecord::Done`]     |
//! | `error` | `message` (or `error`)          | [`WorkerRecord::Error`]    |
//!
//! Anything else, including invalid JSON, is noise and decodes to `None`.

use serde_json::{Map, Value};
use tracing::debug;

use crate::models::{ErrorKind, ExecutionEvent};
use crate::worker::framer::extract_framed;
use crate::worker::payload::Markers;

/// A decoded protocol record.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerRecord {
    /// Session announcement.
    Init {
        /// Session identifier.
        session_id: String,
    },
    /// Assistant text.
    Text {
        /// Text chunk.
        content: String,
    },
    /// Tool invocation.
    Tool {
        /// Descriptor as emitted.
        descriptor: Value,
    },
    /// Successful end of the run.
    Done {
        /// Final session identifier.
        session_id: Option<String>,
        /// Run statistics.
        stats: Value,
    },
    /// Worker-side failure.
    Error {
        /// Failure description.
        message: String,
    },
}

/// Decode one line. Returns `None` for noise.
#[must_use]
pub fn parse_line(line: &str) -> Option<WorkerRecord> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }

    let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(line) else {
        debug!(line, "dropping non-json output line");
        return None;
    };

    let kind = object.remove("type")?;
    match kind.as_str()? {
        "init" => Some(WorkerRecord::Init {
            session_id: take_string(&mut object, "session_id")?,
        }),
        "text" => Some(WorkerRecord::Text {
            content: take_string(&mut object, "content")?,
        }),
        "tool" => {
            let descriptor = object
                .remove("descriptor")
                .unwrap_or_else(|| Value::Object(object));
            Some(WorkerRecord::Tool { descriptor })
        }
        "done" => Some(WorkerRecord::Done {
            session_id: take_string(&mut object, "session_id"),
            stats: object
                .remove("stats")
                .unwrap_or_else(|| Value::Object(Map::new())),
        }),
        "error" => Some(WorkerRecord::Error {
            message: take_string(&mut object, "message")
                .or_else(|| take_string(&mut object, "error"))
                .unwrap_or_else(|| "worker reported an error".to_owned()),
        }),
        other => {
            debug!(kind = other, "dropping record with unknown type");
            None
        }
    }
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    match object.remove(key)? {
        Value::String(s) => Some(s),
        _ => None,
    }
}

/// Decode a complete captured stdout transcript into events.
///
/// When `markers` is `None` they are detected from the transcript. Framed
/// output is decoded from the first framed region only; otherwise every line
/// is decoded the legacy way. The result follows the live engine's ordering
/// rules (at most one leading `Init`, at most one terminal event last, a
/// `Done` without a session id takes the one from `init`) but carries no
/// exit-status information, so a transcript without `done` or
/// `error` simply has no terminal event.
#[must_use]
pub fn parse_transcript(raw: &str, markers: Option<&Markers>) -> Vec<ExecutionEvent> {
    let detected = markers.cloned().or_else(|| Markers::detect(raw));
    let region = detected
        .as_ref()
        .and_then(|markers| extract_framed(raw, markers))
        .unwrap_or(raw);

    let mut events = Vec::new();
    let mut emitted_any = false;
    let mut seen_session: Option<String> = None;
    for record in region.lines().filter_map(parse_line) {
        let event = match record {
            WorkerRecord::Init { session_id } => {
                if emitted_any {
                    seen_session.get_or_insert(session_id);
                    continue;
                }
                seen_session = Some(session_id.clone());
                ExecutionEvent::Init { session_id }
            }
            WorkerRecord::Text { content } => ExecutionEvent::Text { content },
            WorkerRecord::Tool { descriptor } => ExecutionEvent::ToolUse { descriptor },
            WorkerRecord::Done { session_id, stats } => ExecutionEvent::Done {
                session_id: session_id.or_else(|| seen_session.take()),
                stats,
            },
            WorkerRecord::Error { message } => {
                ExecutionEvent::error(ErrorKind::WorkerProtocol, message)
            }
        };
        emitted_any = true;
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}
