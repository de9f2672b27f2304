//! Sentinel framing of worker stdout.
//!
//! Two entry points share the same rules:
//! - [`extract_framed`] works on a complete captured transcript.
//! - [`FrameScanner`] classifies lines one at a time for the live read loop.
//!
//! Only the first start marker and the first end marker after it count.
//! Lines inside the region are returned verbatim; deciding which of them are
//! protocol records is the parser's job.

use crate::worker::payload::Markers;

/// Text strictly between the first start marker and the first end marker
/// that follows it, trimmed. `None` means the output is not framed and must
/// be parsed the legacy way.
#[must_use]
pub fn extract_framed<'a>(raw: &'a str, markers: &Markers) -> Option<&'a str> {
    let start = raw.find(&markers.start)? + markers.start.len();
    let len = raw[start..].find(&markers.end)?;
    Some(raw[start..start + len].trim())
}

/// Position of the live scanner relative to the framed region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No start marker seen yet; lines are parsed unframed.
    Unframed,
    /// Inside the protocol region.
    Inside,
    /// End marker seen; everything else is noise.
    Closed,
}

/// Classification of one stdout line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass<'a> {
    /// A marker line with nothing else on it.
    Marker,
    /// Content inside the framed region.
    Protocol(&'a str),
    /// Content seen before any start marker. Only meaningful if no start
    /// marker follows; then it is parsed with the legacy rules.
    Legacy(&'a str),
    /// Content after the framed region closed.
    Noise(&'a str),
}

/// Incremental counterpart of [`extract_framed`].
#[derive(Debug, Clone)]
pub struct FrameScanner {
    markers: Markers,
    state: FrameState,
}

impl FrameScanner {
    /// Scanner looking for `markers`.
    #[must_use]
    pub fn new(markers: Markers) -> Self {
        Self {
            markers,
            state: FrameState::Unframed,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Classify `line` and advance the state.
    pub fn feed<'a>(&mut self, line: &'a str) -> LineClass<'a> {
        match self.state {
            FrameState::Unframed => {
                let Some(pos) = line.find(&self.markers.start) else {
                    return LineClass::Legacy(line);
                };
                self.state = FrameState::Inside;
                let rest = &line[pos + self.markers.start.len()..];
                match rest.find(&self.markers.end) {
                    Some(end) => {
                        self.state = FrameState::Closed;
                        protocol_or_marker(&rest[..end])
                    }
                    None => protocol_or_marker(rest),
                }
            }
            FrameState::Inside => match line.find(&self.markers.end) {
                Some(end) => {
                    self.state = FrameState::Closed;
                    protocol_or_marker(&line[..end])
                }
                None => LineClass::Protocol(line),
            },
            FrameState::Closed => LineClass::Noise(line),
        }
    }
}

fn protocol_or_marker(fragment: &str) -> LineClass<'_> {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        LineClass::Marker
    } else {
        LineClass::Protocol(fragment)
    }
}
