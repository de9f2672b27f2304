//! Removal of encoding-invalid code points from caller text.
//!
//! Surrogate code points cannot be encoded as UTF-8, so text carrying them
//! (lone UTF-16 surrogates, or surrogates smuggled through a byte string as
//! `ED A0..BF 80..BF` triples) is rewritten before it reaches the launch
//! payload. Each unpaired surrogate becomes exactly one U+FFFD; correctly
//! paired surrogates are recombined; everything else is kept as-is.

use tracing::{info, warn};

use crate::models::RawText;

/// Sanitizer output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    /// Valid UTF-8 text.
    pub text: String,
    /// Number of code points or byte runs replaced with U+FFFD.
    pub replaced: usize,
}

impl Sanitized {
    /// Whether any replacement happened.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.replaced > 0
    }
}

/// Sanitize `raw`, logging the length delta when the content changed.
///
/// `field` names the payload field for the log record (`prompt`,
/// `system_prompt`).
#[must_use]
pub fn sanitize(field: &str, raw: &RawText) -> Sanitized {
    let (sanitized, original_len) = match raw {
        RawText::Utf8(text) => (
            Sanitized {
                text: text.clone(),
                replaced: 0,
            },
            text.len(),
        ),
        RawText::Wide(units) => (sanitize_wide(units), units.len()),
        RawText::Bytes(bytes) => (sanitize_bytes(bytes), bytes.len()),
    };

    if sanitized.changed() {
        info!(
            field,
            original_len,
            sanitized_len = sanitized.text.len(),
            replaced = sanitized.replaced,
            "replaced invalid code points in payload text"
        );
    }

    sanitized
}

/// Decode UTF-16, replacing each unpaired surrogate with U+FFFD.
#[must_use]
pub fn sanitize_wide(units: &[u16]) -> Sanitized {
    let mut replaced = 0;
    let text = char::decode_utf16(units.iter().copied())
        .map(|unit| {
            unit.unwrap_or_else(|_| {
                replaced += 1;
                char::REPLACEMENT_CHARACTER
            })
        })
        .collect();
    Sanitized { text, replaced }
}

/// Decode a UTF-8 superset, replacing each unpaired encoded surrogate with
/// one U+FFFD. Other malformed bytes are replaced lossily as a last resort.
#[must_use]
pub fn sanitize_bytes(bytes: &[u8]) -> Sanitized {
    let mut text = String::with_capacity(bytes.len());
    let mut replaced = 0;
    let mut lossy = 0;
    let mut rest = bytes;

    while !rest.is_empty() {
        let err = match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                break;
            }
            Err(err) => err,
        };

        let (valid, tail) = rest.split_at(err.valid_up_to());
        // `valid_up_to` guarantees this prefix is UTF-8.
        text.push_str(&String::from_utf8_lossy(valid));

        if let Some(high) = encoded_surrogate(tail) {
            let low = tail.get(3..).and_then(encoded_surrogate);
            match (high, low) {
                (0xD800..=0xDBFF, Some(low @ 0xDC00..=0xDFFF)) => {
                    let combined = 0x10000
                        + ((u32::from(high) - 0xD800) << 10)
                        + (u32::from(low) - 0xDC00);
                    text.push(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER));
                    rest = &tail[6..];
                }
                _ => {
                    text.push(char::REPLACEMENT_CHARACTER);
                    replaced += 1;
                    rest = &tail[3..];
                }
            }
            continue;
        }

        let skip = err.error_len().unwrap_or(tail.len());
        text.push(char::REPLACEMENT_CHARACTER);
        lossy += 1;
        rest = &tail[skip..];
    }

    if lossy > 0 {
        warn!(lossy, "payload text contained malformed bytes; substituted replacement characters");
    }

    Sanitized {
        text,
        replaced: replaced + lossy,
    }
}

/// Decode a 3-byte `ED A0..BF 80..BF` sequence into its surrogate value.
fn encoded_surrogate(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [0xED, b1 @ 0xA0..=0xBF, b2 @ 0x80..=0xBF, ..] => {
            Some(0xD000 | (u16::from(b1 & 0x3F) << 6) | u16::from(b2 & 0x3F))
        }
        _ => None,
    }
}
