//! Collector wire format.
//!
//! A batch is a JSON array of heartbeat objects in the order received:
//!
//! ```text
//! [{"entity":"<string>","timestamp":<number>,"is_write":<bool>[,"project":"<string>"][,"language":"<string>"]}, ...]
//! ```
//!
//! Optional fields are omitted rather than written as `null`. The collector
//! expects a stricter escaping than `serde_json` produces by default: besides
//! the usual short escapes, DEL, the C1 controls (`U+007F`-`U+009F`) and the
//! General Punctuation block through Currency Symbols (`U+2000`-`U+20FF`) are
//! written as `\uXXXX` with uppercase hex. [`WireFormatter`] plugs that into
//! `serde_json`.

use std::io;

use serde::ser::Error as _;
use serde::Serialize;
use serde_json::ser::{CharEscape, CompactFormatter, Formatter};
use tracing::warn;

use crate::types::Heartbeat;

/// Serializes a batch into the collector's JSON array format.
///
/// # Errors
///
/// Returns a `serde_json::Error` if a heartbeat cannot be encoded.
///
/// # Examples
///
/// ```
/// use heartbeat_tracker::serializer::serialize;
/// use heartbeat_tracker::types::{Heartbeat, Timestamp};
///
/// let batch = vec![Heartbeat {
///     entity: "/src/lib.rs".to_string(),
///     timestamp: Timestamp::from_units(17_000_000_005_000),
///     is_write: true,
///     project: Some("demo".to_string()),
///     language: None,
/// }];
///
/// assert_eq!(
///     serialize(&batch).unwrap(),
///     r#"[{"entity":"/src/lib.rs","timestamp":1700000000.5000,"is_write":true,"project":"demo"}]"#
/// );
/// ```
pub fn serialize(heartbeats: &[Heartbeat]) -> Result<String, serde_json::Error> {
    let mut buf = Vec::with_capacity(heartbeats.len() * 96 + 2);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, WireFormatter);
    heartbeats.serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(serde_json::Error::custom)
}

/// Drops heartbeats that cannot be encoded, keeping the rest of the batch.
///
/// Each rejected heartbeat is logged. Order of the survivors is preserved.
#[must_use]
pub fn sanitize_batch(heartbeats: Vec<Heartbeat>) -> Vec<Heartbeat> {
    heartbeats
        .into_iter()
        .filter(|heartbeat| match heartbeat.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    error = %e,
                    timestamp = %heartbeat.timestamp,
                    "Dropping heartbeat that cannot be serialized"
                );
                false
            }
        })
        .collect()
}

/// Compact `serde_json` formatter with the collector's escaping rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireFormatter;

impl Formatter for WireFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut out = String::with_capacity(fragment.len());
        escape_into(fragment, &mut out);
        writer.write_all(out.as_bytes())
    }

    fn write_char_escape<W>(&mut self, writer: &mut W, char_escape: CharEscape) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let c = match char_escape {
            CharEscape::Quote => '"',
            CharEscape::ReverseSolidus => '\\',
            CharEscape::Solidus => {
                return CompactFormatter.write_char_escape(writer, CharEscape::Solidus)
            }
            CharEscape::Backspace => '\u{08}',
            CharEscape::FormFeed => '\u{0C}',
            CharEscape::LineFeed => '\n',
            CharEscape::CarriageReturn => '\r',
            CharEscape::Tab => '\t',
            CharEscape::AsciiControl(byte) => char::from(byte),
        };
        let mut out = String::with_capacity(6);
        escape_char(c, &mut out);
        writer.write_all(out.as_bytes())
    }
}

/// Appends the escaped form of `value` (without quotes) to `out`.
///
/// # Examples
///
/// ```
/// use heartbeat_tracker::serializer::escape_into;
///
/// let mut out = String::new();
/// escape_into("a\"b\\c\n\u{2028}", &mut out);
/// assert_eq!(out, r#"a\"b\\c\n\u2028"#);
/// ```
pub fn escape_into(value: &str, out: &mut String) {
    for c in value.chars() {
        escape_char(c, out);
    }
}

fn escape_char(c: char, out: &mut String) {
    match c {
        '"' => out.push_str("\\\""),
        '\\' => out.push_str("\\\\"),
        '\u{08}' => out.push_str("\\b"),
        '\u{0C}' => out.push_str("\\f"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c if needs_unicode_escape(c) => {
            out.push_str(&format!("\\u{:04X}", u32::from(c)));
        }
        c => out.push(c),
    }
}

fn needs_unicode_escape(c: char) -> bool {
    c < ' ' || ('\u{7F}'..='\u{9F}').contains(&c) || ('\u{2000}'..='\u{20FF}').contains(&c)
}
