//! Line-delimited JSON codec for the lantern's wire protocol
//!
//! The device writes newline-terminated JSON objects, but chunks arrive
//! fragmented at arbitrary boundaries, and a single line may carry several
//! objects back to back (the firmware flushes status and state together under
//! load). The codec reassembles logical lines across feeds and recovers each
//! individual `{...}` object from a line.

use serde_json::Value;
use tracing::debug;

mod messages;
pub use messages::{InboundFrame, JoinOutcome};

/// Stream decoder holding the unterminated trailing fragment between feeds
#[derive(Debug, Default)]
pub struct LineCodec {
    fragment: String,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode whatever complete objects this chunk completes
    ///
    /// The text after the last newline is retained for the next call, never
    /// parsed early. Objects that fail to parse are dropped and do not abort
    /// the rest of the chunk.
    pub fn feed(&mut self, chunk: &str) -> Vec<Value> {
        self.fragment.push_str(chunk);
        if !self.fragment.contains('\n') {
            return Vec::new();
        }

        let buffered = std::mem::take(&mut self.fragment);
        let mut lines: Vec<&str> = buffered.split('\n').collect();
        // split always yields at least one segment
        self.fragment = lines.pop().unwrap_or("").to_string();

        let mut objects = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            debug!(line = %line.trim_end(), "recv");
            for raw in scan_objects(line) {
                match serde_json::from_str::<Value>(raw) {
                    Ok(value) => objects.push(value),
                    Err(e) => debug!(fragment = %raw, error = %e, "Dropping unparseable object"),
                }
            }
        }
        objects
    }

    /// Text carried over to the next feed
    pub fn pending(&self) -> &str {
        &self.fragment
    }
}

/// Slice out each top-level `{...}` object in a line
///
/// Objects may be concatenated without separators and may nest, so the first
/// `{` cannot be assumed to pair with the last `}`. Braces inside string
/// literals (including escaped quotes) do not count. Text outside any object
/// is skipped; an object left open at end of line is dropped.
fn scan_objects(line: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in line.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        found.push(&line[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_incomplete_line_is_buffered() {
        let mut codec = LineCodec::new();
        assert!(codec.feed("{\"mode\":\"sol").is_empty());
        assert_eq!(codec.pending(), "{\"mode\":\"sol");
        assert!(codec.feed("id\"}").is_empty());
        let objects = codec.feed("\n");
        assert_eq!(objects, vec![json!({"mode": "solid"})]);
        assert_eq!(codec.pending(), "");
    }

    #[test]
    fn test_trailing_fragment_held_until_completed() {
        let mut codec = LineCodec::new();

        // First feed completes one line and buffers the unterminated second
        let objects = codec.feed("{\"mode\":\"solid\"}\n{\"mode\":\"fade\",\"fade_speed\":2");
        assert_eq!(objects, vec![json!({"mode": "solid"})]);
        assert_eq!(codec.pending(), "{\"mode\":\"fade\",\"fade_speed\":2");

        let objects = codec.feed("}\n");
        assert_eq!(objects, vec![json!({"mode": "fade", "fade_speed": 2})]);
    }

    #[test]
    fn test_concatenated_objects_on_one_line() {
        let mut codec = LineCodec::new();
        let objects = codec.feed("{\"status\":\"boot\"}{\"ack\":1}{\"mode\":\"snake\"}\n");
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[0], json!({"status": "boot"}));
        assert_eq!(objects[1], json!({"ack": 1}));
        assert_eq!(objects[2], json!({"mode": "snake"}));
    }

    #[test]
    fn test_invalid_object_dropped_rest_kept() {
        let mut codec = LineCodec::new();
        let objects = codec.feed("{\"mode\":}{\"fade_speed\":1.5}\n");
        assert_eq!(objects, vec![json!({"fade_speed": 1.5})]);
    }

    #[test]
    fn test_noise_around_objects_is_ignored() {
        let mut codec = LineCodec::new();
        let objects = codec.feed("boot: rail ok {\"status\":\"up\"} trailing\n");
        assert_eq!(objects, vec![json!({"status": "up"})]);
    }

    #[test]
    fn test_nested_object_recovered_whole() {
        let mut codec = LineCodec::new();
        let objects = codec.feed("{\"ack\":{\"op\":\"wifi\"}}{\"ok\":true}\n");
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0], json!({"ack": {"op": "wifi"}}));
        assert_eq!(objects[1], json!({"ok": true}));
    }

    #[test]
    fn test_braces_inside_strings_do_not_split() {
        let mut codec = LineCodec::new();
        let objects = codec.feed("{\"status\":\"weird {\\\"x\\\":1} text\"}\n");
        assert_eq!(objects, vec![json!({"status": "weird {\"x\":1} text"})]);
    }

    #[test]
    fn test_empty_and_blank_lines_skipped() {
        let mut codec = LineCodec::new();
        let objects = codec.feed("\n\n   \n{\"mode\":\"fade\"}\n");
        assert_eq!(objects, vec![json!({"mode": "fade"})]);
    }

    #[test]
    fn test_object_left_open_at_line_end_is_dropped() {
        let mut codec = LineCodec::new();
        let objects = codec.feed("{\"mode\":\"solid\"}{\"fade_min\":\n");
        assert_eq!(objects, vec![json!({"mode": "solid"})]);
        assert_eq!(codec.pending(), "");
    }

    #[test]
    fn test_lines_reassemble_across_many_feeds() {
        let mut codec = LineCodec::new();
        let mut objects = Vec::new();
        for chunk in ["{\"so", "lid_bright\"", ":0.5}\n{\"fade", "_min\":0.2}\n"] {
            objects.extend(codec.feed(chunk));
        }
        assert_eq!(
            objects,
            vec![json!({"solid_bright": 0.5}), json!({"fade_min": 0.2})]
        );
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut codec = LineCodec::new();
        let objects = codec.feed("{\"mode\":\"snake\"}\r\n");
        assert_eq!(objects, vec![json!({"mode": "snake"})]);
    }
}
