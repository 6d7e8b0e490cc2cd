//! Newline-delimited JSON framing for the receiver's serial stream

use crate::domain::TelemetryRecord;

/// upper bound on a single unterminated line before it is discarded
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Accumulates raw serial bytes and yields complete `\n`-terminated frames.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > MAX_FRAME_LEN && !self.buffer.contains(&b'\n') {
            tracing::debug!("discarding {} bytes without a line terminator", self.buffer.len());
            self.buffer.clear();
        }
    }

    /// next complete frame, without its terminator
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut frame: Vec<u8> = self.buffer.drain(..=end).collect();
        frame.pop();
        Some(frame)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Decode one frame into a record.
///
/// Invalid UTF-8 is replaced, never fatal. Blank lines, malformed JSON and
/// JSON that is not an object all yield `None`.
pub fn decode_frame(frame: &[u8]) -> Option<TelemetryRecord> {
    let text = String::from_utf8_lossy(frame);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(value) => {
            let record = TelemetryRecord::from_value(value);
            if record.is_none() {
                tracing::debug!("dropping non-object frame: {}", text);
            }
            record
        }
        Err(e) => {
            tracing::debug!("dropping malformed frame ({}): {}", e, text);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_split_on_newline() {
        let mut framer = LineFramer::new();
        framer.push(b"{\"a\":1}\n{\"b\":");
        assert_eq!(framer.next_frame().unwrap(), b"{\"a\":1}".to_vec());
        assert!(framer.next_frame().is_none());

        framer.push(b"2}\r\n");
        let frame = framer.next_frame().unwrap();
        let record = decode_frame(&frame).unwrap();
        assert_eq!(record.get_f64("b"), Some(2.0));
    }

    #[test]
    fn test_malformed_line_does_not_block_next() {
        let mut framer = LineFramer::new();
        framer.push(b"{not json\n{\"pressure\": 1013.5}\n");

        let first = framer.next_frame().unwrap();
        assert!(decode_frame(&first).is_none());

        let second = framer.next_frame().unwrap();
        let record = decode_frame(&second).unwrap();
        assert_eq!(record.get_f64("pressure"), Some(1013.5));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut bytes = b"{\"status\": \"".to_vec();
        bytes.push(0xff);
        bytes.extend_from_slice(b"ok\"}");
        let record = decode_frame(&bytes).unwrap();
        assert_eq!(record.get("status").and_then(|v| v.as_str()), Some("\u{fffd}ok"));
    }

    #[test]
    fn test_non_object_and_blank_frames_dropped() {
        assert!(decode_frame(b"42").is_none());
        assert!(decode_frame(b"[1,2]").is_none());
        assert!(decode_frame(b"   ").is_none());
    }

    #[test]
    fn test_runaway_line_is_discarded() {
        let mut framer = LineFramer::new();
        framer.push(&vec![b'x'; MAX_FRAME_LEN + 1]);
        framer.push(b"{\"ok\":true}\n");
        let frame = framer.next_frame().unwrap();
        assert!(decode_frame(&frame).is_some());
    }
}
