//! Frame assembly from fragmented upstream bytes.
//!
//! Upstream messages are blank-line delimited text blocks. Network reads cut
//! them at arbitrary byte offsets, so bytes are buffered until a delimiter
//! arrives and decoded to text one complete block at a time. The delimiter is
//! pure ASCII, so a multi-byte UTF-8 sequence is never split across frames.

use bytes::BytesMut;

use crate::error::UpstreamError;

/// Prefix of payload-carrying lines.
pub const DATA_PREFIX: &str = "data:";

/// Prefix of the line naming the frame's event type.
pub const EVENT_PREFIX: &str = "event:";

/// One atomic upstream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Event name from an `event:` line, if any.
    pub event: Option<String>,
    /// `data:` lines with the prefix and surrounding whitespace stripped.
    pub lines: Vec<String>,
}

impl Frame {
    /// Extract a frame from one delimiter-bounded block.
    ///
    /// Returns `None` when the block carries no payload (comments,
    /// keep-alives, event lines without data).
    pub fn parse(block: &str) -> Option<Self> {
        let mut event = None;
        let mut lines = Vec::new();

        for line in block.lines() {
            if let Some(value) = line.strip_prefix(DATA_PREFIX) {
                lines.push(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix(EVENT_PREFIX) {
                event = Some(value.trim().to_string());
            }
        }

        let frame = Self { event, lines };
        if frame.payload().is_empty() {
            None
        } else {
            Some(frame)
        }
    }

    /// Payload text: the data lines rejoined with line breaks.
    pub fn payload(&self) -> String {
        self.lines.join("\n")
    }

    /// Whether upstream labelled this frame as an error.
    pub fn is_error_event(&self) -> bool {
        self.event.as_deref() == Some("error")
    }
}

/// Buffers raw bytes and yields complete frames in arrival order.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: BytesMut,
    limit: Option<usize>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the size of the trailing incomplete frame.
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            buffer: BytesMut::new(),
            limit,
        }
    }

    /// Append a chunk read from upstream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Fail if the trailing incomplete frame has outgrown the limit.
    ///
    /// Complete frames still in the buffer do not count, so callers can
    /// check before or after draining them.
    pub fn check_limit(&self) -> Result<(), UpstreamError> {
        let Some(limit) = self.limit else {
            return Ok(());
        };
        let partial = match last_boundary_end(&self.buffer) {
            Some(end) => self.buffer.len() - end,
            None => self.buffer.len(),
        };
        if partial > limit {
            return Err(UpstreamError::BufferOverflow { limit });
        }
        Ok(())
    }

    /// Take the next complete frame out of the buffer.
    ///
    /// Blocks without payload are consumed and skipped. Returns `None` once
    /// no delimiter remains.
    pub fn next_frame(&mut self) -> Option<Frame> {
        while let Some((start, len)) = find_boundary(&self.buffer) {
            let block = self.buffer.split_to(start + len);
            if let Some(frame) = Frame::parse(&String::from_utf8_lossy(&block[..start])) {
                return Some(frame);
            }
        }
        None
    }

    /// Flush the trailing partial block at end of stream.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            return None;
        }
        let block = self.buffer.split();
        Frame::parse(&String::from_utf8_lossy(&block))
    }

    /// Bytes currently held for an incomplete frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Locate the first blank-line boundary: `\n\n` or `\n\r\n`.
///
/// Returns the offset of the first line break and the delimiter length.
fn find_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' {
            match buf[i + 1] {
                b'\n' => return Some((i, 2)),
                b'\r' if buf.get(i + 2) == Some(&b'\n') => return Some((i, 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// End offset of the last complete block in `buf`.
fn last_boundary_end(buf: &[u8]) -> Option<usize> {
    let mut end = None;
    let mut offset = 0;
    while let Some((start, len)) = find_boundary(&buf[offset..]) {
        offset += start + len;
        end = Some(offset);
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(assembler: &mut FrameAssembler) -> Vec<String> {
        std::iter::from_fn(|| assembler.next_frame())
            .map(|f| f.payload())
            .collect()
    }

    #[test]
    fn test_parse_strips_prefix_and_whitespace() {
        let frame = Frame::parse("data:   {\"a\":1}  ").unwrap();
        assert_eq!(frame.payload(), "{\"a\":1}");
        assert_eq!(frame.event, None);
    }

    #[test]
    fn test_parse_joins_multiple_data_lines() {
        let frame = Frame::parse("event: message\ndata: one\nid: 7\ndata: two").unwrap();
        assert_eq!(frame.payload(), "one\ntwo");
        assert_eq!(frame.event.as_deref(), Some("message"));
    }

    #[test]
    fn test_parse_discards_comment_only_block() {
        assert!(Frame::parse(": keep-alive").is_none());
        assert!(Frame::parse("event: ping").is_none());
        assert!(Frame::parse("data:").is_none());
    }

    #[test]
    fn test_error_event_detection() {
        let frame = Frame::parse("event: error\ndata: {}").unwrap();
        assert!(frame.is_error_event());
    }

    #[test]
    fn test_frames_extracted_in_order() {
        let mut assembler = FrameAssembler::new();
        assembler.push(b"data: a\n\ndata: b\n\ndata: c");

        assert_eq!(drain(&mut assembler), vec!["a", "b"]);
        // Partial frame stays buffered
        assert_eq!(assembler.buffered_len(), "data: c".len());
        assert_eq!(assembler.finish().unwrap().payload(), "c");
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_delimiter_split_across_pushes() {
        let mut assembler = FrameAssembler::new();
        assembler.push(b"data: a\n");
        assert!(assembler.next_frame().is_none());
        assembler.push(b"\ndata: b\n\n");
        assert_eq!(drain(&mut assembler), vec!["a", "b"]);
    }

    #[test]
    fn test_crlf_delimiters() {
        let mut assembler = FrameAssembler::new();
        assembler.push(b"data: a\r\n\r\ndata: b\r\n\r\n");
        assert_eq!(drain(&mut assembler), vec!["a", "b"]);
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_keep_alive_blocks_are_skipped() {
        let mut assembler = FrameAssembler::new();
        assembler.push(b": ping\n\n: ping\n\ndata: x\n\n");
        assert_eq!(drain(&mut assembler), vec!["x"]);
    }

    #[test]
    fn test_multibyte_utf8_split_across_pushes() {
        let wire = "data: h\u{e9}llo \u{1F600}\n\n".as_bytes();
        let mut assembler = FrameAssembler::new();
        for byte in wire {
            assembler.push(std::slice::from_ref(byte));
        }
        assert_eq!(drain(&mut assembler), vec!["h\u{e9}llo \u{1F600}"]);
    }

    #[test]
    fn test_finish_on_empty_buffer() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.finish().is_none());
        assembler.push(b"data: a\n\n");
        assert!(assembler.next_frame().is_some());
        assert!(assembler.finish().is_none());
    }

    #[test]
    fn test_limit_applies_to_partial_frame_only() {
        let mut assembler = FrameAssembler::with_limit(Some(16));
        // Complete frames larger than the limit in total are fine
        assembler.push(b"data: aaaa\n\ndata: bbbb\n\ndata: cc");
        assert!(assembler.check_limit().is_ok());
        assert_eq!(drain(&mut assembler), vec!["aaaa", "bbbb"]);

        assembler.push(b"cccccccccccccccc");
        assert_eq!(
            assembler.check_limit(),
            Err(UpstreamError::BufferOverflow { limit: 16 })
        );
    }
}
