//! Incremental newline framer for serial byte streams.
//!
//! # Why a stateful framer is needed
//!
//! A serial `read()` returns whatever bytes the driver has buffered at that
//! moment.  There is no guarantee that a single read contains exactly one
//! line:
//!
//! - It may stop in the middle of a line (partial read).
//! - It may contain the tail of one line and several complete lines after it.
//!
//! [`LineFramer`] keeps the unterminated tail between calls and only emits a
//! line once its `\n` has arrived.  Feeding the same bytes in any chunking
//! produces the same lines.
//!
//! # Line cleanup
//!
//! Each emitted line is decoded as UTF-8 with invalid sequences replaced by
//! U+FFFD, then trimmed.  Trimming also removes the `\r` of a `\r\n` ending.
//! Lines that are empty after trimming are not emitted.
//!
//! # Bounded buffering
//!
//! A device that never sends a newline would otherwise grow the buffer without
//! limit.  Lines longer than `max_line_len` bytes are dropped (and logged).
//! As soon as the unterminated tail exceeds the limit, the buffered bytes are
//! released and everything up to the next `\n` is skipped.  Whether a line is
//! dropped depends only on its length, never on how it was chunked.

use tracing::warn;

/// Default maximum length of a single line in bytes (excluding the `\n`).
///
/// Board output lines are well under 100 bytes; 64 KiB leaves generous room
/// for unusual payloads while still bounding memory.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Reassembles newline-terminated text lines from arbitrary byte chunks.
///
/// # Example
///
/// ```rust
/// use shrike_core::LineFramer;
///
/// let mut framer = LineFramer::new();
/// assert!(framer.feed(b"TEMP=4").is_empty());
/// assert_eq!(framer.feed(b"2\nUPTIME=1"), vec!["TEMP=42".to_string()]);
/// assert_eq!(framer.pending_len(), 8);
/// ```
#[derive(Debug, Clone)]
pub struct LineFramer {
    /// Bytes received since the last newline.
    buffer: Vec<u8>,
    max_line_len: usize,
    /// `true` while skipping the remainder of an over-long line.
    discarding: bool,
    dropped_lines: u64,
}

impl LineFramer {
    /// Creates a framer with the [`DEFAULT_MAX_LINE_LEN`] limit.
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    /// Creates a framer that drops lines longer than `max_line_len` bytes.
    ///
    /// A limit of `0` is raised to `1` so that single-character lines still
    /// pass.
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            max_line_len: max_line_len.max(1),
            discarding: false,
            dropped_lines: 0,
        }
    }

    /// Feeds a chunk of raw bytes and returns every line it completed.
    ///
    /// Lines are returned in the order their newlines occur in the stream.
    /// Bytes after the last newline are kept and prefixed to the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let segment = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                // The tail of a line we already counted as dropped.
                self.discarding = false;
                continue;
            }

            let line_len = self.buffer.len() + segment.len();
            if line_len > self.max_line_len {
                self.record_drop(line_len);
                self.buffer.clear();
                continue;
            }

            let decoded = if self.buffer.is_empty() {
                decode_line(segment)
            } else {
                self.buffer.extend_from_slice(segment);
                let line = decode_line(&self.buffer);
                self.buffer.clear();
                line
            };

            if let Some(line) = decoded {
                lines.push(line);
            }
        }

        if !self.discarding && !rest.is_empty() {
            let pending = self.buffer.len() + rest.len();
            if pending > self.max_line_len {
                self.record_drop(pending);
                self.buffer.clear();
                self.discarding = true;
            } else {
                self.buffer.extend_from_slice(rest);
            }
        }

        lines
    }

    /// Number of buffered bytes still waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total number of lines dropped for exceeding the length limit.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }

    /// The configured maximum line length in bytes.
    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }

    /// Discards any partial line and leaves the framer as if freshly created.
    ///
    /// The dropped-line counter is preserved.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    fn record_drop(&mut self, len: usize) {
        self.dropped_lines += 1;
        warn!(
            "dropping serial line longer than {} bytes (at least {len} bytes received)",
            self.max_line_len
        );
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Lossy-decodes and trims one raw line; `None` if nothing remains.
fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_split_across_two_feeds_is_joined() {
        // Arrange
        let mut framer = LineFramer::new();

        // Act
        let first = framer.feed(b"AB");
        let second = framer.feed(b"C\n");

        // Assert
        assert!(first.is_empty());
        assert_eq!(second, vec!["ABC"]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_multiple_lines_in_one_feed_keep_trailing_fragment() {
        // Arrange
        let mut framer = LineFramer::new();

        // Act
        let lines = framer.feed(b"X\nY\nZ");

        // Assert: "Z" has no newline yet, so it stays buffered
        assert_eq!(lines, vec!["X", "Y"]);
        assert_eq!(framer.pending_len(), 1);

        // Completing it on the next call emits it
        assert_eq!(framer.feed(b"\n"), vec!["Z"]);
    }

    #[test]
    fn test_blank_and_whitespace_lines_are_dropped() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"\n").is_empty());
        assert!(framer.feed(b"   \t \n").is_empty());
        assert!(framer.feed(b"\r\n\n\n").is_empty());
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_whitespace_only_fragment_is_buffered_not_emitted() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"   ").is_empty());
        assert_eq!(framer.pending_len(), 3);
    }

    #[test]
    fn test_empty_feed_returns_nothing() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"").is_empty());
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_crlf_endings_are_stripped() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"TEMP=42\r\nUPTIME=17\r\n");
        assert_eq!(lines, vec!["TEMP=42", "UPTIME=17"]);
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"   LED ON  \n");
        assert_eq!(lines, vec!["LED ON"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_rejected() {
        // Arrange: 0xFF is never valid in UTF-8
        let mut framer = LineFramer::new();

        // Act
        let lines = framer.feed(b"BAD=\xFF\xFE\n");

        // Assert
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("BAD="));
        assert!(lines[0].contains('\u{FFFD}'));
    }

    #[test]
    fn test_multibyte_character_split_across_feeds_survives() {
        // Arrange: "°" is 0xC2 0xB0 in UTF-8; split between the two bytes
        let mut framer = LineFramer::new();

        // Act
        assert!(framer.feed(b"T=21\xC2").is_empty());
        let lines = framer.feed(b"\xB0C\n");

        // Assert
        assert_eq!(lines, vec!["T=21°C"]);
    }

    #[test]
    fn test_over_long_line_in_single_feed_is_dropped() {
        // Arrange
        let mut framer = LineFramer::with_max_line_len(4);

        // Act
        let lines = framer.feed(b"OK\nTOOLONG\nOK2\n");

        // Assert
        assert_eq!(lines, vec!["OK", "OK2"]);
        assert_eq!(framer.dropped_lines(), 1);
    }

    #[test]
    fn test_over_long_partial_is_discarded_until_next_newline() {
        // Arrange
        let mut framer = LineFramer::with_max_line_len(4);

        // Act: the partial exceeds the limit before its newline arrives
        assert!(framer.feed(b"ABCDEF").is_empty());
        assert_eq!(framer.pending_len(), 0, "buffer must be released immediately");
        assert!(framer.feed(b"GHIJ").is_empty());
        let lines = framer.feed(b"KL\nOK\n");

        // Assert: the tail of the long line is skipped, the next line survives
        assert_eq!(lines, vec!["OK"]);
        assert_eq!(framer.dropped_lines(), 1);
    }

    #[test]
    fn test_line_exactly_at_limit_is_kept() {
        let mut framer = LineFramer::with_max_line_len(4);
        assert_eq!(framer.feed(b"ABCD\n"), vec!["ABCD"]);
        assert_eq!(framer.dropped_lines(), 0);
    }

    #[test]
    fn test_zero_limit_is_raised_to_one() {
        let framer = LineFramer::with_max_line_len(0);
        assert_eq!(framer.max_line_len(), 1);
    }

    #[test]
    fn test_reset_discards_partial_line() {
        // Arrange
        let mut framer = LineFramer::new();
        framer.feed(b"stale");

        // Act
        framer.reset();

        // Assert
        assert_eq!(framer.pending_len(), 0);
        assert_eq!(framer.feed(b"fresh\n"), vec!["fresh"]);
    }

    #[test]
    fn test_default_uses_default_limit() {
        let framer = LineFramer::default();
        assert_eq!(framer.max_line_len(), DEFAULT_MAX_LINE_LEN);
    }
}
