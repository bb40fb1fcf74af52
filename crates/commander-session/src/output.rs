//! Accumulated output of the running CLI.

use std::time::{Duration, Instant};

/// Sanitized output received since the last clear.
///
/// Only the background consumer appends. Clearing happens on the readiness
/// transition, on command submission and on command completion.
#[derive(Debug)]
pub struct OutputBuffer {
    /// Sanitized text, oldest first
    text: String,
    /// When text was last appended
    last_append: Option<Instant>,
    /// Retained size limit in bytes
    max_bytes: usize,
    /// Bytes dropped from the front since the last clear
    dropped: usize,
}

impl OutputBuffer {
    /// Create an empty buffer keeping at most `max_bytes`.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            text: String::new(),
            last_append: None,
            max_bytes: max_bytes.max(1),
            dropped: 0,
        }
    }

    /// Append sanitized text, dropping the oldest text beyond the limit.
    pub(crate) fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.text.push_str(text);
        self.last_append = Some(Instant::now());

        if self.text.len() > self.max_bytes {
            let mut cut = self.text.len() - self.max_bytes;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
            self.dropped += cut;
        }
    }

    /// Discard all text. The idle clock is kept.
    pub(crate) fn clear(&mut self) {
        self.text.clear();
        self.dropped = 0;
    }

    /// Current contents.
    pub fn contents(&self) -> &str {
        &self.text
    }

    /// Owned copy of the contents.
    pub fn snapshot(&self) -> String {
        self.text.clone()
    }

    /// Retained size in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Bytes dropped from the front since the last clear.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// When text was last appended.
    pub fn last_append(&self) -> Option<Instant> {
        self.last_append
    }

    /// Time since the last append, if anything was ever appended.
    pub fn idle_for(&self) -> Option<Duration> {
        self.last_append.map(|t| t.elapsed())
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_buffer_new() {
        let buffer = OutputBuffer::new(1024);
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
        assert!(buffer.last_append().is_none());
        assert!(buffer.idle_for().is_none());
    }

    #[test]
    fn test_output_buffer_append() {
        let mut buffer = OutputBuffer::new(1024);
        buffer.append("Hello");
        buffer.append(" World");

        assert_eq!(buffer.contents(), "Hello World");
        assert_eq!(buffer.len(), 11);
        assert!(buffer.last_append().is_some());
    }

    #[test]
    fn test_empty_append_keeps_idle_clock() {
        let mut buffer = OutputBuffer::new(1024);
        buffer.append("");
        assert!(buffer.last_append().is_none());
    }

    #[test]
    fn test_output_buffer_clear() {
        let mut buffer = OutputBuffer::new(1024);
        buffer.append("Some data");
        buffer.clear();

        assert!(buffer.is_empty());
        // Clearing is not output, so the idle clock survives
        assert!(buffer.last_append().is_some());
    }

    #[test]
    fn test_max_size_drops_oldest() {
        let mut buffer = OutputBuffer::new(8);
        buffer.append("0123456789");
        assert_eq!(buffer.contents(), "23456789");
        assert_eq!(buffer.dropped(), 2);

        buffer.append("ab");
        assert_eq!(buffer.contents(), "456789ab");
        assert_eq!(buffer.dropped(), 4);
    }

    #[test]
    fn test_max_size_respects_char_boundaries() {
        let mut buffer = OutputBuffer::new(4);
        buffer.append("a\u{e9}\u{e9}b");
        // 'a' (1) + 'é' (2) + 'é' (2) + 'b' (1) = 6 bytes, cut must not split 'é'
        assert_eq!(buffer.contents(), "\u{e9}b");
        assert!(buffer.len() <= 4);
    }
}
