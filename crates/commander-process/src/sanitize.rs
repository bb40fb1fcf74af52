//! Escape-sequence stripping using the VTE crate.
//!
//! Color is disabled through the environment, but interactive line editors
//! still emit cursor movement and erase sequences. The sanitizer turns the raw
//! PTY byte stream into plain text that the prompt predicates can match.

use vte::{Params, Perform};

/// Collects printable output from the VTE state machine.
#[derive(Debug, Default)]
struct TextSink {
    text: String,
}

impl Perform for TextSink {
    fn print(&mut self, c: char) {
        self.text.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            // Line Feed (LF)
            0x0A => self.text.push('\n'),
            // Horizontal Tab (HT)
            0x09 => self.text.push('\t'),
            // Backspace (BS) erases within the current chunk only
            0x08 => {
                if self.text.chars().last().is_some_and(|c| c != '\n') {
                    self.text.pop();
                }
            }
            // CR, BEL and the rest carry no text
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, c: char) {
        // Cursor Forward (CUF) is used by some line editors in place of spaces.
        if c == 'C' {
            let n = params
                .iter()
                .next()
                .and_then(|p| p.first().copied())
                .unwrap_or(1)
                .clamp(1, 256);
            for _ in 0..n {
                self.text.push(' ');
            }
        }
    }
}

/// Streaming ANSI/VT sanitizer.
///
/// Parser state survives between [`TextSanitizer::feed`] calls, so an escape
/// sequence split across two reads is still removed.
pub struct TextSanitizer {
    parser: vte::Parser,
    sink: TextSink,
}

impl TextSanitizer {
    /// Create a new sanitizer.
    pub fn new() -> Self {
        Self {
            parser: vte::Parser::new(),
            sink: TextSink::default(),
        }
    }

    /// Feed raw bytes and return the plain text they produced.
    pub fn feed(&mut self, bytes: &[u8]) -> String {
        for byte in bytes {
            self.parser.advance(&mut self.sink, *byte);
        }
        std::mem::take(&mut self.sink.text)
    }

    /// Sanitize a complete byte slice in one shot.
    pub fn sanitize(bytes: &[u8]) -> String {
        Self::new().feed(bytes)
    }
}

impl Default for TextSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TextSanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextSanitizer")
            .field("pending", &self.sink.text.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passthrough() {
        assert_eq!(TextSanitizer::sanitize(b"My Vault> "), "My Vault> ");
    }

    #[test]
    fn test_strips_sgr() {
        let raw = b"\x1b[1;32mMy Vault>\x1b[0m ";
        assert_eq!(TextSanitizer::sanitize(raw), "My Vault> ");
    }

    #[test]
    fn test_drops_carriage_return() {
        let raw = b"line one\r\nline two\r\n";
        assert_eq!(TextSanitizer::sanitize(raw), "line one\nline two\n");
    }

    #[test]
    fn test_strips_erase_and_cursor_sequences() {
        let raw = b"\x1b[?25l\x1b[2K\x1b[1GNot logged in> \x1b[?25h";
        assert_eq!(TextSanitizer::sanitize(raw), "Not logged in> ");
    }

    #[test]
    fn test_cursor_forward_becomes_spaces() {
        let raw = b"My\x1b[1CVault>";
        assert_eq!(TextSanitizer::sanitize(raw), "My Vault>");
    }

    #[test]
    fn test_backspace() {
        assert_eq!(TextSanitizer::sanitize(b"lx\x08s"), "ls");
        // Never erases past a line break
        assert_eq!(TextSanitizer::sanitize(b"a\n\x08b"), "a\nb");
    }

    #[test]
    fn test_strips_osc_title() {
        let raw = b"\x1b]0;keeper\x07My Vault> ";
        assert_eq!(TextSanitizer::sanitize(raw), "My Vault> ");
    }

    #[test]
    fn test_escape_split_across_chunks() {
        let mut sanitizer = TextSanitizer::new();
        let first = sanitizer.feed(b"hello \x1b[3");
        let second = sanitizer.feed(b"1mworld\x1b[0m");
        assert_eq!(first, "hello ");
        assert_eq!(second, "world");
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let bytes = "caf\u{e9}".as_bytes();
        let mut sanitizer = TextSanitizer::new();
        let mut out = sanitizer.feed(&bytes[..4]);
        out.push_str(&sanitizer.feed(&bytes[4..]));
        assert_eq!(out, "caf\u{e9}");
    }
}
