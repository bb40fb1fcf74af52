//! Line splitting and classification of the output stream.
//!
//! Output arrives in arbitrary chunks. The accumulator turns them into
//! complete lines so each one can be classified and logged once.

use crate::classifier::PromptClassifier;

/// Kind of a single output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    /// Empty or whitespace only
    Blank,
    /// Interactive prompt
    Prompt,
    /// Terminal status line (login result, sync summary)
    Status,
    /// Anything else
    Text,
}

impl LineKind {
    /// Classify `line` with `classifier`.
    pub fn classify(classifier: &dyn PromptClassifier, line: &str) -> Self {
        if line.trim().is_empty() {
            LineKind::Blank
        } else if classifier.is_prompt_line(line) {
            LineKind::Prompt
        } else if classifier.is_status_line(line) {
            LineKind::Status
        } else {
            LineKind::Text
        }
    }
}

/// Splits chunked text into complete lines.
#[derive(Debug, Default)]
pub struct LineAccumulator {
    partial: String,
}

impl LineAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk and return the lines it completed (without terminators).
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Text received after the last line break (usually a prompt).
    pub fn pending(&self) -> &str {
        &self.partial
    }

    /// Return and clear the unterminated remainder.
    pub fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }

    /// Drop any unterminated remainder.
    pub fn clear(&mut self) {
        self.partial.clear();
    }
}
