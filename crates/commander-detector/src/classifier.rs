//! Readiness and completion classification.

use lazy_static::lazy_static;
use regex::Regex;

use commander_core::{Error, MarkerSettings, Result};

use crate::extract;

lazy_static! {
    /// Summary printed after the vault has been synced, e.g. `Decrypted [42] record(s)`.
    static ref DECRYPTED_SUMMARY: Regex =
        Regex::new(r"Decrypted \[\d+\] record\(s\)").unwrap();
}

/// Decides when the CLI is waiting for input.
///
/// Implementations look at the sanitized output accumulated since the last
/// buffer clear. The session engine asks [`PromptClassifier::is_ready`] while
/// starting and [`PromptClassifier::is_complete`] while a command is pending.
pub trait PromptClassifier: Send + Sync {
    /// Classifier name for logging.
    fn name(&self) -> &'static str;

    /// Whether the output shows the interactive prompt (or a terminal status line).
    fn is_ready(&self, text: &str) -> bool;

    /// Whether the output shows that the pending command has finished.
    fn is_complete(&self, text: &str) -> bool {
        self.is_ready(text)
    }

    /// Whether a single line is (or starts with) an interactive prompt.
    fn is_prompt_line(&self, line: &str) -> bool;

    /// Whether a single line is a terminal status line.
    fn is_status_line(&self, _line: &str) -> bool {
        false
    }

    /// Response text for `command` out of the output captured while it ran.
    fn extract_response(&self, text: &str, command: &str) -> String {
        extract::extract_response(text, command, |line| self.is_prompt_line(line))
    }
}

/// Substring and pattern based classifier.
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    prompt_markers: Vec<String>,
    status_phrases: Vec<String>,
    status_patterns: Vec<Regex>,
}

impl MarkerClassifier {
    /// Build a classifier from configured markers.
    pub fn from_settings(settings: &MarkerSettings) -> Result<Self> {
        let status_patterns = settings
            .status_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| Error::Config(format!("Invalid status pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            prompt_markers: settings.prompt_markers.clone(),
            status_phrases: settings.status_phrases.clone(),
            status_patterns,
        })
    }

    /// Classifier with only prompt markers, no status lines.
    pub fn with_markers<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prompt_markers: markers.into_iter().map(Into::into).collect(),
            status_phrases: Vec::new(),
            status_patterns: Vec::new(),
        }
    }

    /// Configured prompt markers.
    pub fn prompt_markers(&self) -> &[String] {
        &self.prompt_markers
    }

    fn has_marker(&self, text: &str) -> bool {
        self.prompt_markers.iter().any(|m| text.contains(m.as_str()))
    }

    fn has_status(&self, text: &str) -> bool {
        self.status_phrases.iter().any(|p| text.contains(p.as_str()))
            || self.status_patterns.iter().any(|r| r.is_match(text))
    }
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        let settings = MarkerSettings::default();
        Self {
            prompt_markers: settings.prompt_markers,
            status_phrases: settings.status_phrases,
            status_patterns: vec![DECRYPTED_SUMMARY.clone()],
        }
    }
}

impl PromptClassifier for MarkerClassifier {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn is_ready(&self, text: &str) -> bool {
        self.has_marker(text) || self.has_status(text)
    }

    fn is_prompt_line(&self, line: &str) -> bool {
        let line = line.trim_start();
        self.prompt_markers
            .iter()
            .any(|m| line.starts_with(m.as_str()))
    }

    fn is_status_line(&self, line: &str) -> bool {
        self.has_status(line)
    }
}
