//! Test overrides: answering commands from a response table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use commander_core::{Error, Result};

/// Environment flag that bypasses the subprocess.
pub const TEST_MODE_ENV: &str = "COMMANDER_SESSION_TEST_MODE";

/// Environment variable naming a canned-response JSON file.
pub const CANNED_RESPONSES_ENV: &str = "COMMANDER_SESSION_CANNED_RESPONSES";

/// Replies used instead of a real CLI.
///
/// Matching is exact first, then the longest key the command starts with,
/// then `default`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CannedResponses {
    /// Command (or command prefix) to output
    pub responses: BTreeMap<String, String>,
    /// Output for unmatched commands
    pub default: Option<String>,
}

impl CannedResponses {
    /// Load from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read canned responses '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid canned responses: {e}")))
    }

    /// Add a response.
    pub fn with_response(mut self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.responses.insert(command.into(), output.into());
        self
    }

    /// Set the fallback response.
    pub fn with_default(mut self, output: impl Into<String>) -> Self {
        self.default = Some(output.into());
        self
    }

    /// Reply for `command`.
    pub fn respond(&self, command: &str) -> String {
        let command = command.trim();

        if let Some(output) = self.responses.get(command) {
            return output.clone();
        }

        let prefix_match = self
            .responses
            .iter()
            .filter(|(key, _)| !key.is_empty() && command.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len());

        match prefix_match {
            Some((key, output)) => {
                debug!("Canned prefix match: '{}' for '{}'", key, command);
                output.clone()
            }
            None => self.default.clone().unwrap_or_default(),
        }
    }
}

/// Test-only switches, read explicitly from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestOverrides {
    /// Bypass the subprocess entirely
    pub test_mode: bool,
    /// Canned response file
    pub canned_responses: Option<PathBuf>,
}

impl TestOverrides {
    /// Read both flags from the environment.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var(TEST_MODE_ENV).ok().as_deref(),
            std::env::var_os(CANNED_RESPONSES_ENV).map(PathBuf::from),
        )
    }

    /// Build from raw flag values.
    pub fn from_vars(test_mode: Option<&str>, canned_responses: Option<PathBuf>) -> Self {
        let test_mode = matches!(
            test_mode.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("1") | Some("true")
        );
        Self {
            test_mode,
            canned_responses: canned_responses.filter(|p| !p.as_os_str().is_empty()),
        }
    }

    /// Whether the subprocess is bypassed.
    pub fn is_active(&self) -> bool {
        self.test_mode
    }

    /// Response table to use, if test mode is on.
    pub fn load(&self) -> Result<Option<CannedResponses>> {
        if !self.test_mode {
            return Ok(None);
        }

        let responses = match &self.canned_responses {
            Some(path) => {
                let responses = CannedResponses::from_file(path)?;
                info!(
                    "Test mode: {} canned responses loaded from {}",
                    responses.responses.len(),
                    path.display()
                );
                responses
            }
            None => {
                info!("Test mode: no canned response file, replies will be empty");
                CannedResponses::default()
            }
        };
        Ok(Some(responses))
    }
}
