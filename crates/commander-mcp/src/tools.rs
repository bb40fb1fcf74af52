//! MCP Tool Types
//!
//! Parameter and response types for every Commander tool, plus the pure
//! helpers that turn tool parameters into engine calls.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use commander_core::{Result, RetrySettings, SessionInfo};
use commander_detector::{parse_json_array, parse_json_object};
use commander_session::RetryConfig;

// =============================================================================
// Session Lifecycle Tools
// =============================================================================

/// Parameters for commander_session_start
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SessionStartParams {}

/// Parameters for commander_session_status
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SessionStatusParams {}

/// Parameters for commander_session_stop
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SessionStopParams {}

/// Response for the session lifecycle tools
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionStatusResponse {
    /// Current session status
    pub session: SessionInfo,

    /// Human-readable summary
    pub message: String,
}

// =============================================================================
// Command Execution Tools
// =============================================================================

/// Output validation preset for commander_execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RetryPreset {
    /// Any output is accepted
    #[default]
    None,
    /// Output must contain a JSON object
    Object,
    /// Output must contain a JSON array (listings)
    Array,
    /// Output must contain generated passwords
    Password,
}

impl RetryPreset {
    /// Retry configuration for this preset with configured defaults applied.
    pub fn config(self, settings: &RetrySettings) -> RetryConfig {
        let preset = match self {
            RetryPreset::None => RetryConfig::generic(),
            RetryPreset::Object => RetryConfig::json_object(),
            RetryPreset::Array => RetryConfig::json_array(),
            RetryPreset::Password => RetryConfig::password_generation(),
        };
        preset.with_settings(settings)
    }
}

/// Which JSON shape to pull out of noisy output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum JsonKind {
    /// Whichever of object or array comes first
    #[default]
    Auto,
    /// A `{...}` region
    Object,
    /// A `[...]` region
    Array,
}

impl JsonKind {
    /// Extract and parse the first balanced region of this kind.
    pub fn extract(self, text: &str) -> Result<Value> {
        match self {
            JsonKind::Object => parse_json_object(text),
            JsonKind::Array => parse_json_array(text),
            JsonKind::Auto => {
                let value = commander_detector::extract_json_value(text)?;
                serde_json::from_str(value).map_err(Into::into)
            }
        }
    }
}

/// Parameters for commander_execute
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteParams {
    /// Single-line Commander command (e.g., "list --format=json")
    pub command: String,

    /// Per-attempt timeout in seconds (defaults to the preset's timeout, or
    /// the session's command timeout for preset none)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Validation preset: none, object, array or password
    #[serde(default)]
    pub preset: RetryPreset,

    /// Attempts including the first (defaults to configuration)
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Delay between attempts in milliseconds (defaults to configuration)
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,

    /// Also parse JSON of this kind out of the output
    #[serde(default)]
    pub extract_json: Option<JsonKind>,
}

impl ExecuteParams {
    /// Parameters for a plain command with every default.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout_secs: None,
            preset: RetryPreset::None,
            max_retries: None,
            retry_delay_ms: None,
            extract_json: None,
        }
    }

    /// Retry configuration with per-call overrides applied.
    ///
    /// Unvalidated commands fall back to `command_timeout_secs`.
    pub fn retry_config(&self, settings: &RetrySettings, command_timeout_secs: u64) -> RetryConfig {
        let mut config = self.preset.config(settings);
        if self.preset == RetryPreset::None {
            config = config.with_timeout_secs(command_timeout_secs);
        }
        if let Some(timeout_secs) = self.timeout_secs {
            config = config.with_timeout_secs(timeout_secs);
        }
        if let Some(max_retries) = self.max_retries {
            config = config.with_max_retries(max_retries);
        }
        if let Some(retry_delay_ms) = self.retry_delay_ms {
            config = config.with_retry_delay_ms(retry_delay_ms);
        }
        config
    }
}

/// Response for commander_execute
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteResponse {
    /// Command that was run
    pub command: String,

    /// Response text with echo and prompt removed
    pub output: String,

    /// Parsed JSON, when extraction was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,

    /// Wall-clock time including retries
    pub elapsed_ms: u64,
}

// =============================================================================
// JSON Tools
// =============================================================================

/// Parameters for commander_extract_json
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractJsonParams {
    /// Raw CLI output possibly surrounded by banners or prompts
    pub text: String,

    /// Shape to extract (defaults to auto)
    #[serde(default)]
    pub kind: JsonKind,
}

/// Response for commander_extract_json
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractJsonResponse {
    /// Shape that was requested
    pub kind: JsonKind,

    /// Parsed value
    pub json: Value,
}
