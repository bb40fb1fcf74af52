//! Retry and output validation on top of command execution.
//!
//! The CLI occasionally answers with a partial listing, a sync banner or an
//! empty line instead of the requested JSON. Callers describe what a good
//! answer looks like and the command is re-run until one arrives.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use commander_core::{Error, Result, RetrySettings};

/// Default attempts per call (including the first)
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between attempts in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default per-attempt timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default per-attempt timeout for listings in seconds
pub const DEFAULT_ARRAY_TIMEOUT_SECS: u64 = 60;

/// Anything that can run one command to completion.
pub trait CommandExecutor: Send + Sync {
    /// Run `command` and return its response text.
    fn execute_command(&self, command: &str, timeout: Duration) -> Result<String>;
}

/// Verbosity of per-attempt logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryLogLevel {
    /// Only the final failure is logged
    Silent,
    /// Retries are logged
    #[default]
    Normal,
    /// Every attempt is logged, including output previews
    Verbose,
}

/// Custom acceptance check for command output.
pub type OutputValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// What acceptable output looks like. All present checks must pass.
#[derive(Clone, Default)]
pub struct ValidationConfig {
    /// Substring that must appear
    pub required_content: Option<String>,
    /// Substring that must not appear
    pub forbidden_content: Option<String>,
    /// Minimum trimmed length
    pub min_length: usize,
    /// Extra predicate
    pub custom_validator: Option<OutputValidator>,
}

impl std::fmt::Debug for ValidationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationConfig")
            .field("required_content", &self.required_content)
            .field("forbidden_content", &self.forbidden_content)
            .field("min_length", &self.min_length)
            .field("custom_validator", &self.custom_validator.is_some())
            .finish()
    }
}

impl ValidationConfig {
    /// Create an empty validation (accepts everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a substring.
    pub fn with_required(mut self, content: impl Into<String>) -> Self {
        self.required_content = Some(content.into());
        self
    }

    /// Forbid a substring.
    pub fn with_forbidden(mut self, content: impl Into<String>) -> Self {
        self.forbidden_content = Some(content.into());
        self
    }

    /// Require a minimum trimmed length.
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// Add a custom predicate.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.custom_validator = Some(Arc::new(validator));
        self
    }

    /// Check `output`, returning the reason for a rejection.
    pub fn validate(&self, output: &str) -> std::result::Result<(), String> {
        let trimmed = output.trim();

        if trimmed.len() < self.min_length {
            return Err(format!(
                "output too short ({} < {} characters)",
                trimmed.len(),
                self.min_length
            ));
        }
        if let Some(required) = &self.required_content {
            if !output.contains(required.as_str()) {
                return Err(format!("output does not contain '{required}'"));
            }
        }
        if let Some(forbidden) = &self.forbidden_content {
            if output.contains(forbidden.as_str()) {
                return Err(format!("output contains forbidden '{forbidden}'"));
            }
        }
        if let Some(validator) = &self.custom_validator {
            if !validator(output) {
                return Err("output rejected by custom validator".to_string());
            }
        }
        Ok(())
    }
}

/// Retry policy for one call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts (including the first); 0 is treated as 1
    pub max_retries: u32,
    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
    /// Delay before the second attempt in milliseconds
    pub retry_delay_ms: u64,
    /// Delay multiplier per further attempt (1.0 = constant)
    pub backoff_multiplier: f64,
    /// Per-attempt log verbosity
    pub log_level: RetryLogLevel,
    /// Output validation
    pub validation: Option<ValidationConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::generic()
    }
}

impl RetryConfig {
    /// No validation, default timeout.
    pub fn generic() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            backoff_multiplier: 1.0,
            log_level: RetryLogLevel::Normal,
            validation: None,
        }
    }

    /// Output must contain a JSON object.
    pub fn json_object() -> Self {
        Self {
            validation: Some(ValidationConfig::new().with_required("{").with_min_length(5)),
            ..Self::generic()
        }
    }

    /// Output must contain a JSON array; listings get a longer timeout.
    pub fn json_array() -> Self {
        Self {
            timeout_secs: DEFAULT_ARRAY_TIMEOUT_SECS,
            validation: Some(ValidationConfig::new().with_required("[").with_min_length(5)),
            ..Self::generic()
        }
    }

    /// Output must be a generated password object (or an array of them).
    pub fn password_generation() -> Self {
        Self {
            validation: Some(ValidationConfig::new().with_validator(is_password_output)),
            ..Self::generic()
        }
    }

    /// Apply configured defaults to this preset, keeping its validation.
    ///
    /// The array timeout is used when the preset's timeout is the listing one.
    pub fn with_settings(mut self, settings: &RetrySettings) -> Self {
        self.timeout_secs = if self.timeout_secs == DEFAULT_ARRAY_TIMEOUT_SECS {
            settings.array_timeout_secs
        } else {
            settings.timeout_secs
        };
        self.max_retries = settings.max_retries;
        self.retry_delay_ms = settings.retry_delay_ms;
        self.backoff_multiplier = settings.backoff_multiplier;
        self
    }

    /// Set the number of attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the base delay between attempts.
    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Set the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the log verbosity.
    pub fn with_log_level(mut self, log_level: RetryLogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    /// Replace the validation.
    pub fn with_validation(mut self, validation: Option<ValidationConfig>) -> Self {
        self.validation = validation;
        self
    }

    /// Attempts that will actually be made.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplier = if self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0 {
            self.backoff_multiplier
        } else {
            1.0
        };
        let delay_ms = self.retry_delay_ms as f64 * multiplier.powi(exponent);
        Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64)
    }
}

/// Accepts `{"password": ...}` or a non-empty array of such objects.
fn is_password_output(output: &str) -> bool {
    let has_password = |v: &Value| v.get("password").is_some_and(|p| !p.is_null());

    if let Ok(value) = commander_detector::parse_json_object(output) {
        if has_password(&value) {
            return true;
        }
    }
    if let Ok(value) = commander_detector::parse_json_array(output) {
        if let Some(items) = value.as_array() {
            return !items.is_empty() && items.iter().all(has_password);
        }
    }
    false
}

/// Run `command` through `executor` until it succeeds and validates.
///
/// Errors that can never succeed on retry (`CliNotFound`, `InvalidInput`,
/// `Config`) are returned immediately. When every attempt produced output
/// that failed validation the result is `ValidationFailure`.
pub fn execute_with_retry(
    executor: &dyn CommandExecutor,
    command: &str,
    config: &RetryConfig,
) -> Result<String> {
    let attempts = config.attempts();
    let timeout = config.timeout();

    for attempt in 1..=attempts {
        if config.log_level == RetryLogLevel::Verbose {
            info!("Executing '{}' (attempt {}/{})", command, attempt, attempts);
        }

        match executor.execute_command(command, timeout) {
            Ok(output) => {
                let verdict = match &config.validation {
                    Some(validation) => validation.validate(&output),
                    None => Ok(()),
                };

                match verdict {
                    Ok(()) => {
                        if attempt > 1 && config.log_level != RetryLogLevel::Silent {
                            info!("'{}' succeeded on attempt {}/{}", command, attempt, attempts);
                        }
                        return Ok(output);
                    }
                    Err(reason) if attempt < attempts => {
                        log_retry(config, command, attempt, attempts, &reason);
                        if config.log_level == RetryLogLevel::Verbose {
                            debug!("Rejected output preview: {:?}", preview(&output));
                        }
                    }
                    Err(reason) => {
                        warn!(
                            "'{}' output failed validation after {} attempts: {}",
                            command, attempts, reason
                        );
                        return Err(Error::ValidationFailure {
                            attempts,
                            reason,
                            output,
                        });
                    }
                }
            }
            Err(e) if e.is_retryable() && attempt < attempts => {
                log_retry(config, command, attempt, attempts, &e.to_string());
            }
            Err(e) => {
                warn!("'{}' failed on attempt {}/{}: {}", command, attempt, attempts, e);
                return Err(e);
            }
        }

        std::thread::sleep(config.delay_for_attempt(attempt));
    }

    // The loop always returns on its last attempt.
    Err(Error::Other(format!("'{command}' was not attempted")))
}

fn log_retry(config: &RetryConfig, command: &str, attempt: u32, attempts: u32, reason: &str) {
    match config.log_level {
        RetryLogLevel::Silent => {}
        RetryLogLevel::Normal | RetryLogLevel::Verbose => warn!(
            "'{}' attempt {}/{} failed, retrying in {:?}: {}",
            command,
            attempt,
            attempts,
            config.delay_for_attempt(attempt),
            reason
        ),
    }
}

fn preview(output: &str) -> String {
    const MAX_PREVIEW: usize = 200;
    if output.len() <= MAX_PREVIEW {
        return output.to_string();
    }
    let mut end = MAX_PREVIEW;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &output[..end])
}
