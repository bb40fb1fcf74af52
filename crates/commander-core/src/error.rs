//! Error types for the Commander session engine.

use thiserror::Error;

/// Main error type for Commander session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The locator exhausted every candidate. Carries an OS-specific diagnostic.
    #[error("Keeper Commander CLI not found.\n{0}")]
    CliNotFound(String),

    /// Spawning failed or the process died before it became ready
    #[error("Process failed to initialize: {0}")]
    ProcessStartFailure(String),

    /// No readiness signal within the OS-specific startup window
    #[error("Timed out after {timeout_secs}s waiting for the interactive prompt")]
    InitializationTimeout {
        /// Startup window that elapsed
        timeout_secs: u64,
        /// Output captured while waiting
        output: String,
    },

    /// No completion signal within the caller's timeout
    #[error("Command '{command}' timed out after {timeout_secs}s")]
    CommandTimeout {
        /// Command text that was submitted
        command: String,
        /// Timeout that elapsed
        timeout_secs: u64,
        /// Output captured before the timeout
        output: String,
    },

    /// Write/read-level fault while a command was being processed
    #[error("I/O failure while executing '{command}': {message}")]
    CommandIoFailure {
        /// Command text that was being processed
        command: String,
        /// Underlying failure
        message: String,
    },

    /// Response shape rejected after exhausting retries
    #[error("Validation failed after {attempts} attempt(s): {reason}")]
    ValidationFailure {
        /// Number of attempts performed
        attempts: u32,
        /// Why the last response was rejected
        reason: String,
        /// Last captured response
        output: String,
    },

    /// No balanced JSON region found
    #[error("No JSON found: {0}")]
    ExtractionFailure(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters (generic)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the retry layer may attempt the call again after this error.
    ///
    /// A missing binary, a bad argument or a bad configuration will fail the
    /// same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::CliNotFound(_) | Error::InvalidInput(_) | Error::Config(_)
        )
    }

    /// Raw subprocess output captured when the error occurred, if any.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Error::InitializationTimeout { output, .. }
            | Error::CommandTimeout { output, .. }
            | Error::ValidationFailure { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
