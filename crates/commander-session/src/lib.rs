//! # commander-session
//!
//! Persistent session engine for the Commander CLI.
//!
//! This crate provides:
//! - A long-lived interactive CLI session driven through a PTY
//! - Single-flight command execution with timeouts
//! - Retry and output validation presets
//! - Canned responses for running without the CLI installed
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on commander-core,
//! commander-process and commander-detector to run a CLI as a
//! request/response service.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canned;
mod consumer;
pub mod output;
pub mod retry;
pub mod session;
mod wait;

// Re-export commonly used types
pub use canned::{CannedResponses, TestOverrides, CANNED_RESPONSES_ENV, TEST_MODE_ENV};
pub use output::OutputBuffer;
pub use retry::{
    execute_with_retry, CommandExecutor, OutputValidator, RetryConfig, RetryLogLevel,
    ValidationConfig,
};
pub use session::SessionEngine;
