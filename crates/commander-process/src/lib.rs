//! # commander-process
//!
//! Process plumbing for the Commander session engine.
//!
//! This crate provides:
//! - PTY-backed subprocess lifecycle (spawn, write, liveness, kill)
//! - ANSI/VT escape stripping of the raw output stream
//! - Discovery of the external CLI across OS-specific install locations
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on commander-core
//! and knows nothing about prompts or commands.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod locator;
pub mod process;
pub mod sanitize;

// Re-export commonly used types
pub use locator::{CandidateEnv, CliLocator};
pub use process::{ProcessHandle, SpawnSpec};
pub use sanitize::TextSanitizer;
