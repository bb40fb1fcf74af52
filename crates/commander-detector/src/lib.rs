//! # commander-detector
//!
//! Text analysis for the Commander session engine.
//!
//! This crate provides:
//! - Readiness/completion classification of sanitized CLI output
//! - Line splitting and classification for diagnostics
//! - Response extraction (echoed command and prompt lines removed)
//! - Balanced JSON region extraction from noisy output
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends only on commander-core
//! and works on plain text, never on the process itself.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classifier;
pub mod extract;
pub mod json;
pub mod lines;

// Re-export commonly used types
pub use classifier::{MarkerClassifier, PromptClassifier};
pub use extract::extract_response;
pub use json::{
    extract_json_array, extract_json_object, extract_json_value, parse_json_array,
    parse_json_object,
};
pub use lines::{LineAccumulator, LineKind};
