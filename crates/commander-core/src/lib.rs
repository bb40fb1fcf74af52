//! # commander-core
//!
//! Core types for the Commander session engine.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other commander crates. It provides:
//!
//! - Error kinds shared by every layer
//! - YAML configuration (server, session, locator, markers, retry)
//! - Platform detection and OS-specific startup heuristics
//! - Invocation and session-state types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other commander crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod invocation;
pub mod platform;
pub mod session;

// Re-export commonly used types
pub use config::{
    CommanderConfig, LocatorSettings, MarkerSettings, RetrySettings, ServerSettings,
    SessionSettings,
};
pub use error::{Error, Result};
pub use invocation::{Invocation, InvocationKind};
pub use platform::Platform;
pub use session::{SessionId, SessionInfo, SessionState};
