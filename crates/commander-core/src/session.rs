//! Session types for the interactive session state machine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Invocation;

/// Unique identifier for one spawned session runtime.
///
/// A new id is minted every time the subprocess is (re)started, which makes
/// restarts visible in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of the interactive session.
///
/// ```text
/// NotStarted -> Starting -> Ready <-> Busy
///      any   -> Dead
///     Dead   -> Starting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No process has been spawned yet
    NotStarted,
    /// Process spawned, waiting for the first prompt
    Starting,
    /// Prompt observed, no command outstanding
    Ready,
    /// Exactly one command outstanding
    Busy,
    /// Process exited, was stopped, or failed to start
    Dead,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Dead) => true,
            (NotStarted, Starting) | (Dead, Starting) => true,
            (Starting, Ready) => true,
            (Ready, Busy) | (Busy, Ready) => true,
            _ => false,
        }
    }

    /// Whether commands can be accepted in this state.
    pub fn is_ready(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Busy)
    }

    /// Get the state name as a string.
    pub fn name(self) -> &'static str {
        match self {
            SessionState::NotStarted => "not_started",
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Dead => "dead",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Point-in-time description of the session, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfo {
    /// Current state
    pub state: SessionState,
    /// Whether `is_ready()` currently holds
    pub ready: bool,
    /// Id of the live runtime, if any
    pub session_id: Option<SessionId>,
    /// Invocation used for the live runtime
    pub invocation: Option<Invocation>,
    /// OS process id of the live runtime
    pub pid: Option<u32>,
    /// RFC 3339 timestamp of the last successful start
    pub started_at: Option<String>,
    /// Commands completed since the engine was created
    pub commands_executed: u64,
    /// Whether the engine answers from canned responses instead of a process
    pub canned: bool,
}

impl SessionInfo {
    /// Info for an engine that has never started.
    pub fn not_started() -> Self {
        Self {
            state: SessionState::NotStarted,
            ready: false,
            session_id: None,
            invocation: None,
            pid: None,
            started_at: None,
            commands_executed: 0,
            canned: false,
        }
    }
}
