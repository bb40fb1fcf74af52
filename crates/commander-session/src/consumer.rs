//! Shared session state and the background output consumer.
//!
//! One consumer thread per runtime performs blocking reads on the PTY. It is
//! the only writer of the output buffer and the only place readiness and
//! command completion are detected.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use commander_core::{SessionId, SessionState};
use commander_detector::{LineAccumulator, LineKind, PromptClassifier};
use commander_process::{ProcessHandle, TextSanitizer};

use crate::output::OutputBuffer;

/// Read size for PTY output.
const READ_CHUNK_SIZE: usize = 4096;

/// The single outstanding command.
#[derive(Debug)]
pub(crate) struct CommandExecution {
    /// Sequence number, unique per engine
    pub id: u64,
    /// Command text as written (without line ending)
    pub command: String,
    /// When the command was registered
    pub submitted_at: Instant,
    /// Completion handle; dropping it wakes the waiter with a disconnect
    sender: SyncSender<String>,
}

impl CommandExecution {
    pub(crate) fn new(id: u64, command: String, sender: SyncSender<String>) -> Self {
        Self {
            id,
            command,
            submitted_at: Instant::now(),
            sender,
        }
    }

    /// Resolve the waiter with the response.
    pub(crate) fn complete(self, response: String) {
        // The waiter may already have timed out and gone.
        let _ = self.sender.try_send(response);
    }
}

/// State guarded by the output lock.
#[derive(Debug)]
pub(crate) struct SessionCore {
    /// Accumulated output since the last clear
    pub buffer: OutputBuffer,
    /// Lifecycle state
    pub state: SessionState,
    /// Runtime currently owning this state
    pub session_id: Option<SessionId>,
    /// At most one outstanding command
    pub pending: Option<CommandExecution>,
    /// Last write to the subprocess (command or coax newline)
    pub last_write: Option<Instant>,
    /// Why the last runtime ended
    pub exit_reason: Option<String>,
}

impl SessionCore {
    /// Apply a state transition if it is legal.
    pub(crate) fn set_state(&mut self, next: SessionState) -> bool {
        let current = self.state;
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!(
                "Ignoring illegal session state transition: id={:?}, {} → {}",
                self.session_id.map(|id| id.to_string()),
                current,
                next
            );
            return false;
        }
        self.state = next;
        info!(
            "Session state changed: id={}, {} → {}",
            self.session_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            current,
            next
        );
        true
    }

    /// Latest activity on either side of the terminal.
    pub(crate) fn last_activity(&self) -> Option<Instant> {
        match (self.buffer.last_append(), self.last_write) {
            (Some(a), Some(w)) => Some(a.max(w)),
            (a, w) => a.or(w),
        }
    }

    /// Mark the runtime dead, dropping any pending command.
    pub(crate) fn mark_dead(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(pending) = self.pending.take() {
            debug!(
                "Dropping pending command #{} '{}': {}",
                pending.id, pending.command, reason
            );
        }
        if self.state != SessionState::Dead && self.state != SessionState::NotStarted {
            self.set_state(SessionState::Dead);
        }
        self.exit_reason = Some(reason);
    }
}

/// Output lock plus the condition variable signalled on every state change.
#[derive(Debug)]
pub(crate) struct SessionShared {
    core: Mutex<SessionCore>,
    changed: Condvar,
}

impl SessionShared {
    pub(crate) fn new(max_buffer_bytes: usize) -> Self {
        Self {
            core: Mutex::new(SessionCore {
                buffer: OutputBuffer::new(max_buffer_bytes),
                state: SessionState::NotStarted,
                session_id: None,
                pending: None,
                last_write: None,
                exit_reason: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// Lock the core, recovering from a poisoned lock.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for a change notification or `timeout`.
    pub(crate) fn wait<'a>(
        &self,
        guard: MutexGuard<'a, SessionCore>,
        timeout: Duration,
    ) -> MutexGuard<'a, SessionCore> {
        self.changed
            .wait_timeout(guard, timeout)
            .map(|(guard, _)| guard)
            .unwrap_or_else(|e| e.into_inner().0)
    }

    /// Wake every waiter.
    pub(crate) fn notify(&self) {
        self.changed.notify_all();
    }
}

/// Everything the consumer thread needs.
pub(crate) struct OutputConsumer {
    pub shared: Arc<SessionShared>,
    pub classifier: Arc<dyn PromptClassifier>,
    pub process: Arc<ProcessHandle>,
    pub shutdown: Arc<AtomicBool>,
    pub session_id: SessionId,
    pub line_ending: &'static str,
}

impl OutputConsumer {
    /// Read until EOF, error or shutdown, then mark the runtime dead.
    pub(crate) fn run(self, mut reader: Box<dyn Read + Send>) {
        debug!("Output consumer started: id={}", self.session_id);

        let mut sanitizer = TextSanitizer::new();
        let mut lines = LineAccumulator::new();
        let mut buf = [0u8; READ_CHUNK_SIZE];

        let reason = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break "stopped".to_string();
            }

            match reader.read(&mut buf) {
                Ok(0) => break "end of output".to_string(),
                Ok(n) => {
                    let text = sanitizer.feed(&buf[..n]);
                    if text.is_empty() {
                        continue;
                    }
                    for line in lines.push(&text) {
                        trace!(
                            "[{:?}] {}",
                            LineKind::classify(self.classifier.as_ref(), &line),
                            line
                        );
                    }
                    self.handle_text(&text);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break "stopped".to_string();
                    }
                    // Linux reports EIO once the child side of the PTY is gone.
                    break format!("read error: {e}");
                }
            }
        };

        if let Some(rest) = lines.flush() {
            trace!("[partial] {}", rest);
        }

        let exit_code = self.process.exit_code();
        info!(
            "Output consumer finished: id={}, reason={}, exit_code={:?}",
            self.session_id, reason, exit_code
        );

        let mut core = self.shared.lock();
        if core.session_id == Some(self.session_id) {
            let reason = match exit_code {
                Some(code) => format!("process exited with code {code} ({reason})"),
                None => format!("process output closed ({reason})"),
            };
            core.mark_dead(reason);
        }
        drop(core);
        self.shared.notify();
    }

    /// Append a sanitized chunk and run the predicates over the buffer.
    fn handle_text(&self, text: &str) {
        let mut core = self.shared.lock();
        if core.session_id != Some(self.session_id) {
            return;
        }
        core.buffer.append(text);

        match core.state {
            SessionState::Starting => {
                if self.classifier.is_ready(core.buffer.contents()) {
                    debug!(
                        "Readiness detected by {} classifier: id={}",
                        self.classifier.name(),
                        self.session_id
                    );
                    core.set_state(SessionState::Ready);
                    core.buffer.clear();

                    // Coax a fresh prompt so the next idle settle has something to wait out.
                    match self.process.write(self.line_ending.as_bytes()) {
                        Ok(_) => core.last_write = Some(Instant::now()),
                        Err(e) => debug!("Failed to write coax newline: {}", e),
                    }
                    drop(core);
                    self.shared.notify();
                }
            }
            SessionState::Busy => {
                let complete = core
                    .pending
                    .as_ref()
                    .is_some_and(|_| self.classifier.is_complete(core.buffer.contents()));
                if !complete {
                    return;
                }
                if let Some(pending) = core.pending.take() {
                    let response = self
                        .classifier
                        .extract_response(core.buffer.contents(), &pending.command);
                    debug!(
                        "Command #{} completed in {:?}: {} bytes",
                        pending.id,
                        pending.submitted_at.elapsed(),
                        response.len()
                    );
                    pending.complete(response);
                    core.buffer.clear();
                    core.set_state(SessionState::Ready);
                    drop(core);
                    self.shared.notify();
                }
            }
            _ => {}
        }
    }
}
