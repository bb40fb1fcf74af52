//! Waiting for readiness and for the output stream to go quiet.

use std::time::{Duration, Instant};

use tracing::debug;

use commander_core::{Error, SessionState};

use crate::consumer::SessionShared;
use crate::session::whole_secs;

/// Upper bound on a single condition-variable wait.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep granularity while waiting for silence.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a readiness wait ended, when it did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReadyFailure {
    /// The window elapsed; carries the output captured so far
    TimedOut(String),
    /// The runtime died; carries the exit reason and captured output
    Died(String, String),
}

impl ReadyFailure {
    /// Convert into the error reported to the starter.
    pub(crate) fn into_error(self, timeout: Duration) -> Error {
        match self {
            ReadyFailure::TimedOut(output) => Error::InitializationTimeout {
                timeout_secs: whole_secs(timeout),
                output,
            },
            ReadyFailure::Died(reason, output) => {
                let output = output.trim();
                if output.is_empty() {
                    Error::ProcessStartFailure(format!("CLI exited before its prompt appeared: {reason}"))
                } else {
                    Error::ProcessStartFailure(format!(
                        "CLI exited before its prompt appeared: {reason}\n{output}"
                    ))
                }
            }
        }
    }
}

/// Block until the consumer reports readiness, the runtime dies, or `timeout`.
///
/// `is_alive` is polled between notifications so a child that exits without
/// closing its output is still noticed.
pub(crate) fn wait_for_ready(
    shared: &SessionShared,
    timeout: Duration,
    is_alive: impl Fn() -> bool,
) -> std::result::Result<(), ReadyFailure> {
    let deadline = Instant::now() + timeout;
    let mut core = shared.lock();

    loop {
        match core.state {
            SessionState::Ready | SessionState::Busy => return Ok(()),
            SessionState::Dead | SessionState::NotStarted => {
                let reason = core
                    .exit_reason
                    .clone()
                    .unwrap_or_else(|| "session stopped".to_string());
                return Err(ReadyFailure::Died(reason, core.buffer.snapshot()));
            }
            SessionState::Starting => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ReadyFailure::TimedOut(core.buffer.snapshot()));
        }

        core = shared.wait(core, (deadline - now).min(POLL_INTERVAL));

        if core.state == SessionState::Starting && !is_alive() {
            core.mark_dead("process exited during startup");
        }
    }
}

/// Wait until neither output nor input has happened for `idle`, bounded by `max`.
///
/// Returns how long the wait took.
pub(crate) fn wait_for_idle(shared: &SessionShared, idle: Duration, max: Duration) -> Duration {
    let start = Instant::now();

    loop {
        let remaining = {
            let core = shared.lock();
            if core.state == SessionState::Dead {
                return start.elapsed();
            }
            match core.last_activity() {
                Some(last) => idle.saturating_sub(last.elapsed()),
                None => Duration::ZERO,
            }
        };

        if remaining.is_zero() {
            return start.elapsed();
        }
        if start.elapsed() >= max {
            debug!("Output did not settle within {:?}, continuing", max);
            return start.elapsed();
        }

        std::thread::sleep(remaining.min(IDLE_POLL_INTERVAL));
    }
}
