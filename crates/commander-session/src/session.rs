//! Persistent interactive session engine.
//!
//! A [`SessionEngine`] owns at most one running CLI process at a time and
//! turns its prompt-based terminal output into a request/response protocol.
//! Commands are single-flight: the submission lock is held for the whole
//! round trip, so concurrent callers are served one after another.
//!
//! Lock order: command submission, then runtime, then output state, then the
//! PTY writer. The output-state lock is never held while taking the runtime
//! lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use commander_core::{
    CommanderConfig, Error, Invocation, InvocationKind, Platform, Result, RetrySettings,
    SessionId, SessionInfo, SessionSettings, SessionState,
};
use commander_detector::{MarkerClassifier, PromptClassifier};
use commander_process::{CliLocator, ProcessHandle, SpawnSpec};

use crate::canned::{CannedResponses, TestOverrides};
use crate::consumer::{CommandExecution, OutputConsumer, SessionShared};
use crate::retry::{self, CommandExecutor, RetryConfig};
use crate::wait;

/// Environment that keeps the CLI from emitting color and buffering output.
const SPAWN_ENV: [(&str, &str); 4] = [
    ("NO_COLOR", "1"),
    ("TERM", "dumb"),
    ("PYTHONUNBUFFERED", "1"),
    ("FORCE_COLOR", "0"),
];

/// How long `stop_session` waits for the consumer thread to finish.
const CONSUMER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Resources of one spawned (or canned) runtime.
struct SessionRuntime {
    id: SessionId,
    invocation: Option<Invocation>,
    process: Option<Arc<ProcessHandle>>,
    consumer: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    started_at: DateTime<Utc>,
}

impl SessionRuntime {
    fn canned(id: SessionId) -> Self {
        Self {
            id,
            invocation: None,
            process: None,
            consumer: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            started_at: Utc::now(),
        }
    }

    fn is_alive(&self) -> bool {
        self.process.as_ref().map_or(true, |p| p.is_alive())
    }

    /// Ask the CLI to quit, then kill it and collect the consumer.
    fn shutdown(mut self, quit: Option<(&str, &str, Duration)>) {
        if let Some(process) = self.process.take() {
            if let Some((command, line_ending, grace)) = quit {
                if process.is_alive() {
                    match process.write_line(command, line_ending) {
                        Ok(_) => {
                            let deadline = Instant::now() + grace;
                            while process.is_alive() && Instant::now() < deadline {
                                std::thread::sleep(Duration::from_millis(20));
                            }
                        }
                        Err(e) => debug!("Failed to send quit command: {}", e),
                    }
                }
            }

            self.shutdown.store(true, Ordering::SeqCst);
            process.close();
        }

        if let Some(handle) = self.consumer.take() {
            join_bounded(handle, CONSUMER_JOIN_TIMEOUT);
        }
    }
}

/// Join a thread, giving up (and detaching it) after `timeout`.
fn join_bounded(handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("Output consumer did not finish within {:?}, detaching", timeout);
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        error!("Output consumer panicked");
    }
}

/// Resets the start-in-progress flag when the starter leaves.
struct StartGuard<'a>(&'a AtomicBool);

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Rebuild a start error for callers that waited on another starter.
fn replicate(err: &Error) -> Error {
    match err {
        Error::CliNotFound(diagnostic) => Error::CliNotFound(diagnostic.clone()),
        Error::ProcessStartFailure(message) => Error::ProcessStartFailure(message.clone()),
        Error::InitializationTimeout {
            timeout_secs,
            output,
        } => Error::InitializationTimeout {
            timeout_secs: *timeout_secs,
            output: output.clone(),
        },
        Error::Config(message) => Error::Config(message.clone()),
        other => Error::ProcessStartFailure(other.to_string()),
    }
}

/// Whole seconds for error reports, rounding any fraction up.
pub(crate) fn whole_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Reject text that cannot be submitted as one command line.
fn validate_command(command: &str) -> Result<&str> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("command cannot be empty".to_string()));
    }
    if trimmed.contains(|c: char| c == '\n' || c == '\r') {
        return Err(Error::InvalidInput(
            "command must be a single line".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Long-lived interactive session with the external CLI.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use commander_core::CommanderConfig;
/// use commander_session::SessionEngine;
///
/// # fn example() -> commander_core::Result<()> {
/// let engine = SessionEngine::new(&CommanderConfig::default())?;
/// engine.start_session()?;
/// let listing = engine.execute_command("list --format=json", Duration::from_secs(60))?;
/// println!("{listing}");
/// engine.stop_session();
/// # Ok(())
/// # }
/// ```
pub struct SessionEngine {
    settings: SessionSettings,
    retry_settings: RetrySettings,
    platform: Platform,
    locator: CliLocator,
    invocation: Option<Invocation>,
    classifier: Arc<dyn PromptClassifier>,
    shared: Arc<SessionShared>,
    command_lock: Mutex<()>,
    starting: AtomicBool,
    start_failure: Mutex<Option<Error>>,
    runtime: Mutex<Option<SessionRuntime>>,
    canned: Option<CannedResponses>,
    next_command_id: AtomicU64,
    commands_executed: AtomicU64,
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("state", &self.state())
            .field("platform", &self.platform)
            .field("classifier", &self.classifier.name())
            .field("canned", &self.canned.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionEngine {
    /// Create an engine from configuration. Nothing is spawned yet.
    pub fn new(config: &CommanderConfig) -> Result<Self> {
        config.validate()?;
        let classifier = MarkerClassifier::from_settings(&config.markers)?;

        Ok(Self {
            settings: config.session.clone(),
            retry_settings: config.retry.clone(),
            platform: Platform::detect(),
            locator: CliLocator::new(config.locator.clone()),
            invocation: None,
            classifier: Arc::new(classifier),
            shared: Arc::new(SessionShared::new(config.session.max_buffer_bytes)),
            command_lock: Mutex::new(()),
            starting: AtomicBool::new(false),
            start_failure: Mutex::new(None),
            runtime: Mutex::new(None),
            canned: None,
            next_command_id: AtomicU64::new(0),
            commands_executed: AtomicU64::new(0),
        })
    }

    /// Create an engine honoring test overrides (canned mode when active).
    pub fn with_overrides(config: &CommanderConfig, overrides: &TestOverrides) -> Result<Self> {
        let engine = Self::new(config)?;
        Ok(match overrides.load()? {
            Some(canned) => engine.with_canned(canned),
            None => engine,
        })
    }

    /// Use `invocation` instead of running the locator.
    ///
    /// `Configured` invocations are spawned exactly as given; other kinds get
    /// the configured shell arguments appended.
    pub fn with_invocation(mut self, invocation: Invocation) -> Self {
        self.invocation = Some(invocation);
        self
    }

    /// Replace the readiness/completion classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn PromptClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Answer commands from a response table instead of a subprocess.
    pub fn with_canned(mut self, canned: CannedResponses) -> Self {
        self.canned = Some(canned);
        self
    }

    /// Session settings in effect.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Retry defaults from configuration.
    pub fn retry_settings(&self) -> &RetrySettings {
        &self.retry_settings
    }

    /// Host platform.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Whether commands are answered from canned responses.
    pub fn is_canned(&self) -> bool {
        self.canned.is_some()
    }

    fn lock_runtime(&self) -> MutexGuard<'_, Option<SessionRuntime>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Whether a command can be submitted right now without starting.
    pub fn is_ready(&self) -> bool {
        if !self.state().is_ready() {
            return false;
        }
        self.lock_runtime()
            .as_ref()
            .is_some_and(SessionRuntime::is_alive)
    }

    /// Output accumulated since the last buffer clear.
    pub fn output_snapshot(&self) -> String {
        self.shared.lock().buffer.snapshot()
    }

    /// Status report.
    pub fn info(&self) -> SessionInfo {
        let state = self.state();
        let ready = self.is_ready();
        let runtime = self.lock_runtime();

        SessionInfo {
            state,
            ready,
            session_id: runtime.as_ref().map(|rt| rt.id),
            invocation: runtime.as_ref().and_then(|rt| rt.invocation.clone()),
            pid: runtime
                .as_ref()
                .and_then(|rt| rt.process.as_ref())
                .and_then(|p| p.pid()),
            started_at: runtime.as_ref().map(|rt| rt.started_at.to_rfc3339()),
            commands_executed: self.commands_executed.load(Ordering::SeqCst),
            canned: self.canned.is_some(),
        }
    }

    /// Start the CLI and wait for its prompt. Returns immediately when ready.
    ///
    /// Only one caller starts the process; concurrent callers wait for that
    /// start and share its outcome.
    pub fn start_session(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        if self
            .starting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return self.wait_for_concurrent_start();
        }
        let _guard = StartGuard(&self.starting);

        if self.is_ready() {
            return Ok(());
        }

        let started = Instant::now();
        let result = self.start_inner();

        match &result {
            Ok(()) => {
                info!("Session started in {:?}", started.elapsed());
                *self
                    .start_failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = None;
            }
            Err(e) => {
                error!("Session start failed: {}", e);
                *self
                    .start_failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(replicate(e));
                self.teardown(format!("start failed: {e}"), false);
            }
        }

        result
    }

    fn wait_for_concurrent_start(&self) -> Result<()> {
        debug!("Session start already in progress, waiting");
        let interval = Duration::from_millis(self.settings.start_wait_interval_ms);

        for _ in 0..self.settings.start_wait_attempts {
            if !self.starting.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(interval);
        }

        if self.is_ready() {
            return Ok(());
        }
        if self.starting.load(Ordering::SeqCst) {
            let waited = interval * self.settings.start_wait_attempts;
            return Err(Error::InitializationTimeout {
                timeout_secs: whole_secs(waited),
                output: self.output_snapshot(),
            });
        }

        match self
            .start_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(e) => Err(replicate(e)),
            None => Err(Error::ProcessStartFailure(
                "session is not ready after a concurrent start".to_string(),
            )),
        }
    }

    fn resolve_invocation(&self) -> Result<Invocation> {
        match &self.invocation {
            Some(invocation) => Ok(invocation.clone()),
            None => self.locator.locate(),
        }
    }

    fn start_inner(&self) -> Result<()> {
        // Collect whatever a previous runtime left behind.
        if let Some(previous) = self.lock_runtime().take() {
            debug!("Cleaning up previous runtime: id={}", previous.id);
            previous.shutdown(None);
        }

        let session_id = SessionId::new();
        {
            let mut core = self.shared.lock();
            core.session_id = Some(session_id);
            core.pending = None;
            core.exit_reason = None;
            core.buffer.clear();
            core.last_write = None;
            // A detached consumer from the previous runtime may have left any
            // state behind, so this is a reset rather than a transition.
            core.state = SessionState::Starting;
        }

        if self.canned.is_some() {
            *self.lock_runtime() = Some(SessionRuntime::canned(session_id));
            self.shared.lock().set_state(SessionState::Ready);
            self.shared.notify();
            info!("Session started in test mode: id={}", session_id);
            return Ok(());
        }

        let invocation = self.resolve_invocation()?;
        let args = match invocation.kind {
            InvocationKind::Configured => invocation.args.clone(),
            _ => invocation.args_with(&self.settings.shell_args),
        };

        let mut spec = SpawnSpec::new(invocation.program.clone(), args)
            .with_size(self.settings.rows, self.settings.cols);
        for (key, value) in SPAWN_ENV {
            spec = spec.with_env(key, value);
        }
        for (key, value) in &self.settings.env {
            spec = spec.with_env(key.clone(), value.clone());
        }
        if let Some(cwd) = &self.settings.cwd {
            spec = spec.with_cwd(cwd.clone());
        }

        info!(
            "Starting session: id={}, invocation='{}', platform={}",
            session_id, invocation, self.platform
        );

        let process = Arc::new(ProcessHandle::spawn(&spec)?);
        let reader = process.take_reader().ok_or_else(|| {
            Error::ProcessStartFailure("PTY output reader unavailable".to_string())
        })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let consumer = OutputConsumer {
            shared: Arc::clone(&self.shared),
            classifier: Arc::clone(&self.classifier),
            process: Arc::clone(&process),
            shutdown: Arc::clone(&shutdown),
            session_id,
            line_ending: self.platform.line_ending(),
        };
        let handle = std::thread::Builder::new()
            .name("commander-output".to_string())
            .spawn(move || consumer.run(reader))
            .map_err(|e| {
                Error::ProcessStartFailure(format!("Failed to start output consumer: {e}"))
            })?;

        *self.lock_runtime() = Some(SessionRuntime {
            id: session_id,
            invocation: Some(invocation.clone()),
            process: Some(Arc::clone(&process)),
            consumer: Some(handle),
            shutdown,
            started_at: Utc::now(),
        });

        std::thread::sleep(Duration::from_millis(self.settings.spawn_settle_ms));
        if !process.is_alive() {
            let output = self.output_snapshot();
            let mut message = format!(
                "'{}' exited right after launch (exit code {:?})",
                invocation,
                process.exit_code()
            );
            if !output.trim().is_empty() {
                message.push('\n');
                message.push_str(output.trim());
            }
            return Err(Error::ProcessStartFailure(message));
        }

        let timeout = self.settings.startup_timeout(self.platform);
        debug!("Waiting up to {:?} for the interactive prompt", timeout);
        wait::wait_for_ready(&self.shared, timeout, || process.is_alive())
            .map_err(|failure| failure.into_error(timeout))?;

        info!(
            "Session ready: id={}, pid={:?}",
            session_id,
            process.pid()
        );
        Ok(())
    }

    /// Mark the session dead and release the runtime.
    fn teardown(&self, reason: String, graceful: bool) {
        let runtime = self.lock_runtime().take();

        {
            let mut core = self.shared.lock();
            core.mark_dead(reason);
        }
        self.shared.notify();

        if let Some(runtime) = runtime {
            let quit = graceful.then(|| {
                (
                    self.settings.quit_command.as_str(),
                    self.platform.line_ending(),
                    Duration::from_millis(self.settings.shutdown_grace_ms),
                )
            });
            runtime.shutdown(quit);
        }
    }

    /// Stop the CLI: ask it to quit, then kill it.
    ///
    /// Safe to call repeatedly and from any thread. A command in flight fails
    /// with `CommandIoFailure`.
    pub fn stop_session(&self) {
        let has_runtime = self.lock_runtime().is_some();
        if !has_runtime {
            debug!("stop_session: no running session");
            return;
        }
        info!("Stopping session");
        self.teardown("stopped".to_string(), true);
    }

    /// Run one command and return its response text.
    ///
    /// Starts the session on demand. The echoed command line and prompt lines
    /// are removed from the response.
    pub fn execute_command(&self, command: &str, timeout: Duration) -> Result<String> {
        let command = validate_command(command)?;
        let _submission = self
            .command_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !self.is_ready() {
            info!("Session not ready, starting before '{}'", command);
            self.start_session()?;
        }

        if let Some(canned) = &self.canned {
            return Ok(self.respond_canned(canned, command));
        }

        let io_failure = |message: String| Error::CommandIoFailure {
            command: command.to_string(),
            message,
        };

        let process = self
            .lock_runtime()
            .as_ref()
            .and_then(|rt| rt.process.clone())
            .ok_or_else(|| io_failure("session is not running".to_string()))?;

        let settled = wait::wait_for_idle(
            &self.shared,
            Duration::from_millis(self.settings.idle_settle_ms),
            Duration::from_millis(self.settings.max_settle_ms),
        );

        let id = self.next_command_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = sync_channel(1);
        {
            let mut core = self.shared.lock();
            if core.state != SessionState::Ready {
                return Err(io_failure(format!("session is {}", core.state)));
            }
            core.buffer.clear();
            core.pending = Some(CommandExecution::new(id, command.to_string(), sender));
            core.set_state(SessionState::Busy);
            core.last_write = Some(Instant::now());
        }

        debug!(
            "Submitting command #{}: '{}' (settled after {:?})",
            id, command, settled
        );

        if let Err(e) = process.write_line(command, self.platform.line_ending()) {
            let mut core = self.shared.lock();
            if core.pending.as_ref().is_some_and(|p| p.id == id) {
                core.pending = None;
                if process.is_alive() {
                    core.set_state(SessionState::Ready);
                } else {
                    core.mark_dead(format!("write failed: {e}"));
                }
            }
            drop(core);
            self.shared.notify();
            return Err(io_failure(e.to_string()));
        }

        match receiver.recv_timeout(timeout) {
            Ok(response) => {
                self.commands_executed.fetch_add(1, Ordering::SeqCst);
                Ok(response)
            }
            Err(RecvTimeoutError::Timeout) => {
                let mut core = self.shared.lock();
                // Completion may have landed between the timeout and the lock.
                if let Ok(response) = receiver.try_recv() {
                    drop(core);
                    self.commands_executed.fetch_add(1, Ordering::SeqCst);
                    return Ok(response);
                }

                let output = core.buffer.snapshot();
                if core.pending.as_ref().is_some_and(|p| p.id == id) {
                    core.pending = None;
                    if process.is_alive() {
                        core.set_state(SessionState::Ready);
                    } else {
                        core.mark_dead(format!("process exited during '{command}'"));
                    }
                }
                drop(core);
                self.shared.notify();

                warn!("Command #{} '{}' timed out after {:?}", id, command, timeout);
                Err(Error::CommandTimeout {
                    command: command.to_string(),
                    timeout_secs: whole_secs(timeout),
                    output,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                let reason = self
                    .shared
                    .lock()
                    .exit_reason
                    .clone()
                    .unwrap_or_else(|| "session terminated".to_string());
                warn!("Command #{} '{}' lost its session: {}", id, command, reason);
                Err(io_failure(format!(
                    "session ended while the command was running: {reason}"
                )))
            }
        }
    }

    fn respond_canned(&self, canned: &CannedResponses, command: &str) -> String {
        {
            let mut core = self.shared.lock();
            core.set_state(SessionState::Busy);
            core.set_state(SessionState::Ready);
        }
        let response = canned.respond(command);
        debug!("Canned response for '{}': {} bytes", command, response.len());
        self.commands_executed.fetch_add(1, Ordering::SeqCst);
        response
    }

    /// Run `command` through the retry/validation layer.
    pub fn execute_with_retry(&self, command: &str, config: &RetryConfig) -> Result<String> {
        retry::execute_with_retry(self, command, config)
    }
}

impl CommandExecutor for SessionEngine {
    fn execute_command(&self, command: &str, timeout: Duration) -> Result<String> {
        SessionEngine::execute_command(self, command, timeout)
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        self.stop_session();
    }
}
