//! Subprocess handling with portable-pty.
//!
//! The external CLI uses an interactive line editor that refuses to run on a
//! plain pipe, so it is always hosted on a pseudo-terminal.

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

use commander_core::{Error, Result};

/// Everything needed to launch the subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    /// Program to execute
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Environment variables added to the inherited environment
    pub env: Vec<(String, String)>,
    /// Working directory
    pub cwd: Option<String>,
    /// PTY rows
    pub rows: u16,
    /// PTY columns
    pub cols: u16,
}

impl SpawnSpec {
    /// Spec with default terminal size and no extra environment.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            cwd: None,
            rows: 40,
            cols: 200,
        }
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the terminal size.
    pub fn with_size(mut self, rows: u16, cols: u16) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }
}

/// Handle to a spawned PTY process.
///
/// Owns the child exclusively. The reader is handed out once to the output
/// consumer; the writer stays here behind its own lock.
pub struct ProcessHandle {
    /// The master PTY end (dropped on close to hang up the terminal)
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    /// The child process
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    /// PTY writer
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    /// PTY reader, until taken by the consumer
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    /// OS process id
    pid: Option<u32>,
    /// Program name for logs
    program: String,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Spawn a new PTY process.
    ///
    /// # Example
    /// ```no_run
    /// use commander_process::{ProcessHandle, SpawnSpec};
    ///
    /// # fn example() -> commander_core::Result<()> {
    /// let spec = SpawnSpec::new("keeper", vec!["shell".to_string()]).with_env("NO_COLOR", "1");
    /// let process = ProcessHandle::spawn(&spec)?;
    /// assert!(process.is_alive());
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(spec: &SpawnSpec) -> Result<Self> {
        info!(
            "Spawning process: program='{}' args={:?}, size={}x{}, cwd={:?}",
            spec.program, spec.args, spec.rows, spec.cols, spec.cwd
        );

        let pty_system = native_pty_system();

        let pty_size = PtySize {
            rows: spec.rows,
            cols: spec.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        debug!("Opening PTY with native system");
        let pair = pty_system.openpty(pty_size).map_err(|e| {
            error!("Failed to open PTY: {}", e);
            Error::ProcessStartFailure(format!("Failed to open PTY: {e}"))
        })?;

        let mut cmd = CommandBuilder::new(&spec.program);
        for arg in &spec.args {
            cmd.arg(arg);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.cwd {
            debug!("Setting working directory to: {}", dir);
            cmd.cwd(dir);
        }

        debug!("Spawning child process: {}", spec.program);
        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", spec.program, e);
            Error::ProcessStartFailure(format!("Failed to spawn '{}': {e}", spec.program))
        })?;

        // The child holds its own copy of the slave; keeping ours open would
        // stop reads from ever seeing EOF when the child exits.
        drop(pair.slave);

        let writer = pair.master.take_writer().map_err(|e| {
            error!("Failed to take PTY writer: {}", e);
            Error::ProcessStartFailure(format!("Failed to take writer: {e}"))
        })?;

        let reader = pair.master.try_clone_reader().map_err(|e| {
            error!("Failed to clone PTY reader: {}", e);
            Error::ProcessStartFailure(format!("Failed to clone reader: {e}"))
        })?;

        let pid = child.process_id();
        info!("Process spawned: program='{}', pid={:?}", spec.program, pid);

        Ok(Self {
            master: Mutex::new(Some(pair.master)),
            child: Mutex::new(Some(child)),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            pid,
            program: spec.program.clone(),
        })
    }

    /// OS process id, if the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Program that was spawned.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Take the blocking output reader. Returns `None` after the first call.
    pub fn take_reader(&self) -> Option<Box<dyn Read + Send>> {
        self.reader.lock().ok()?.take()
    }

    /// Write data to the PTY and flush it.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        debug!("Writing {} bytes to PTY", data.len());

        let mut writer_lock = self
            .writer
            .lock()
            .map_err(|e| Error::Other(format!("Writer lock error: {e}")))?;

        let writer = writer_lock.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "PTY writer closed",
            ))
        })?;

        writer.write_all(data)?;
        writer.flush()?;

        Ok(data.len())
    }

    /// Write `text` followed by `line_ending`.
    pub fn write_line(&self, text: &str, line_ending: &str) -> Result<usize> {
        let mut line = String::with_capacity(text.len() + line_ending.len());
        line.push_str(text);
        line.push_str(line_ending);
        self.write(line.as_bytes())
    }

    /// Check if the child process is still running.
    pub fn is_alive(&self) -> bool {
        let mut child_lock = match self.child.lock() {
            Ok(c) => c,
            Err(_) => return false,
        };

        let child = match child_lock.as_mut() {
            Some(c) => c,
            None => return false,
        };

        child.try_wait().ok().flatten().is_none()
    }

    /// Exit code, if the child has exited.
    pub fn exit_code(&self) -> Option<u32> {
        let mut child_lock = self.child.lock().ok()?;
        let child = child_lock.as_mut()?;
        child
            .try_wait()
            .ok()
            .flatten()
            .map(|status| status.exit_code())
    }

    /// Kill the child process.
    pub fn kill(&self) -> Result<()> {
        info!("Killing process: program='{}', pid={:?}", self.program, self.pid);

        let mut child_lock = self
            .child
            .lock()
            .map_err(|e| Error::Other(format!("Child lock error: {e}")))?;

        let child = match child_lock.as_mut() {
            Some(c) => c,
            None => return Ok(()),
        };

        if child.try_wait().ok().flatten().is_some() {
            debug!("Process already exited, nothing to kill");
            return Ok(());
        }

        child.kill()?;

        // Reap so the pid does not linger as a zombie.
        if let Err(e) = child.wait() {
            debug!("Wait after kill failed: {}", e);
        }
        Ok(())
    }

    /// Kill the child and release the terminal.
    ///
    /// Dropping the master hangs up the PTY, which ends any blocking read on
    /// the consumer side.
    pub fn close(&self) {
        if let Err(e) = self.kill() {
            warn!("Failed to kill process {:?}: {}", self.pid, e);
        }
        if let Ok(mut writer) = self.writer.lock() {
            writer.take();
        }
        if let Ok(mut master) = self.master.lock() {
            master.take();
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.close();
    }
}
