//! Discovery of the external CLI.
//!
//! The CLI is usually a Python console script, so it may live in a user
//! `Scripts` directory, behind a package-manager shim, or only be reachable as
//! `python -m <module>`. Candidates are tried in a fixed order and each one is
//! verified by running it with the version argument.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use commander_core::{Error, Invocation, InvocationKind, LocatorSettings, Platform, Result};

/// Python minor versions with per-version user install directories.
const PYTHON_MINOR_VERSIONS: [u32; 7] = [7, 8, 9, 10, 11, 12, 13];

/// Poll interval while waiting for a verification process.
const VERIFY_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Directories that influence the built-in candidate lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateEnv {
    /// User home directory
    pub home: Option<PathBuf>,
    /// Roaming application data (`%APPDATA%`)
    pub app_data: Option<PathBuf>,
    /// Local application data (`%LOCALAPPDATA%`)
    pub local_app_data: Option<PathBuf>,
}

impl CandidateEnv {
    /// Read the directories from the running system.
    pub fn from_system() -> Self {
        Self {
            home: dirs::home_dir(),
            app_data: std::env::var_os("APPDATA").map(PathBuf::from),
            local_app_data: std::env::var_os("LOCALAPPDATA")
                .map(PathBuf::from)
                .or_else(|| {
                    if cfg!(windows) {
                        dirs::data_local_dir()
                    } else {
                        None
                    }
                }),
        }
    }

    /// Environment rooted at a single home directory.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: Some(home.into()),
            ..Default::default()
        }
    }
}

/// Direct executable paths for `name` on `platform`, most specific first.
pub fn executable_candidates(platform: Platform, env: &CandidateEnv, name: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();

    match platform {
        Platform::Windows => {
            let exe = format!("{name}.exe");
            if let Some(local) = &env.local_app_data {
                for minor in PYTHON_MINOR_VERSIONS.iter().rev() {
                    out.push(
                        local
                            .join("Programs")
                            .join("Python")
                            .join(format!("Python3{minor}"))
                            .join("Scripts")
                            .join(&exe),
                    );
                }
                out.push(local.join("Programs").join("Keeper Commander").join(&exe));
            }
            if let Some(roaming) = &env.app_data {
                for minor in PYTHON_MINOR_VERSIONS.iter().rev() {
                    out.push(
                        roaming
                            .join("Python")
                            .join(format!("Python3{minor}"))
                            .join("Scripts")
                            .join(&exe),
                    );
                }
            }
            if let Some(home) = &env.home {
                // pipx
                out.push(home.join(".local").join("bin").join(&exe));
                out.push(home.join("scoop").join("shims").join(&exe));
            }
            out.push(PathBuf::from(r"C:\Program Files\Keeper Commander").join(&exe));
            out.push(PathBuf::from(r"C:\Program Files (x86)\Keeper Commander").join(&exe));
        }
        Platform::MacOS => {
            out.push(PathBuf::from("/opt/homebrew/bin").join(name));
            out.push(PathBuf::from("/usr/local/bin").join(name));
            if let Some(home) = &env.home {
                out.push(home.join(".local").join("bin").join(name));
                out.push(home.join(".pyenv").join("shims").join(name));
                for minor in PYTHON_MINOR_VERSIONS.iter().rev() {
                    out.push(
                        home.join("Library")
                            .join("Python")
                            .join(format!("3.{minor}"))
                            .join("bin")
                            .join(name),
                    );
                }
            }
            for minor in PYTHON_MINOR_VERSIONS.iter().rev() {
                out.push(
                    PathBuf::from("/Library/Frameworks/Python.framework/Versions")
                        .join(format!("3.{minor}"))
                        .join("bin")
                        .join(name),
                );
            }
        }
        Platform::Linux | Platform::WSL | Platform::Other => {
            if let Some(home) = &env.home {
                out.push(home.join(".local").join("bin").join(name));
                out.push(home.join(".pyenv").join("shims").join(name));
            }
            out.push(PathBuf::from("/usr/local/bin").join(name));
            out.push(PathBuf::from("/usr/bin").join(name));
            out.push(PathBuf::from("/snap/bin").join(name));
            out.push(PathBuf::from("/home/linuxbrew/.linuxbrew/bin").join(name));
        }
    }

    out
}

/// Interpreters tried for the `-m <module>` form.
pub fn default_interpreters(platform: Platform) -> Vec<String> {
    let mut interpreters = vec!["python3".to_string(), "python".to_string()];
    if platform == Platform::Windows {
        interpreters.push("py".to_string());
    }
    interpreters
}

/// Actionable message shown when no working candidate was found.
pub fn install_diagnostic(platform: Platform, settings: &LocatorSettings, tried: usize) -> String {
    let name = settings
        .executable_names
        .first()
        .map(String::as_str)
        .unwrap_or("keeper");
    let module = &settings.module;

    let steps = match platform {
        Platform::Windows => format!(
            "  - Run the Keeper Commander Windows installer from the official releases page\n\
             \x20 - Or install with pip: py -m pip install {module}\n\
             \x20 - Or with pipx: pipx install {module}\n\
             Make sure the Python Scripts directory is on PATH, then restart."
        ),
        Platform::MacOS => format!(
            "  - With Homebrew Python: brew install python && pip3 install {module}\n\
             \x20 - Or with pipx: brew install pipx && pipx install {module}\n\
             \x20 - Or for the current user: pip3 install --user {module}\n\
             Make sure ~/.local/bin or the Homebrew bin directory is on PATH."
        ),
        Platform::Linux | Platform::WSL | Platform::Other => format!(
            "  - With pipx: pipx install {module}\n\
             \x20 - Or for the current user: pip3 install --user {module}\n\
             Make sure ~/.local/bin is on PATH."
        ),
    };

    format!(
        "Could not find a working '{name}' command on {platform} ({tried} candidates checked).\n\
         Install Keeper Commander:\n{steps}\n\
         If it is installed in a custom location, add the full path to locator.extra_paths."
    )
}

/// Finds and verifies the external CLI, caching the first working invocation.
#[derive(Debug)]
pub struct CliLocator {
    settings: LocatorSettings,
    platform: Platform,
    env: CandidateEnv,
    cache: Mutex<Option<Invocation>>,
}

impl CliLocator {
    /// Create a locator for the running system.
    pub fn new(settings: LocatorSettings) -> Self {
        Self::with_env(settings, Platform::detect(), CandidateEnv::from_system())
    }

    /// Create a locator with an explicit platform and directory set.
    pub fn with_env(settings: LocatorSettings, platform: Platform, env: CandidateEnv) -> Self {
        Self {
            settings,
            platform,
            env,
            cache: Mutex::new(None),
        }
    }

    /// Platform the candidate lists are built for.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Forget the cached invocation.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    /// Cached invocation, if detection has already succeeded.
    pub fn cached(&self) -> Option<Invocation> {
        self.cache.lock().ok().and_then(|c| c.clone())
    }

    /// Return a working invocation, running detection on first use.
    pub fn locate(&self) -> Result<Invocation> {
        if let Some(invocation) = self.cached() {
            debug!("Using cached CLI invocation: {}", invocation);
            return Ok(invocation);
        }

        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.settings.detection_timeout_ms);
        let verify_timeout = Duration::from_millis(self.settings.verify_timeout_ms);
        let mut tried = 0usize;

        info!("Detecting CLI on {}", self.platform);

        for candidate in self.static_candidates() {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "CLI detection ceiling reached after {:?}, skipping remaining candidates",
                    started.elapsed()
                );
                return Err(self.not_found(tried));
            }

            tried += 1;
            let budget = verify_timeout.min(deadline - now);
            if self.verify(&candidate, budget) {
                return Ok(self.remember(candidate, started));
            }
        }

        for name in &self.settings.executable_names {
            for found in self.path_lookup(name, deadline) {
                let now = Instant::now();
                if now >= deadline {
                    return Err(self.not_found(tried));
                }

                tried += 1;
                let candidate = Invocation::executable(found).with_kind(InvocationKind::SearchPath);
                if self.verify(&candidate, verify_timeout.min(deadline - now)) {
                    return Ok(self.remember(candidate, started));
                }
            }
        }

        Err(self.not_found(tried))
    }

    /// Candidates that need no lookup: configured paths, existing platform
    /// paths, then interpreter-module forms.
    pub fn static_candidates(&self) -> Vec<Invocation> {
        let mut out: Vec<Invocation> = self
            .settings
            .extra_paths
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| Invocation::executable(p.clone()))
            .collect();

        for name in &self.settings.executable_names {
            for path in executable_candidates(self.platform, &self.env, name) {
                if path.is_file() {
                    out.push(Invocation::executable(path.to_string_lossy().into_owned()));
                }
            }
        }

        let interpreters = if self.settings.interpreters.is_empty() {
            default_interpreters(self.platform)
        } else {
            self.settings.interpreters.clone()
        };
        for interpreter in interpreters {
            out.push(Invocation::module(interpreter, self.settings.module.clone()));
        }

        out
    }

    fn remember(&self, invocation: Invocation, started: Instant) -> Invocation {
        info!(
            "CLI located: {} ({:?}) in {:?}",
            invocation,
            invocation.kind,
            started.elapsed()
        );
        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(invocation.clone());
        }
        invocation
    }

    fn not_found(&self, tried: usize) -> Error {
        warn!("CLI not found after checking {} candidates", tried);
        Error::CliNotFound(install_diagnostic(self.platform, &self.settings, tried))
    }

    /// Run the candidate with the version argument and look for the banner.
    fn verify(&self, candidate: &Invocation, timeout: Duration) -> bool {
        let args = candidate.args_with(std::slice::from_ref(&self.settings.version_arg));
        debug!("Verifying candidate: {} {:?}", candidate.program, args);

        match run_with_timeout(&candidate.program, &args, timeout) {
            Some(output) if output.contains(&self.settings.version_banner) => true,
            Some(output) => {
                debug!(
                    "Candidate {} did not print '{}': {:?}",
                    candidate,
                    self.settings.version_banner,
                    output.lines().next().unwrap_or("")
                );
                false
            }
            None => false,
        }
    }

    /// Ask `which`/`where` for every match of `name` on PATH.
    fn path_lookup(&self, name: &str, deadline: Instant) -> Vec<String> {
        let now = Instant::now();
        if now >= deadline {
            return Vec::new();
        }
        let budget = Duration::from_millis(self.settings.verify_timeout_ms).min(deadline - now);

        let lookup = self.platform.path_lookup_command();
        run_with_timeout(lookup, &[name.to_string()], budget)
            .map(|output| {
                output
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && Path::new(line).is_absolute())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Run a program to completion, returning stdout and stderr combined.
///
/// Returns `None` if the program could not be started, exited unsuccessfully
/// without output, or did not finish within `timeout` (it is killed).
fn run_with_timeout(program: &str, args: &[String], timeout: Duration) -> Option<String> {
    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            debug!("Failed to run {}: {}", program, e);
            return None;
        }
    };

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_status)) => break,
            Ok(None) => {
                if start.elapsed() >= timeout {
                    debug!("{} timed out after {:?}, killing", program, timeout);
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(VERIFY_POLL_INTERVAL);
            }
            Err(e) => {
                debug!("Failed to wait for {}: {}", program, e);
                return None;
            }
        }
    }

    let output = child.wait_with_output().ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = format!("{stdout}{stderr}");

    if combined.trim().is_empty() && !output.status.success() {
        return None;
    }
    Some(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolated_settings() -> LocatorSettings {
        LocatorSettings {
            executable_names: vec!["commander-locator-test-missing".to_string()],
            interpreters: vec!["/nonexistent/interpreter".to_string()],
            verify_timeout_ms: 2000,
            detection_timeout_ms: 10_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_candidates_non_empty_per_platform() {
        let env = CandidateEnv {
            home: Some(PathBuf::from("/home/user")),
            app_data: Some(PathBuf::from("/appdata/roaming")),
            local_app_data: Some(PathBuf::from("/appdata/local")),
        };

        for platform in [
            Platform::Linux,
            Platform::MacOS,
            Platform::Windows,
            Platform::WSL,
            Platform::Other,
        ] {
            let candidates = executable_candidates(platform, &env, "keeper");
            assert!(!candidates.is_empty(), "no candidates for {platform}");
        }
    }

    #[test]
    fn test_windows_candidates_use_exe() {
        let env = CandidateEnv {
            home: None,
            app_data: Some(PathBuf::from("/appdata/roaming")),
            local_app_data: Some(PathBuf::from("/appdata/local")),
        };
        let candidates = executable_candidates(Platform::Windows, &env, "keeper");

        assert!(candidates
            .iter()
            .all(|p| p.to_string_lossy().ends_with("keeper.exe")));
        assert!(candidates
            .iter()
            .any(|p| p.to_string_lossy().contains("Python312")));
        assert!(candidates.iter().any(|p| p.starts_with("/appdata/roaming")));
    }

    #[test]
    fn test_macos_candidates_cover_homebrew_and_user_python() {
        let env = CandidateEnv::with_home("/Users/me");
        let candidates = executable_candidates(Platform::MacOS, &env, "keeper");

        assert_eq!(candidates[0], PathBuf::from("/opt/homebrew/bin/keeper"));
        assert!(candidates.contains(&PathBuf::from("/Users/me/Library/Python/3.11/bin/keeper")));
        assert!(candidates.contains(&PathBuf::from("/Users/me/.local/bin/keeper")));
    }

    #[test]
    fn test_linux_candidates_prefer_user_install() {
        let env = CandidateEnv::with_home("/home/me");
        let candidates = executable_candidates(Platform::Linux, &env, "keeper");

        assert_eq!(candidates[0], PathBuf::from("/home/me/.local/bin/keeper"));
        assert!(candidates.contains(&PathBuf::from("/snap/bin/keeper")));
    }

    #[test]
    fn test_default_interpreters() {
        assert_eq!(default_interpreters(Platform::Linux), vec!["python3", "python"]);
        assert_eq!(
            default_interpreters(Platform::Windows),
            vec!["python3", "python", "py"]
        );
    }

    #[test]
    fn test_diagnostic_names_install_method() {
        let settings = LocatorSettings::default();

        let windows = install_diagnostic(Platform::Windows, &settings, 4);
        assert!(windows.contains("installer"));
        assert!(windows.contains("keepercommander"));

        let mac = install_diagnostic(Platform::MacOS, &settings, 4);
        assert!(mac.contains("brew"));

        let linux = install_diagnostic(Platform::Linux, &settings, 4);
        assert!(linux.contains("pipx install keepercommander"));
        assert!(linux.contains("locator.extra_paths"));
    }

    #[test]
    fn test_static_candidates_order() {
        let mut settings = isolated_settings();
        settings.extra_paths = vec!["/opt/custom/keeper".to_string()];
        settings.interpreters = vec!["python3".to_string()];

        let locator = CliLocator::with_env(settings, Platform::Linux, CandidateEnv::default());
        let candidates = locator.static_candidates();

        assert_eq!(candidates[0].program, "/opt/custom/keeper");
        assert_eq!(candidates[0].kind, InvocationKind::Executable);
        let last = candidates.last().unwrap();
        assert_eq!(last.kind, InvocationKind::InterpreterModule);
        assert_eq!(last.args, vec!["-m", "keepercommander"]);
    }

    #[test]
    fn test_not_found_diagnostic() {
        let locator = CliLocator::with_env(
            isolated_settings(),
            Platform::Linux,
            CandidateEnv::default(),
        );

        match locator.locate() {
            Err(Error::CliNotFound(message)) => {
                assert!(message.contains("commander-locator-test-missing"));
            }
            other => panic!("expected CliNotFound, got {other:?}"),
        }
        assert!(locator.cached().is_none());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn write_script(dir: &Path, name: &str, body: &str) -> String {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        #[test]
        fn test_verifies_script_printing_banner() {
            let dir = tempfile::tempdir().unwrap();
            let script = write_script(dir.path(), "keeper", "echo 'Keeper Commander 16.11.0'");

            let mut settings = isolated_settings();
            settings.extra_paths = vec![script.clone()];
            let locator = CliLocator::with_env(settings, Platform::Linux, CandidateEnv::default());

            let invocation = locator.locate().unwrap();
            assert_eq!(invocation.program, script);
            assert_eq!(invocation.kind, InvocationKind::Executable);
            assert_eq!(locator.cached(), Some(invocation.clone()));

            // Cached result is returned even after the script disappears
            std::fs::remove_file(&script).unwrap();
            assert_eq!(locator.locate().unwrap(), invocation);

            locator.clear_cache();
            assert!(locator.locate().is_err());
        }

        #[test]
        fn test_rejects_script_without_banner() {
            let dir = tempfile::tempdir().unwrap();
            let script = write_script(dir.path(), "keeper", "echo 'some other tool 1.0'");

            let mut settings = isolated_settings();
            settings.extra_paths = vec![script];
            let locator = CliLocator::with_env(settings, Platform::Linux, CandidateEnv::default());

            assert!(matches!(locator.locate(), Err(Error::CliNotFound(_))));
        }

        #[test]
        fn test_falls_through_to_next_candidate() {
            let dir = tempfile::tempdir().unwrap();
            let broken = write_script(dir.path(), "broken", "exit 1");
            let good = write_script(dir.path(), "good", "echo 'Commander Version: 16.0' >&2");

            let mut settings = isolated_settings();
            settings.extra_paths = vec![broken, good.clone()];
            let locator = CliLocator::with_env(settings, Platform::Linux, CandidateEnv::default());

            assert_eq!(locator.locate().unwrap().program, good);
        }

        #[test]
        fn test_hanging_candidate_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let hanging = write_script(dir.path(), "keeper", "sleep 10");

            let mut settings = isolated_settings();
            settings.extra_paths = vec![hanging];
            settings.verify_timeout_ms = 300;
            let locator = CliLocator::with_env(settings, Platform::Linux, CandidateEnv::default());

            let start = Instant::now();
            assert!(locator.locate().is_err());
            assert!(start.elapsed() < Duration::from_secs(5));
        }

        #[test]
        fn test_detection_ceiling() {
            let dir = tempfile::tempdir().unwrap();
            let first = write_script(dir.path(), "slow1", "sleep 10");
            let second = write_script(dir.path(), "slow2", "sleep 10");
            let third = write_script(dir.path(), "good", "echo Commander");

            let mut settings = isolated_settings();
            settings.extra_paths = vec![first, second, third];
            settings.verify_timeout_ms = 400;
            settings.detection_timeout_ms = 600;
            let locator = CliLocator::with_env(settings, Platform::Linux, CandidateEnv::default());

            // The working candidate comes after the ceiling and is skipped
            let start = Instant::now();
            assert!(matches!(locator.locate(), Err(Error::CliNotFound(_))));
            assert!(start.elapsed() < Duration::from_secs(3));
        }
    }
}
