//! Configuration types for the Commander session engine.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Platform;

/// Top-level configuration loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CommanderConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Session engine settings
    pub session: SessionSettings,
    /// CLI locator settings
    pub locator: LocatorSettings,
    /// Prompt and status markers
    pub markers: MarkerSettings,
    /// Retry defaults
    pub retry: RetrySettings,
}

impl CommanderConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: CommanderConfig =
            serde_yaml::from_str(yaml).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        self.session.validate()?;
        self.locator.validate()?;
        self.markers.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Transport type (only stdio is supported)
    pub transport: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            transport: "stdio".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Session engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Arguments appended to a located invocation to enter interactive mode
    pub shell_args: Vec<String>,
    /// Extra environment variables for the subprocess
    pub env: BTreeMap<String, String>,
    /// Working directory for the subprocess
    pub cwd: Option<String>,
    /// Startup window override in seconds (None = platform default)
    pub startup_timeout_secs: Option<u64>,
    /// Delay after spawn before checking the process is still alive
    pub spawn_settle_ms: u64,
    /// Required output silence before a command is submitted
    pub idle_settle_ms: u64,
    /// Upper bound on waiting for output silence
    pub max_settle_ms: u64,
    /// Command written during graceful shutdown
    pub quit_command: String,
    /// Grace period after the quit command before the process is killed
    pub shutdown_grace_ms: u64,
    /// Poll attempts while another caller is starting the session
    pub start_wait_attempts: u32,
    /// Interval between those poll attempts
    pub start_wait_interval_ms: u64,
    /// Default per-command timeout in seconds
    pub command_timeout_secs: u64,
    /// Maximum retained output in bytes (oldest text is dropped)
    pub max_buffer_bytes: usize,
    /// PTY rows
    pub rows: u16,
    /// PTY columns
    pub cols: u16,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            shell_args: vec!["shell".to_string()],
            env: BTreeMap::new(),
            cwd: None,
            startup_timeout_secs: None,
            spawn_settle_ms: 500,
            idle_settle_ms: 150,
            max_settle_ms: 2000,
            quit_command: "quit".to_string(),
            shutdown_grace_ms: 300,
            start_wait_attempts: 300,
            start_wait_interval_ms: 100,
            command_timeout_secs: 30,
            max_buffer_bytes: 4 * 1024 * 1024,
            rows: 40,
            cols: 200,
        }
    }
}

impl SessionSettings {
    /// Startup window for the given platform, honoring the override.
    pub fn startup_timeout(&self, platform: Platform) -> Duration {
        self.startup_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| platform.default_startup_timeout())
    }

    /// Validate session settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.startup_timeout_secs == Some(0) {
            return Err(crate::Error::Config(
                "session.startup_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "session.command_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.start_wait_attempts == 0 {
            return Err(crate::Error::Config(
                "session.start_wait_attempts must be > 0".to_string(),
            ));
        }
        if self.max_settle_ms < self.idle_settle_ms {
            return Err(crate::Error::Config(
                "session.max_settle_ms must be >= session.idle_settle_ms".to_string(),
            ));
        }
        if self.max_buffer_bytes < 1024 {
            return Err(crate::Error::Config(
                "session.max_buffer_bytes must be at least 1024".to_string(),
            ));
        }
        if self.rows == 0 || self.cols == 0 {
            return Err(crate::Error::Config(
                "session terminal dimensions must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// CLI locator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorSettings {
    /// Executable base names to look for (without extension)
    pub executable_names: Vec<String>,
    /// Python module for `<interpreter> -m <module>` forms
    pub module: String,
    /// Interpreters to try (empty = platform default)
    pub interpreters: Vec<String>,
    /// Argument used to verify a candidate
    pub version_arg: String,
    /// Substring that must appear in the verification output
    pub version_banner: String,
    /// Per-candidate verification timeout
    pub verify_timeout_ms: u64,
    /// Wall-clock ceiling for the whole detection
    pub detection_timeout_ms: u64,
    /// Paths tried before any built-in candidate
    pub extra_paths: Vec<String>,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            executable_names: vec!["keeper".to_string()],
            module: "keepercommander".to_string(),
            interpreters: Vec::new(),
            version_arg: "--version".to_string(),
            version_banner: "Commander".to_string(),
            verify_timeout_ms: 5000,
            detection_timeout_ms: 30_000,
            extra_paths: Vec::new(),
        }
    }
}

impl LocatorSettings {
    /// Validate locator settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.executable_names.iter().all(|n| n.trim().is_empty()) {
            return Err(crate::Error::Config(
                "locator.executable_names must contain a name".to_string(),
            ));
        }
        if self.version_banner.trim().is_empty() {
            return Err(crate::Error::Config(
                "locator.version_banner cannot be empty".to_string(),
            ));
        }
        if self.verify_timeout_ms == 0 || self.detection_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "locator timeouts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Markers recognized in the subprocess output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSettings {
    /// Interactive prompt markers (authenticated and unauthenticated)
    pub prompt_markers: Vec<String>,
    /// Literal terminal status phrases
    pub status_phrases: Vec<String>,
    /// Regular expressions for terminal status lines
    pub status_patterns: Vec<String>,
}

impl Default for MarkerSettings {
    fn default() -> Self {
        Self {
            prompt_markers: vec!["My Vault>".to_string(), "Not logged in>".to_string()],
            status_phrases: vec![
                "Successfully authenticated".to_string(),
                "Login failed".to_string(),
                "Session expired".to_string(),
            ],
            status_patterns: vec![r"Decrypted \[\d+\] record\(s\)".to_string()],
        }
    }
}

impl MarkerSettings {
    /// Validate marker settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.prompt_markers.is_empty() {
            return Err(crate::Error::Config(
                "markers.prompt_markers cannot be empty".to_string(),
            ));
        }
        if self.prompt_markers.iter().any(|m| m.trim().is_empty()) {
            return Err(crate::Error::Config(
                "markers.prompt_markers cannot contain blank markers".to_string(),
            ));
        }
        for pattern in &self.status_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                crate::Error::Config(format!("Invalid status pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }
}

/// Defaults applied to the retry presets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per call (including the first)
    pub max_retries: u32,
    /// Per-attempt timeout for ordinary commands
    pub timeout_secs: u64,
    /// Per-attempt timeout for commands returning arrays (listings)
    pub array_timeout_secs: u64,
    /// Delay between attempts
    pub retry_delay_ms: u64,
    /// Delay multiplier applied per attempt (1.0 = constant delay)
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_secs: 30,
            array_timeout_secs: 60,
            retry_delay_ms: 1000,
            backoff_multiplier: 1.0,
        }
    }
}

impl RetrySettings {
    /// Validate retry settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_retries == 0 {
            return Err(crate::Error::Config(
                "retry.max_retries must be > 0".to_string(),
            ));
        }
        if self.timeout_secs == 0 || self.array_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "retry timeouts must be > 0".to_string(),
            ));
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(crate::Error::Config(
                "retry.backoff_multiplier must be a finite value >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CommanderConfig::default();
        assert_eq!(config.server.transport, "stdio");
        assert_eq!(config.session.shell_args, vec!["shell"]);
        assert_eq!(config.locator.module, "keepercommander");
        assert_eq!(config.markers.prompt_markers.len(), 2);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_config_validation() {
        let config = CommanderConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_startup_timeout_override() {
        let mut settings = SessionSettings::default();
        assert_eq!(
            settings.startup_timeout(Platform::Windows),
            Platform::Windows.default_startup_timeout()
        );

        settings.startup_timeout_secs = Some(5);
        assert_eq!(
            settings.startup_timeout(Platform::Windows),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_invalid_command_timeout() {
        let mut config = CommanderConfig::default();
        config.session.command_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_settle_window() {
        let mut config = CommanderConfig::default();
        config.session.idle_settle_ms = 500;
        config.session.max_settle_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_prompt_markers() {
        let mut config = CommanderConfig::default();
        config.markers.prompt_markers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_backoff() {
        let mut config = CommanderConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  log_level: debug

session:
  shell_args: ["shell", "--proxy", "http://proxy:3128"]
  env:
    KEEPER_SERVER: keepersecurity.eu
  startup_timeout_secs: 90
  idle_settle_ms: 200

locator:
  extra_paths:
    - /opt/keeper/bin/keeper
  verify_timeout_ms: 3000

markers:
  prompt_markers: ["My Vault>", "Not logged in>", "Enterprise>"]

retry:
  max_retries: 5
  retry_delay_ms: 250
  backoff_multiplier: 2.0
"#;

        let config = CommanderConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.session.shell_args.len(), 3);
        assert_eq!(
            config.session.env.get("KEEPER_SERVER").map(String::as_str),
            Some("keepersecurity.eu")
        );
        assert_eq!(config.session.startup_timeout_secs, Some(90));
        assert_eq!(config.session.idle_settle_ms, 200);
        // Unspecified values keep their defaults
        assert_eq!(config.session.quit_command, "quit");
        assert_eq!(config.locator.extra_paths, vec!["/opt/keeper/bin/keeper"]);
        assert_eq!(config.locator.verify_timeout_ms, 3000);
        assert_eq!(config.markers.prompt_markers.len(), 3);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_invalid_status_pattern() {
        let yaml = r#"
markers:
  status_patterns:
    - "([unclosed"
"#;

        let result = CommanderConfig::from_yaml(yaml);
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = CommanderConfig::from_yaml("session: [not, a, map");
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }
}
