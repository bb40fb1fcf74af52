//! Platform detection for OS-specific startup heuristics.
//!
//! The interactive CLI starts at very different speeds depending on the host
//! (Python interpreter cold start, antivirus scanning on Windows), and the
//! install locations differ per OS. This module centralizes those decisions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Host platforms with distinct startup behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Native Linux (not WSL)
    Linux,
    /// macOS
    MacOS,
    /// Native Windows
    Windows,
    /// Windows Subsystem for Linux
    WSL,
    /// Any other target (BSDs, etc.)
    Other,
}

impl Platform {
    /// Detect the current platform at runtime.
    ///
    /// # Platform Detection Logic
    ///
    /// - **WSL**: Checks `/proc/version` for "microsoft" or "Microsoft" string
    /// - **Linux**: target_os = "linux" and not WSL
    /// - **macOS**: target_os = "macos"
    /// - **Windows**: target_os = "windows"
    /// - **Other**: everything else
    ///
    /// # Examples
    ///
    /// ```
    /// use commander_core::Platform;
    ///
    /// let platform = Platform::detect();
    /// println!("Running on: {:?}", platform);
    /// ```
    pub fn detect() -> Self {
        #[cfg(target_os = "linux")]
        {
            if Self::is_wsl() {
                return Platform::WSL;
            }
            Platform::Linux
        }

        #[cfg(target_os = "macos")]
        {
            Platform::MacOS
        }

        #[cfg(target_os = "windows")]
        {
            Platform::Windows
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            Platform::Other
        }
    }

    /// Check if running under Windows Subsystem for Linux (WSL).
    ///
    /// Detection strategies:
    /// 1. Check `/proc/version` for "microsoft" or "Microsoft"
    /// 2. Check for `/proc/sys/fs/binfmt_misc/WSLInterop` file
    #[cfg(target_os = "linux")]
    fn is_wsl() -> bool {
        if let Ok(version) = std::fs::read_to_string("/proc/version") {
            if version.to_lowercase().contains("microsoft") {
                return true;
            }
        }

        std::path::Path::new("/proc/sys/fs/binfmt_misc/WSLInterop").exists()
    }

    /// Get the platform name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Linux => "Linux",
            Platform::MacOS => "macOS",
            Platform::Windows => "Windows",
            Platform::WSL => "WSL",
            Platform::Other => "Other",
        }
    }

    /// Check if this is a Unix-like platform.
    pub fn is_unix(&self) -> bool {
        matches!(
            self,
            Platform::Linux | Platform::MacOS | Platform::WSL | Platform::Other
        )
    }

    /// Default time allowed for the interactive prompt to appear after spawn.
    ///
    /// Windows is slowest (interpreter start plus on-access scanning), macOS
    /// and Linux come next, unknown targets get the shortest window.
    pub fn default_startup_timeout(&self) -> Duration {
        match self {
            Platform::Windows => Duration::from_secs(45),
            Platform::MacOS | Platform::Linux | Platform::WSL => Duration::from_secs(30),
            Platform::Other => Duration::from_secs(20),
        }
    }

    /// Line terminator to send after a command.
    pub fn line_ending(&self) -> &'static str {
        match self {
            Platform::Windows => "\r\n",
            _ => "\n",
        }
    }

    /// Command used to search `PATH` for an executable.
    pub fn path_lookup_command(&self) -> &'static str {
        match self {
            Platform::Windows => "where",
            _ => "which",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_detect() {
        let platform = Platform::detect();

        #[cfg(target_os = "linux")]
        assert!(matches!(platform, Platform::Linux | Platform::WSL));

        #[cfg(target_os = "macos")]
        assert_eq!(platform, Platform::MacOS);

        #[cfg(target_os = "windows")]
        assert_eq!(platform, Platform::Windows);

        let _ = platform;
    }

    #[test]
    fn test_platform_name() {
        assert_eq!(Platform::Linux.name(), "Linux");
        assert_eq!(Platform::MacOS.name(), "macOS");
        assert_eq!(Platform::Windows.name(), "Windows");
        assert_eq!(Platform::WSL.name(), "WSL");
        assert_eq!(Platform::Other.name(), "Other");
    }

    #[test]
    fn test_is_unix() {
        assert!(Platform::Linux.is_unix());
        assert!(Platform::MacOS.is_unix());
        assert!(Platform::WSL.is_unix());
        assert!(!Platform::Windows.is_unix());
    }

    #[test]
    fn test_startup_timeout_ordering() {
        let windows = Platform::Windows.default_startup_timeout();
        let mac = Platform::MacOS.default_startup_timeout();
        let linux = Platform::Linux.default_startup_timeout();
        let other = Platform::Other.default_startup_timeout();

        assert!(windows > mac);
        assert_eq!(mac, linux);
        assert!(linux > other);
    }

    #[test]
    fn test_line_ending() {
        assert_eq!(Platform::Windows.line_ending(), "\r\n");
        assert_eq!(Platform::Linux.line_ending(), "\n");
        assert_eq!(Platform::MacOS.line_ending(), "\n");
    }

    #[test]
    fn test_path_lookup_command() {
        assert_eq!(Platform::Windows.path_lookup_command(), "where");
        assert_eq!(Platform::MacOS.path_lookup_command(), "which");
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Platform::Linux), "Linux");
        assert_eq!(format!("{}", Platform::MacOS), "macOS");
        assert_eq!(format!("{}", Platform::Windows), "Windows");
        assert_eq!(format!("{}", Platform::WSL), "WSL");
    }
}
