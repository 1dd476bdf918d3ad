//! Server configuration (`~/.config/cmdwatch/config.toml` + environment overrides).
//!
//! Precedence, lowest to highest:
//! 1. Built-in defaults
//! 2. Global config file (`~/.config/cmdwatch/config.toml`)
//! 3. Environment variables (`USE_PTY`, `DEFAULT_SHELL`, `MAX_SESSIONS`,
//!    `SESSION_TIMEOUT_MS`, `LOG_LEVEL`, `JOURNAL_PATH`)
//!
//! CLI flags are applied on top by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Soft cap on live sessions.
const DEFAULT_MAX_SESSIONS: usize = 50;

/// Inactive-session eviction threshold.
const DEFAULT_SESSION_TIMEOUT_MS: u64 = 3_600_000;

/// Minimum log severity emitted by the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// The `tracing_subscriber::EnvFilter` directive for this level.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "error" => Some(Self::Error),
            "warn" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }
}

/// Resolved server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Spawn commands under a pseudo-terminal instead of piped stdio.
    #[serde(default)]
    pub use_pty: bool,

    /// Shell binary override; `None` means the platform default.
    #[serde(default)]
    pub default_shell: Option<String>,

    /// Soft cap on live sessions (default 50).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Inactive sessions older than this are evicted (default 1 h).
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    #[serde(default)]
    pub log_level: LogLevel,

    /// When set, completed-session records are appended here as JSONL.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_pty: false,
            default_shell: None,
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            log_level: LogLevel::default(),
            journal_path: None,
        }
    }
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_session_timeout_ms() -> u64 {
    DEFAULT_SESSION_TIMEOUT_MS
}

impl Config {
    /// Load config from the global file, then apply environment overrides.
    ///
    /// Returns defaults if the file does not exist or the config directory
    /// cannot be determined (e.g., no HOME in containers).
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        let path = match Self::config_path() {
            Ok(p) => p,
            Err(_) => return Ok(Self::default()),
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Apply environment-variable overrides via the given lookup.
    ///
    /// Unparseable values are logged at warn and ignored rather than failing
    /// startup.
    pub fn apply_env_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = get("USE_PTY") {
            match raw.as_str() {
                "1" => self.use_pty = true,
                "0" => self.use_pty = false,
                other => warn!(value = other, "ignoring invalid USE_PTY (expected \"0\" or \"1\")"),
            }
        }
        if let Some(shell) = get("DEFAULT_SHELL") {
            if !shell.trim().is_empty() {
                self.default_shell = Some(shell);
            }
        }
        if let Some(raw) = get("MAX_SESSIONS") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => self.max_sessions = n,
                _ => warn!(value = %raw, "ignoring invalid MAX_SESSIONS"),
            }
        }
        if let Some(raw) = get("SESSION_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => self.session_timeout_ms = ms,
                _ => warn!(value = %raw, "ignoring invalid SESSION_TIMEOUT_MS"),
            }
        }
        if let Some(raw) = get("LOG_LEVEL") {
            match LogLevel::parse(&raw) {
                Some(level) => self.log_level = level,
                None => warn!(value = %raw, "ignoring invalid LOG_LEVEL"),
            }
        }
        if let Some(path) = get("JOURNAL_PATH") {
            if !path.trim().is_empty() {
                self.journal_path = Some(PathBuf::from(path));
            }
        }
    }

    /// Path to the global config file: `~/.config/cmdwatch/config.toml`.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "cmdwatch")
            .context("Failed to determine config directory")?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}
