use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server configuration, loaded from TOML and overridable per-field by CLI
/// flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP/WebSocket server binds to.
    pub bind: String,
    /// Shell launched when a create request does not name one. Falls back to
    /// `$SHELL`, then `/bin/sh`, when unset.
    pub default_shell: Option<String>,
    /// Terminal dimensions used when a create request omits them.
    pub default_cols: u16,
    pub default_rows: u16,
    /// Idle duration after which the reaper evicts a session.
    pub idle_timeout_secs: u64,
    /// Interval between reaper sweeps.
    pub sweep_interval_secs: u64,
    /// Cap on concurrent sessions. Zero means unlimited.
    pub max_sessions: usize,
    /// Lines of scrollback retained by each session's screen emulator.
    pub scrollback_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8777".to_string(),
            default_shell: None,
            default_cols: 80,
            default_rows: 24,
            idle_timeout_secs: 1800,
            sweep_interval_secs: 60,
            max_sessions: 256,
            scrollback_limit: 10_000,
        }
    }
}

impl Config {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &std::path::Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_sessions(&self) -> Option<usize> {
        match self.max_sessions {
            0 => None,
            n => Some(n),
        }
    }
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(std::path::PathBuf, std::io::Error),
    ParseFailed(std::path::PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.default_cols, 80);
        assert_eq!(config.default_rows, 24);
        assert_eq!(config.idle_timeout_secs, 1800);
        assert_eq!(config.sweep_interval_secs, 60);
        assert!(config.default_shell.is_none());
    }

    #[test]
    fn parse_partial_config_keeps_remaining_defaults() {
        let toml = r#"
            default_shell = "/bin/bash"
            idle_timeout_secs = 300
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.default_shell.as_deref(), Some("/bin/bash"));
        assert_eq!(config.idle_timeout_secs, 300);
        assert_eq!(config.default_cols, 80);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            bind = "0.0.0.0:9000"
            default_shell = "/bin/zsh"
            default_cols = 120
            default_rows = 40
            idle_timeout_secs = 600
            sweep_interval_secs = 30
            max_sessions = 16
            scrollback_limit = 5000
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!((config.default_cols, config.default_rows), (120, 40));
        assert_eq!(config.max_sessions(), Some(16));
        assert_eq!(config.scrollback_limit, 5000);
    }

    #[test]
    fn zero_max_sessions_means_unlimited() {
        let config: Config = toml::from_str("max_sessions = 0").unwrap();
        assert_eq!(config.max_sessions(), None);
    }

    #[test]
    fn load_missing_file_returns_none() {
        let loaded = Config::load(std::path::Path::new("/nonexistent/termweb.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("termweb.toml");
        std::fs::write(&path, "default_cols = 132\n").unwrap();

        let config = Config::load(&path).unwrap().expect("config should load");
        assert_eq!(config.default_cols, 132);
    }

    #[test]
    fn load_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("termweb.toml");
        std::fs::write(&path, "default_cols = \"not a number\"\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed(_, _)));
    }
}
