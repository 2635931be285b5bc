//! Configuration for daily-hue

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ChallengeError;

/// Attempts every player gets per day
pub const DEFAULT_BASE_ATTEMPTS: u32 = 5;

/// Hard ceiling on daily attempts, whatever was granted
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Points needed per level milestone
pub const POINTS_PER_LEVEL: i64 = 1000;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("daily-hue")
}

/// Daily attempt budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRules {
    pub base_attempts: u32,
    pub max_attempts: u32,
}

impl AttemptRules {
    /// Budget in effect with `extra` granted attempts
    pub fn cap(&self, extra: u32) -> u32 {
        self.base_attempts.saturating_add(extra).min(self.max_attempts)
    }
}

impl Default for AttemptRules {
    fn default() -> Self {
        Self {
            base_attempts: DEFAULT_BASE_ATTEMPTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding challenge.db
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Attempts per day before modifiers
    #[serde(default = "default_base_attempts")]
    pub base_attempts: u32,

    /// Ceiling on attempts per day
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long SQLite waits on a locked database (ms)
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Leaderboard page size when the caller gives none
    #[serde(default = "default_leaderboard_limit")]
    pub leaderboard_limit: u32,

    /// Event bus buffer
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_http_port() -> u16 {
    8095
}

fn default_base_attempts() -> u32 {
    DEFAULT_BASE_ATTEMPTS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_leaderboard_limit() -> u32 {
    100
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            base_attempts: DEFAULT_BASE_ATTEMPTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            busy_timeout_ms: default_busy_timeout_ms(),
            leaderboard_limit: default_leaderboard_limit(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ChallengeError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ChallengeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ChallengeError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ChallengeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ChallengeError> {
        if self.max_attempts == 0 {
            return Err(ChallengeError::Config("max_attempts must be at least 1".into()));
        }
        if self.base_attempts > self.max_attempts {
            return Err(ChallengeError::Config(format!(
                "base_attempts ({}) exceeds max_attempts ({})",
                self.base_attempts, self.max_attempts
            )));
        }
        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join("challenge.db")
    }

    /// Default config file location inside the storage directory
    pub fn default_config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn rules(&self) -> AttemptRules {
        AttemptRules {
            base_attempts: self.base_attempts,
            max_attempts: self.max_attempts,
        }
    }

    pub fn busy_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cap_is_bounded() {
        let rules = AttemptRules::default();
        assert_eq!(rules.cap(0), 5);
        assert_eq!(rules.cap(3), 8);
        assert_eq!(rules.cap(5), 10);
        assert_eq!(rules.cap(50), 10);
        assert_eq!(rules.cap(u32::MAX), 10);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("http_port = 9000").unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.rules(), AttemptRules::default());
        assert_eq!(config.leaderboard_limit, 100);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.storage_dir = dir.path().to_path_buf();
        config.base_attempts = 3;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.base_attempts, 3);
        assert_eq!(loaded.db_path(), dir.path().join("challenge.db"));
    }

    #[test]
    fn test_rejects_inverted_budget() {
        let config: Config = toml::from_str("base_attempts = 12\nmax_attempts = 10").unwrap();
        assert!(matches!(config.validate(), Err(ChallengeError::Config(_))));
    }
}
