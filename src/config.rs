//! Configuration loader and validator for the repeat bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::album::ResolvePolicy;
use crate::repeat::IntervalLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    #[serde(default)]
    pub repeat: Repeat,
    #[serde(default)]
    pub album: Album,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// User allowed to run owner-only commands (`/broadcast`, `/groups`).
    pub owner_id: i64,
}

/// Bounds for `/repeat` intervals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Repeat {
    pub min_interval_seconds: u64,
    pub max_interval_seconds: u64,
}

impl Default for Repeat {
    fn default() -> Self {
        Self {
            min_interval_seconds: 60,
            max_interval_seconds: 86_400,
        }
    }
}

/// Album buffering and resolution timings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Album {
    pub expiry_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub resolve_max_wait_ms: u64,
    pub poll_initial_ms: u64,
    pub poll_step_ms: u64,
    pub poll_max_ms: u64,
}

impl Default for Album {
    fn default() -> Self {
        Self {
            expiry_seconds: 300,
            sweep_interval_seconds: 60,
            resolve_max_wait_ms: 4_500,
            poll_initial_ms: 350,
            poll_step_ms: 150,
            poll_max_ms: 800,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Flat file holding the ids of every group the bot has seen.
    pub fn groups_file(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("groups.txt")
    }

    pub fn interval_limits(&self) -> IntervalLimits {
        IntervalLimits {
            min_seconds: self.repeat.min_interval_seconds,
            max_seconds: self.repeat.max_interval_seconds,
        }
    }

    pub fn resolve_policy(&self) -> ResolvePolicy {
        ResolvePolicy {
            max_wait: Duration::from_millis(self.album.resolve_max_wait_ms),
            poll_initial: Duration::from_millis(self.album.poll_initial_ms),
            poll_step: Duration::from_millis(self.album.poll_step_ms),
            poll_max: Duration::from_millis(self.album.poll_max_ms),
        }
    }

    pub fn album_expiry(&self) -> Duration {
        Duration::from_secs(self.album.expiry_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.album.sweep_interval_seconds)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.owner_id <= 0 {
        return Err(ConfigError::Invalid("telegram.owner_id must be a user id"));
    }

    if cfg.repeat.min_interval_seconds == 0 {
        return Err(ConfigError::Invalid("repeat.min_interval_seconds must be > 0"));
    }
    if cfg.repeat.max_interval_seconds < cfg.repeat.min_interval_seconds {
        return Err(ConfigError::Invalid(
            "repeat.max_interval_seconds must be >= repeat.min_interval_seconds",
        ));
    }

    let album = &cfg.album;
    if album.expiry_seconds == 0 {
        return Err(ConfigError::Invalid("album.expiry_seconds must be > 0"));
    }
    if album.sweep_interval_seconds == 0 {
        return Err(ConfigError::Invalid("album.sweep_interval_seconds must be > 0"));
    }
    if album.resolve_max_wait_ms == 0 {
        return Err(ConfigError::Invalid("album.resolve_max_wait_ms must be > 0"));
    }
    if album.poll_initial_ms == 0 {
        return Err(ConfigError::Invalid("album.poll_initial_ms must be > 0"));
    }
    // poll_step_ms may be 0: the poll interval then stays constant
    if album.poll_max_ms < album.poll_initial_ms {
        return Err(ConfigError::Invalid(
            "album.poll_max_ms must be >= album.poll_initial_ms",
        ));
    }

    Ok(())
}

/// Returns a complete example YAML document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  owner_id: 123456789

repeat:
  min_interval_seconds: 60
  max_interval_seconds: 86400

album:
  expiry_seconds: 300
  sweep_interval_seconds: 60
  resolve_max_wait_ms: 4500
  poll_initial_ms: 350
  poll_step_ms: 150
  poll_max_ms: 800
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.repeat, Repeat::default());
        assert_eq!(cfg.album, Album::default());
    }

    #[test]
    fn optional_sections_take_defaults() {
        let yaml = r#"app:
  data_dir: "./data"
telegram:
  bot_token: "token"
  owner_id: 42
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.album_expiry(), Duration::from_secs(300));
        assert_eq!(cfg.interval_limits().min_seconds, 60);
        let policy = cfg.resolve_policy();
        assert_eq!(policy.poll_initial, Duration::from_millis(350));
        assert_eq!(policy.poll_max, Duration::from_millis(800));
    }

    #[test]
    fn invalid_bot_token() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.telegram.bot_token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("telegram.bot_token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_owner_id() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.telegram.owner_id = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_repeat_bounds() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.repeat.min_interval_seconds = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("min_interval_seconds")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.repeat.max_interval_seconds = 10;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_album_timings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.album.expiry_seconds = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.album.poll_initial_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.album.poll_max_ms = 100;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("poll_max_ms")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.album.poll_step_ms = 0;
        validate(&cfg).unwrap();
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
        assert_eq!(cfg.groups_file(), data_path.join("groups.txt"));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.telegram.owner_id, 123456789);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let td = tempdir().unwrap();
        let err = load(Some(&td.path().join("nope.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
