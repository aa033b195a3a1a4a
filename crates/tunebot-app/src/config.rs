//! Bot configuration loaded from TOML.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

use tunebot_audio::EngineConfig;
use tunebot_core::{Combine, Error, PermissionPolicy, Result, Volume};
use tunebot_extractor::AuthMethod;

/// Name of the config file looked up in the platform config directory.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Prefix that marks a chat message as a command.
    pub command_prefix: String,
    /// Maximum number of pending tracks.
    pub max_queue_size: usize,
    /// Volume at startup, 0-100.
    pub default_volume: u8,
    /// Upper bound on resolving and downloading one track.
    pub fetch_timeout_secs: Option<u64>,
    /// Audio cache directory. Defaults to the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Cached downloads not played for this long are removed at startup.
    pub cache_max_age_hours: u64,
    pub yt_dlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    /// Browser whose cookies yt-dlp should use.
    pub cookies_from_browser: Option<String>,
    /// File or FIFO receiving raw s16le PCM. Frames are discarded when unset.
    pub voice_output: Option<PathBuf>,
    pub permissions: PermissionsConfig,
    /// Server group memberships by UID, for the built-in identity lookup.
    pub directory: HashMap<String, Vec<u32>>,
}

/// Who may issue commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub allowed_uids: Vec<String>,
    pub allowed_group_ids: Vec<u32>,
    /// Require both a UID and a group match instead of either.
    pub require_both: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            command_prefix: "!".to_string(),
            max_queue_size: 50,
            default_volume: Volume::DEFAULT.as_percent(),
            fetch_timeout_secs: None,
            cache_dir: None,
            cache_max_age_hours: 24,
            yt_dlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            cookies_from_browser: None,
            voice_output: None,
            permissions: PermissionsConfig::default(),
            directory: HashMap::new(),
        }
    }
}

impl BotConfig {
    /// Load configuration from `path`, or from the platform config directory
    /// when no path is given. A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    info!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("Failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "tunebot", "Tunebot")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_prefix.trim().is_empty() {
            return Err(Error::Config("command_prefix must not be empty".into()));
        }
        if self.max_queue_size == 0 {
            return Err(Error::Config("max_queue_size must be at least 1".into()));
        }
        if self.default_volume > Volume::MAX.as_percent() {
            return Err(Error::Config(format!(
                "default_volume must be between 0 and 100, got {}",
                self.default_volume
            )));
        }
        if self.cache_max_age().is_none() {
            return Err(Error::Config(format!(
                "cache_max_age_hours is out of range: {}",
                self.cache_max_age_hours
            )));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_queue_size: self.max_queue_size,
            default_volume: Volume::clamped(i64::from(self.default_volume)),
            fetch_timeout: self.fetch_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn permission_policy(&self) -> PermissionPolicy {
        PermissionPolicy::new(
            self.permissions.allowed_uids.iter().cloned(),
            self.permissions.allowed_group_ids.iter().copied(),
            Combine::from_require_both(self.permissions.require_both),
        )
    }

    pub fn auth_method(&self) -> AuthMethod {
        self.cookies_from_browser
            .clone()
            .map_or(AuthMethod::None, AuthMethod::BrowserCookies)
    }

    pub fn cache_max_age(&self) -> Option<chrono::Duration> {
        i64::try_from(self.cache_max_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = BotConfig::from_toml_str("").unwrap();
        assert_eq!(config, BotConfig::default());
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.max_queue_size, 50);
        assert_eq!(config.engine_config().default_volume.as_percent(), 50);
        assert!(config.engine_config().fetch_timeout.is_none());
        assert!(config.permission_policy().is_open());
    }

    #[test]
    fn test_full_document() {
        let config = BotConfig::from_toml_str(
            r#"
            command_prefix = "?"
            max_queue_size = 10
            default_volume = 80
            fetch_timeout_secs = 30
            cookies_from_browser = "firefox"

            [permissions]
            allowed_uids = ["abc="]
            allowed_group_ids = [6, 7]
            require_both = true

            [directory]
            "abc=" = [6]
            "#,
        )
        .unwrap();

        assert_eq!(config.command_prefix, "?");
        let engine = config.engine_config();
        assert_eq!(engine.max_queue_size, 10);
        assert_eq!(engine.default_volume.as_percent(), 80);
        assert_eq!(engine.fetch_timeout, Some(Duration::from_secs(30)));

        let policy = config.permission_policy();
        assert_eq!(policy.combine, Combine::All);
        assert!(policy.allowed_uids.contains("abc="));
        assert_eq!(policy.allowed_group_ids.len(), 2);
        assert_eq!(config.directory["abc="], vec![6]);
        assert!(matches!(config.auth_method(), AuthMethod::BrowserCookies(b) if b == "firefox"));
    }

    #[test]
    fn test_validation() {
        for bad in [
            "default_volume = 101",
            "max_queue_size = 0",
            "command_prefix = \"  \"",
        ] {
            let err = BotConfig::from_toml_str(bad).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = BotConfig::from_toml_str("max_queue_size = \"lots\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunebot.toml");
        std::fs::write(&path, "cache_max_age_hours = 48\n").unwrap();

        let config = BotConfig::load(Some(&path)).unwrap();
        assert_eq!(config.cache_max_age(), chrono::Duration::try_hours(48));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(BotConfig::load(Some(&missing)), Err(Error::Config(_))));
    }
}
