use crate::error::ElectroBotError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the Telegram bot token.
pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
/// Environment variable pointing at a YAML config file.
pub const CONFIG_ENV: &str = "ELECTROBOT_CONFIG";

fn default_working_dir() -> String {
    "/tmp".into()
}
fn default_heartbeat_interval_secs() -> u64 {
    5
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// IANA timezone for user-facing timestamps; host local time when unset.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Directory for daily log files; stdout only when unset.
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            working_dir: default_working_dir(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            timezone: None,
            log_dir: None,
        }
    }
}

impl Config {
    pub fn resolve_config_path() -> Result<Option<PathBuf>, ElectroBotError> {
        if let Ok(custom) = std::env::var(CONFIG_ENV) {
            if Path::new(&custom).exists() {
                return Ok(Some(PathBuf::from(custom)));
            }
            return Err(ElectroBotError::Config(format!(
                "{CONFIG_ENV} points to non-existent file: {custom}"
            )));
        }

        for candidate in ["./electrobot.config.yaml", "./electrobot.config.yml"] {
            if Path::new(candidate).exists() {
                return Ok(Some(PathBuf::from(candidate)));
            }
        }
        Ok(None)
    }

    /// Load config from the resolved YAML file, or defaults when there is none.
    pub fn load() -> Result<Self, ElectroBotError> {
        match Self::resolve_config_path()? {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Config::default()),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ElectroBotError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ElectroBotError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
            .map_err(|e| ElectroBotError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ElectroBotError> {
        let mut config: Config = serde_yaml::from_str(content)
            .map_err(|e| ElectroBotError::Config(format!("Failed to parse config: {e}")))?;
        config.post_deserialize()?;
        Ok(config)
    }

    /// Apply post-deserialization normalization and validation.
    pub(crate) fn post_deserialize(&mut self) -> Result<(), ElectroBotError> {
        self.working_dir = self.working_dir.trim().to_string();
        if self.working_dir.is_empty() {
            self.working_dir = default_working_dir();
        }

        if self.heartbeat_interval_secs == 0 {
            return Err(ElectroBotError::Config(
                "heartbeat_interval_secs must be greater than zero".into(),
            ));
        }

        self.timezone = self
            .timezone
            .take()
            .map(|tz| tz.trim().to_string())
            .filter(|tz| !tz.is_empty());
        if let Some(tz) = &self.timezone {
            tz.parse::<Tz>()
                .map_err(|_| ElectroBotError::Config(format!("Invalid timezone: {tz}")))?;
        }

        self.log_dir = self
            .log_dir
            .take()
            .map(|dir| dir.trim().to_string())
            .filter(|dir| !dir.is_empty());
        Ok(())
    }

    /// Loads `explicit` when given, otherwise the usual discovery.
    pub fn load_or_discover(explicit: Option<&Path>) -> Result<Self, ElectroBotError> {
        match explicit {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// A `--working-dir` value replaces the configured one; blank is ignored.
    pub fn override_working_dir(&mut self, dir: Option<&str>) {
        if let Some(dir) = dir.map(str::trim).filter(|d| !d.is_empty()) {
            self.working_dir = dir.to_string();
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Parsed timezone. `post_deserialize` already rejected invalid names.
    pub fn tz(&self) -> Option<Tz> {
        self.timezone.as_deref().and_then(|tz| tz.parse().ok())
    }

    /// The bot token from the environment, if set and non-blank.
    pub fn bot_token_from_env() -> Option<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}
