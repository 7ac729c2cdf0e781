use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Longest approval wait accepted from config: one day.
pub const MAX_TIMEOUT_MINUTES: u64 = 24 * 60;

/// Top-level configuration loaded from `~/.warden/config.toml`.
///
/// **Security**: This struct NEVER stores channel tokens. Credentials are
/// read from environment variables at runtime through [`CredentialProvider`];
/// config only records the *name* of the variable to read.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl Config {
    /// Load config from `~/.warden/config.toml`, falling back to defaults
    /// when the file does not exist. Environment overrides are applied last.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        let mut cfg = if path.exists() {
            tracing::debug!(path = %path.display(), "loading config");
            Self::parse_file(&path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Config::default()
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific path, then apply environment overrides.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut cfg = Self::parse_file(&path.into())?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn parse_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `WARDEN_*` environment overrides on top of file values.
    ///
    /// - `WARDEN_CHANNEL_ID` -> `channel.channel_id`
    /// - `WARDEN_TIMEOUT_MINUTES` -> `approval.timeout_minutes`
    /// - `WARDEN_WORKSPACE` -> `general.workspace_root`
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::apply_env_overrides`] with an injectable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(channel) = lookup("WARDEN_CHANNEL_ID") {
            self.channel.channel_id = channel;
        }
        if let Some(raw) = lookup("WARDEN_TIMEOUT_MINUTES") {
            self.approval.timeout_minutes = raw.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("WARDEN_TIMEOUT_MINUTES is not a number: {raw}"))
            })?;
        }
        if let Some(root) = lookup("WARDEN_WORKSPACE") {
            self.general.workspace_root = root;
        }
        Ok(())
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.approval.validate()?;
        self.channel.validate()?;
        if self.execution.quarantine_dir.trim().is_empty() {
            return Err(ConfigError::Validation(
                "execution.quarantine_dir must not be empty".into(),
            ));
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".warden")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `"human"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Directory every operation is scoped to.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            workspace_root: default_workspace_root(),
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.log_format.as_str() {
            "human" | "json" => {}
            other => {
                return Err(ConfigError::Validation(format!(
                    "general.log_format must be \"human\" or \"json\", got {other:?}"
                )))
            }
        }
        if self.workspace_root.trim().is_empty() {
            return Err(ConfigError::Validation(
                "general.workspace_root must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "human".into()
}
fn default_workspace_root() -> String {
    "./agent-workspace".into()
}

/// Approval coordination knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Minutes a reviewer has to answer before the request times out.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    /// Seconds between channel fetches.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// How many recent messages to fetch per poll.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    /// Messages stamped within this many seconds of the prompt are treated as
    /// echoes of the prompt. `0` disables the heuristic.
    #[serde(default = "default_echo_window_secs")]
    pub echo_window_secs: u64,
    /// Upper bound for a rate-limit backoff, whatever the channel asks for.
    #[serde(default = "default_rate_limit_ceiling_secs")]
    pub rate_limit_ceiling_secs: u64,
    /// Known user id of the bot posting prompts, when the transport cannot
    /// discover it.
    #[serde(default)]
    pub bot_user_id: Option<String>,
    /// Case-insensitive display-name fragments that mark an author as a bot.
    #[serde(default = "default_bot_name_markers")]
    pub bot_name_markers: Vec<String>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_timeout_minutes(),
            check_interval_secs: default_check_interval_secs(),
            fetch_limit: default_fetch_limit(),
            echo_window_secs: default_echo_window_secs(),
            rate_limit_ceiling_secs: default_rate_limit_ceiling_secs(),
            bot_user_id: None,
            bot_name_markers: default_bot_name_markers(),
        }
    }
}

impl ApprovalConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_minutes == 0 || self.timeout_minutes > MAX_TIMEOUT_MINUTES {
            return Err(ConfigError::Validation(format!(
                "approval.timeout_minutes must be within 1..={MAX_TIMEOUT_MINUTES}, got {}",
                self.timeout_minutes
            )));
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "approval.check_interval_secs must be at least 1".into(),
            ));
        }
        if self.fetch_limit == 0 || self.fetch_limit > 1000 {
            return Err(ConfigError::Validation(format!(
                "approval.fetch_limit must be within 1..=1000, got {}",
                self.fetch_limit
            )));
        }
        Ok(())
    }
}

fn default_timeout_minutes() -> u64 {
    5
}
fn default_check_interval_secs() -> u64 {
    3
}
fn default_fetch_limit() -> usize {
    10
}
fn default_echo_window_secs() -> u64 {
    5
}
fn default_rate_limit_ceiling_secs() -> u64 {
    5
}
fn default_bot_name_markers() -> Vec<String> {
    vec!["bot".into(), "app".into()]
}

/// Where approval prompts go and replies come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// `"slack"` or `"file"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub channel_id: String,
    /// Env var name holding the channel token (default: `SLACK_BOT_TOKEN`).
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// File channel: replies are read from here.
    #[serde(default = "default_inbox_path")]
    pub inbox_path: String,
    /// File channel: prompts are appended here.
    #[serde(default = "default_outbox_path")]
    pub outbox_path: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            channel_id: String::new(),
            token_env: default_token_env(),
            api_base_url: None,
            inbox_path: default_inbox_path(),
            outbox_path: default_outbox_path(),
        }
    }
}

impl ChannelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.provider.as_str() {
            "slack" | "file" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "channel.provider must be \"slack\" or \"file\", got {other:?}"
            ))),
        }
    }
}

fn default_provider() -> String {
    "file".into()
}
fn default_token_env() -> String {
    "SLACK_BOT_TOKEN".into()
}
fn default_inbox_path() -> String {
    "warden-inbox.csv".into()
}
fn default_outbox_path() -> String {
    "warden-outbox.log".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Recovery directory (relative to the workspace) for deletes that fail.
    #[serde(default = "default_quarantine_dir")]
    pub quarantine_dir: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            quarantine_dir: default_quarantine_dir(),
        }
    }
}

fn default_quarantine_dir() -> String {
    "trash".into()
}

// ---------------------------------------------------------------------------
// CredentialProvider
// ---------------------------------------------------------------------------

/// Resolves credentials from environment variables named in config.
pub struct CredentialProvider;

impl CredentialProvider {
    /// Read the channel token from the env var named by `token_env`.
    /// Returns `None` when the variable is unset or blank.
    pub fn channel_token(channel: &ChannelConfig) -> Option<String> {
        std::env::var(&channel.token_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            ("WARDEN_CHANNEL_ID", "C0123"),
            ("WARDEN_TIMEOUT_MINUTES", "12"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.channel.channel_id, "C0123");
        assert_eq!(cfg.approval.timeout_minutes, 12);
        assert_eq!(cfg.general.workspace_root, "./agent-workspace");
    }

    #[test]
    fn non_numeric_timeout_override_is_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_overrides(|k| (k == "WARDEN_TIMEOUT_MINUTES").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("WARDEN_TIMEOUT_MINUTES"));
    }

    #[test]
    fn unknown_provider_fails_validation() {
        let mut cfg = Config::default();
        cfg.channel.provider = "carrier-pigeon".into();
        assert!(cfg.validate().is_err());
    }
}
