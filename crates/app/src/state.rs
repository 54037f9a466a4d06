use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "filelink";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
/// Overrides `bot_token` from the config file
pub const BOT_TOKEN_ENV: &str = "FILELINK_BOT_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Port for the keepalive / health server
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Base URL of the Bot API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub bot_token: String,
    /// Chat holding the archived copy of every shared item
    #[serde(default)]
    pub archive_chat_id: i64,
    /// Where group moderation actions are reported, if anywhere
    #[serde(default)]
    pub moderation_log_chat_id: Option<i64>,
    #[serde(default)]
    pub operators: Vec<i64>,
    /// Groups every requester must belong to
    #[serde(default)]
    pub required_groups: Vec<String>,
    #[serde(default)]
    pub banned_terms: Vec<String>,
    #[serde(default = "default_max_warnings")]
    pub max_warnings: u32,
    #[serde(default = "default_broadcast_concurrency")]
    pub broadcast_concurrency: usize,
    /// Long-poll timeout for fetching updates
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_http_port() -> u16 {
    8080
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_max_warnings() -> u32 {
    3
}

fn default_broadcast_concurrency() -> usize {
    common::engine::DEFAULT_BROADCAST_CONCURRENCY
}

fn default_poll_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            api_base_url: default_api_base_url(),
            bot_token: String::new(),
            archive_chat_id: 0,
            moderation_log_chat_id: None,
            operators: Vec::new(),
            required_groups: Vec::new(),
            banned_terms: Vec::new(),
            max_warnings: default_max_warnings(),
            broadcast_concurrency: default_broadcast_concurrency(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// The bot token, preferring the environment over the config file
    pub fn resolve_bot_token(&self) -> Result<String, StateError> {
        let token = std::env::var(BOT_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.bot_token.clone());
        if token.trim().is_empty() {
            return Err(StateError::MissingSetting(format!(
                "bot_token (or {})",
                BOT_TOKEN_ENV
            )));
        }
        Ok(token.trim().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the filelink directory (~/.filelink)
    pub filelink_dir: PathBuf,
    /// Path to the SQLite database
    pub db_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the filelink directory path (custom or default ~/.filelink)
    pub fn filelink_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let filelink_dir = Self::filelink_dir(custom_path)?;

        if filelink_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&filelink_dir)?;

        let config = config.unwrap_or_default();
        let config_path = filelink_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        // Just touch the file, the daemon runs the migrations
        let db_path = filelink_dir.join(DB_FILE_NAME);
        fs::write(&db_path, "")?;

        Ok(Self {
            filelink_dir,
            db_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the filelink directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let filelink_dir = Self::filelink_dir(custom_path)?;

        if !filelink_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let db_path = filelink_dir.join(DB_FILE_NAME);
        let config_path = filelink_dir.join(CONFIG_FILE_NAME);

        if !db_path.exists() {
            return Err(StateError::MissingFile(DB_FILE_NAME.to_string()));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            filelink_dir,
            db_path,
            config_path,
            config,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("filelink directory not initialized. Run 'filelink init' first")]
    NotInitialized,

    #[error("filelink directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("missing required setting: {0}")]
    MissingSetting(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
