use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use common::engine::EngineConfig;
use common::model::{ChatId, GroupHandle};

use crate::state::{AppState, StateError};

/// Fully resolved runtime configuration handed to `spawn_service`
#[derive(Debug, Clone)]
pub struct Config {
    // bot api configuration
    /// Base URL of the Bot API
    pub api_base_url: Url,
    pub bot_token: String,
    /// Long-poll timeout for fetching updates
    pub poll_timeout: Duration,

    // engine configuration
    pub engine: EngineConfig,
    /// Where group moderation actions are reported, if anywhere
    pub moderation_log_chat: Option<ChatId>,
    pub banned_terms: Vec<String>,
    pub max_warnings: u32,

    // http server configuration
    /// Port for the keepalive / health server.
    /// If not set, no http server will be started.
    pub http_port: Option<u16>,

    // data store configuration
    /// a path to a sqlite database, if not set then an
    ///  in-memory database will be used
    pub sqlite_path: Option<PathBuf>,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Resolve the on-disk state into a runtime configuration
    pub fn from_state(state: &AppState) -> Result<Self, StateError> {
        let config = &state.config;

        let api_base_url = Url::parse(&config.api_base_url)
            .map_err(|e| StateError::InvalidSetting(format!("api_base_url: {}", e)))?;
        if config.archive_chat_id == 0 {
            return Err(StateError::MissingSetting("archive_chat_id".to_string()));
        }

        let required_groups = config
            .required_groups
            .iter()
            .map(|raw| {
                GroupHandle::parse(raw).ok_or_else(|| {
                    StateError::InvalidSetting(format!("required_groups: {:?}", raw))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut engine = EngineConfig::new(config.archive_chat_id)
            .with_operators(config.operators.iter().copied())
            .with_requirements(required_groups);
        engine.broadcast_concurrency = config.broadcast_concurrency.max(1);

        Ok(Self {
            api_base_url,
            bot_token: config.resolve_bot_token()?,
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
            engine,
            moderation_log_chat: config.moderation_log_chat_id,
            banned_terms: config.banned_terms.clone(),
            max_warnings: config.max_warnings,
            http_port: Some(config.http_port),
            sqlite_path: Some(state.db_path.clone()),
            log_level: tracing::Level::INFO,
            log_dir: None,
        })
    }
}
