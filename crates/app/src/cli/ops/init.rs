use clap::Args;

use filelink::state::{AppConfig, AppState};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Chat that holds the archived copy of every shared item
    #[arg(long, allow_hyphen_values = true)]
    pub archive_chat_id: i64,

    /// Bot API token (may instead be supplied through FILELINK_BOT_TOKEN)
    #[arg(long)]
    pub bot_token: Option<String>,

    /// Operator user id, repeatable
    #[arg(long = "operator")]
    pub operators: Vec<i64>,

    /// Group every requester must join, repeatable (e.g. @news)
    #[arg(long = "required-group")]
    pub required_groups: Vec<String>,

    /// Chat that receives group moderation reports
    #[arg(long, allow_hyphen_values = true)]
    pub moderation_log_chat_id: Option<i64>,

    /// Keepalive server port
    #[arg(long, default_value_t = 8080)]
    pub http_port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] filelink::state::StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            http_port: self.http_port,
            bot_token: self.bot_token.clone().unwrap_or_default(),
            archive_chat_id: self.archive_chat_id,
            moderation_log_chat_id: self.moderation_log_chat_id,
            operators: self.operators.clone(),
            required_groups: self.required_groups.clone(),
            ..Default::default()
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let token_str = if state.config.bot_token.is_empty() {
            "not set (export FILELINK_BOT_TOKEN)"
        } else {
            "stored in config"
        };

        let output = format!(
            "Initialized filelink directory at: {}\n\
             - Database: {}\n\
             - Config: {}\n\
             - Archive chat: {}\n\
             - Operators: {:?}\n\
             - Bot token: {}\n\
             - Keepalive port: {}",
            state.filelink_dir.display(),
            state.db_path.display(),
            state.config_path.display(),
            state.config.archive_chat_id,
            state.config.operators,
            token_str,
            state.config.http_port
        );

        Ok(output)
    }
}
