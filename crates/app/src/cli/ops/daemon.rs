use clap::Args;

use filelink::state::AppState;
use filelink::{spawn_service, ServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Override keepalive server port (default from config)
    #[arg(long, conflicts_with = "no_http")]
    pub http_port: Option<u16>,

    /// Do not start the keepalive server
    #[arg(long)]
    pub no_http: bool,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<std::path::PathBuf>,

    /// Default log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("state error: {0}")]
    StateError(#[from] filelink::state::StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Daemon {
    type Error = DaemonError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        // Load state from config path (or default ~/.filelink)
        let state = AppState::load(ctx.config_path.clone())?;
        let mut config = ServiceConfig::from_state(&state)?;

        config.http_port = match (self.no_http, self.http_port) {
            (true, _) => None,
            (false, Some(port)) => Some(port),
            (false, None) => config.http_port,
        };
        config.log_level = self.log_level;
        config.log_dir = self.log_dir.clone();

        spawn_service(&config).await;
        Ok("daemon ended".to_string())
    }
}
