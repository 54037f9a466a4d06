use clap::Args;

use filelink::state::AppState;
use filelink::ServiceConfig;

#[derive(Args, Debug, Clone)]
pub struct Health;

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("Health check failed: {0}")]
    Failed(String),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Health {
    type Error = HealthError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut lines = Vec::new();

        // 1. Check config directory
        lines.push("Config:".to_string());
        match AppState::load(ctx.config_path.clone()) {
            Ok(state) => {
                lines.push(format!("  directory:    {}", state.filelink_dir.display()));
                lines.push("  config.toml:  OK".to_string());
                lines.push("  db.sqlite:    OK".to_string());
                lines.push(format!("  http_port:    {}", state.config.http_port));
                match ServiceConfig::from_state(&state) {
                    Ok(config) => {
                        lines.push(format!(
                            "  archive:      {}",
                            config.engine.archive_chat
                        ));
                        lines.push(format!(
                            "  operators:    {}",
                            config.engine.operators.len()
                        ));
                        lines.push(format!(
                            "  required:     {}",
                            config.engine.global_requirements.len()
                        ));
                    }
                    Err(e) => lines.push(format!("  settings:     INVALID ({})", e)),
                }
            }
            Err(e) => {
                lines.push(format!("  error: {}", e));
            }
        }

        // 2. Probe the running daemon
        lines.push(String::new());
        lines.push(format!("Daemon ({}):", ctx.remote));
        for (label, path) in [("livez: ", "/_status/livez"), ("readyz:", "/_status/readyz")] {
            let line = match ctx.client.get(ctx.endpoint(path)).send().await {
                Ok(resp) if resp.status().is_success() => format!("  {} OK", label),
                Ok(resp) => format!("  {} UNHEALTHY ({})", label, resp.status()),
                Err(_) => format!("  {} NOT REACHABLE", label),
            };
            lines.push(line);
        }

        Ok(lines.join("\n"))
    }
}
