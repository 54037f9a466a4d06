use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use filelink::state::AppState;

const DEFAULT_REMOTE: &str = "http://localhost:8080";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve the keepalive server URL.
///
/// Priority: explicit `--remote` flag > config file `http_port` > hardcoded 8080.
pub fn resolve_remote(explicit: Option<Url>, config_path: Option<PathBuf>) -> Url {
    if let Some(url) = explicit {
        return url;
    }
    if let Ok(state) = AppState::load(config_path) {
        if let Ok(url) = Url::parse(&format!("http://localhost:{}", state.config.http_port)) {
            return url;
        }
    }
    Url::parse(DEFAULT_REMOTE).expect("hardcoded URL must parse")
}

#[derive(Clone)]
pub struct OpContext {
    /// Client for probing the keepalive server
    pub client: reqwest::Client,
    pub remote: Url,
    /// Optional custom config path (defaults to ~/.filelink)
    pub config_path: Option<PathBuf>,
}

impl OpContext {
    pub fn new(remote: Url, config_path: Option<PathBuf>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            client,
            remote,
            config_path,
        })
    }

    /// Absolute URL of a path on the keepalive server
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.remote.as_str().trim_end_matches('/'), path)
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::cli::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::cli::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx).await
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_remote_explicit_wins() {
        let explicit = Url::parse("http://example.com:9999").unwrap();
        let result = resolve_remote(Some(explicit.clone()), None);
        assert_eq!(result, explicit);
    }

    #[test]
    fn test_resolve_remote_falls_back_to_default() {
        let result = resolve_remote(None, Some(PathBuf::from("/nonexistent")));
        assert_eq!(result.as_str(), "http://localhost:8080/");
    }

    #[test]
    fn test_resolve_remote_reads_config_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filelink");
        let config = filelink::AppConfig {
            http_port: 9123,
            ..Default::default()
        };
        AppState::init(Some(path.clone()), Some(config)).unwrap();

        let result = resolve_remote(None, Some(path));
        assert_eq!(result.port(), Some(9123));
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let ctx = OpContext::new(Url::parse("http://localhost:8080/").unwrap(), None).unwrap();
        assert_eq!(
            ctx.endpoint("/_status/livez"),
            "http://localhost:8080/_status/livez"
        );
    }
}
