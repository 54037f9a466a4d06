pub use clap::Parser;

use std::path::PathBuf;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "filelink")]
#[command(about = "Share files as gated, self-expiring deep links")]
pub struct Args {
    /// Keepalive server URL used by `health` (defaults to the configured port)
    #[arg(long, global = true)]
    pub remote: Option<Url>,

    /// Path to the filelink config directory (defaults to ~/.filelink)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
