//! Command-line surface (§6): a single optional `--config` flag overriding the default
//! config file location, used for local development and tests.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "arena-bridge", about = "OpenAI-compatible bridge in front of a browser chat-arena session")]
pub struct Cli {
    /// Path to the JSONC config file.
    #[arg(long, short = 'c', default_value = "config.jsonc")]
    pub config: PathBuf,
}
