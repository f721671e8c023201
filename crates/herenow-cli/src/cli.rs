//! Command-line interface definition

use clap::Parser;

/// Herenow realtime channel client
#[derive(Parser, Debug)]
#[command(name = "herenow", version, about = "Connect to the Herenow realtime channel")]
pub struct Cli {
    /// Realtime channel endpoint, e.g. wss://example.com/realtime
    #[arg(short, long)]
    pub endpoint: String,

    /// Bearer token used to open the channel
    #[arg(short, long)]
    pub token: String,

    /// Application identity used for envelope filtering
    #[arg(long, default_value = "herenow")]
    pub app_id: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
