//! Herenow CLI - realtime channel demonstration client
//!
//! Connects to the realtime channel with a bearer token, prints inbound
//! messages, and offers the manual reconnect action after the retry ceiling
//! is exhausted (press Enter to reconnect).

mod cli;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info};

use herenow_client::{
    ConnectionConfig, ConnectionManager, Credential, LinkStatus, WebSocketTransport,
};

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = ConnectionConfig::new(&cli.endpoint, cli.app_id.as_str());
    let manager = ConnectionManager::spawn(config, WebSocketTransport::new())?;

    let _subscription = manager.subscribe(|envelope| {
        println!("[{}] {}", envelope.kind, envelope.text);
    });

    let token = Credential::new(cli.token);
    manager.connect(token.clone());

    let mut status = manager.status_stream();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                match *status.borrow_and_update() {
                    LinkStatus::Open => info!("connected"),
                    LinkStatus::Reconnecting => info!("connection lost; retrying"),
                    LinkStatus::Failed => {
                        error!("disconnected: retries exhausted; press Enter to reconnect");
                    }
                    _ => {}
                }
            }
            line = lines.next_line() => {
                if matches!(line, Ok(Some(_))) && manager.status() == LinkStatus::Failed {
                    info!("reconnecting");
                    manager.connect(token.clone());
                }
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();
}
