#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Milter daemon: binds the filter socket and prints every assembled
//! message

use clap::Parser;
use milterd::{EmailMessage, MilterConfig, MilterServer};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "milterd")]
#[command(about = "Milter protocol server that inspects in-progress SMTP transactions")]
struct Args {
    /// Bind address: host:port for TCP, or an absolute path for a
    /// Unix domain socket. Overrides MILTERD_SOCKET.
    #[arg(long)]
    socket: Option<String>,

    /// Output each assembled message as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match args.socket {
        Some(socket) => MilterConfig::new(socket),
        None => MilterConfig::from_env()?,
    };

    let server = MilterServer::bind(config).await?;
    let mut messages = server.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = messages.recv() => match received {
                Ok(message) => print_message(&message, args.json)?,
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("warning: fell behind, {skipped} message(s) dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    server.shutdown().await;
    Ok(())
}

fn print_message(message: &EmailMessage, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(message)?);
    } else {
        println!(
            "{} {} -> [{}] \"{}\" ({} body bytes)",
            message.received_at.format("%Y-%m-%d %H:%M:%S"),
            message.from,
            message.to.join(", "),
            message.subject,
            message.body.len(),
        );
    }
    Ok(())
}
