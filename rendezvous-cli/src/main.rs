//! # rendezvous-cli
//!
//! Interactive terminal client for the rendezvous relay.
//!
//! ## Commands
//!
//! - `discover`: List connected clients and exchange keys with them
//! - `broadcast`: Send a message to every client
//! - `send`: Send a direct message, optionally encrypted
//! - `whoami`: Show your client id
//! - `help`, `exit`
//!
//! ## Example
//!
//! ```bash
//! rendezvous-cli --server relay.example.com:3000
//! > discover
//! Discovered clients:
//! 5b0c1f0e-8d7e-4f59-9c1a-2a6f1e3b7d44
//! > send
//! Destination ID: 5b0c1f0e-8d7e-4f59-9c1a-2a6f1e3b7d44
//! Message: hello
//! Encrypt? (y)es / (n)o / (c)ancel: y
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use rendezvous_client::{ClientConfig, ClientError, RendezvousClient, TcpTransport};
use rendezvous_types::ClientId;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod prompt;
mod render;

use prompt::{Action, Prompt, HELP};

type Client = RendezvousClient<TcpTransport>;

/// Interactive client for the rendezvous relay.
#[derive(Parser, Debug)]
#[command(name = "rendezvous-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Relay address
    #[arg(long, short, default_value = "localhost:3000")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Quiet by default so log lines do not interleave with the prompt.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let client = Arc::new(RendezvousClient::tcp(ClientConfig::new(&cli.server)));
    let me = client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", cli.server))?;
    println!("Connected to {} as {}", cli.server, me);
    println!("Type 'help' for a list of commands.");

    let mut events = tokio::spawn(print_events(client.clone(), me));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut prompt = Prompt::new();
    show_prompt(&prompt);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("\nReceived interrupt signal. Exiting...");
                break;
            }
            _ = &mut events => {
                println!("\nConnection to relay lost.");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                let action = prompt.handle(&line);
                if !execute(&client, me, action).await? {
                    println!("Exiting...");
                    break;
                }
                show_prompt(&prompt);
            }
        }
    }

    if let Err(e) = client.close().await {
        tracing::debug!("Close failed: {}", e);
    }
    events.abort();
    Ok(())
}

/// Print relay traffic until the connection ends.
async fn print_events(client: Arc<Client>, me: ClientId) {
    loop {
        match client.next_event().await {
            Ok(event) => {
                println!();
                for line in render::render(&event, me) {
                    println!("{}", line);
                }
            }
            Err(e) => {
                tracing::warn!("Connection ended: {}", e);
                return;
            }
        }
    }
}

/// Run one prompt action. Returns `false` when the user asked to leave.
async fn execute(client: &Client, me: ClientId, action: Action) -> Result<bool> {
    let result = match action {
        Action::None => Ok(()),
        Action::Exit => return Ok(false),
        Action::Help => {
            println!("{}", HELP);
            Ok(())
        }
        Action::WhoAmI => {
            println!("Your UUID: {}", me);
            Ok(())
        }
        Action::Notice(text) => {
            println!("{}", text);
            Ok(())
        }
        Action::Discover => client.discover().await,
        Action::Broadcast(text) => client.broadcast(&text).await,
        Action::Send {
            to,
            text,
            encrypt: true,
        } => client.send_encrypted(to, &text).await,
        Action::Send {
            to,
            text,
            encrypt: false,
        } => client.send_message(to, &text).await,
    };

    match result {
        Ok(()) => Ok(true),
        Err(ClientError::NoSharedKey(peer)) => {
            println!(
                "No shared key found for target ID: {} (run 'discover' first)",
                peer
            );
            Ok(true)
        }
        Err(e) if e.is_fatal() => Err(e).context("Lost connection to relay"),
        Err(e) => {
            println!("Error: {}", e);
            Ok(true)
        }
    }
}

fn show_prompt(prompt: &Prompt) {
    if let Err(e) = write_prompt(&mut std::io::stdout(), prompt) {
        tracing::debug!("Prompt write failed: {}", e);
    }
}

/// Write the prompt text and flush, since it has no newline.
fn write_prompt(out: &mut impl Write, prompt: &Prompt) -> std::io::Result<()> {
    out.write_all(prompt.text().as_bytes())?;
    out.flush()
}
