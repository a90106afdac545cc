//! SMP command-line client
//!
//! Queue-based messaging over the SimpleX Messaging Protocol

mod config;

use clap::{Parser, Subcommand};
use smp_core::{ClientEvent, FileContactStorage, LinkStyle, MAX_CONTACTS, SmpClient};
use smp_transport::TlsConnector;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use config::Config;

/// Longest single wait of the interactive loop, so typed lines go out promptly
const INPUT_SLICE: Duration = Duration::from_millis(250);

/// smp - private messaging over SimpleX queues
#[derive(Parser)]
#[command(name = "smp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (default: user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a reply queue, print an invitation link and wait for a peer
    Invite {
        /// Print the https://simplex.chat form of the link
        #[arg(long)]
        https: bool,
    },

    /// Join an invitation link and chat with the peer
    Connect {
        /// Invitation link (simplex:/contact#..., https://simplex.chat/contact#... or smp://...)
        #[arg(required = true)]
        link: String,
    },

    /// Subscribe to all contact queues and print incoming events
    Listen,

    /// Manage contact queues
    Contacts {
        #[command(subcommand)]
        action: ContactsAction,
    },

    /// Show configuration and contact status
    Status,
}

#[derive(Subcommand)]
enum ContactsAction {
    /// List contacts
    List,

    /// Create a queue for a new contact
    Add {
        /// Contact name
        #[arg(required = true)]
        name: String,
    },

    /// Delete a contact and its queue
    Remove {
        /// Contact name
        #[arg(required = true)]
        name: String,
    },

    /// Delete every contact
    Clear,
}

/// Input from the terminal side of an interactive session
enum Input {
    Line(String),
    Quit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = if cli.config.is_some() {
        Config::load(&config_path)?
    } else {
        Config::load_or_default(&config_path)?
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    // Validate configuration
    config.validate()?;

    let mut client = build_client(&config)?;
    let result = match cli.command {
        Commands::Invite { https } => invite(&mut client, https).await,
        Commands::Connect { link } => connect(&mut client, &link).await,
        Commands::Listen => listen(&mut client).await,
        Commands::Contacts { action } => contacts(&mut client, action).await,
        Commands::Status => show_status(&client, &config, &config_path).await,
    };

    if let Err(e) = client.close().await {
        tracing::warn!("Closing sessions failed: {}", e);
    }
    result
}

fn build_client(config: &Config) -> anyhow::Result<SmpClient> {
    let client_config = config.client_config()?;
    let connector = TlsConnector::new(client_config.timeouts.connect, client_config.timeouts.handshake)?;
    let storage = FileContactStorage::new(&config.storage.dir);
    Ok(SmpClient::new(client_config, Arc::new(connector), Arc::new(storage))?)
}

/// Create an invitation and wait for the peer to join it
async fn invite(client: &mut SmpClient, https: bool) -> anyhow::Result<()> {
    let style = if https { LinkStyle::Https } else { LinkStyle::Simplex };
    let link = client.create_invitation(style).await?;

    println!("Invitation link:");
    println!();
    println!("{link}");
    println!();
    println!("Waiting for a peer to join. Type a line to send it, Ctrl+C to stop.");

    chat(client, None).await
}

/// Join an invitation and start chatting
async fn connect(client: &mut SmpClient, link: &str) -> anyhow::Result<()> {
    tracing::info!("Joining invitation");
    let peer = client.join(link).await?;

    println!("Joined {peer}");
    println!("Type a line to send it, Ctrl+C to stop.");

    chat(client, Some(peer)).await
}

/// Subscribe every stored queue and print events until Ctrl+C
async fn listen(client: &mut SmpClient) -> anyhow::Result<()> {
    let contacts = client.contact_names().await;
    let subscribed = client.subscribe_all().await?;
    println!("Subscribed {subscribed} of {} queues", contacts.len());
    println!("Press Ctrl+C to stop");

    chat(client, None).await
}

/// Receive loop with terminal input.
///
/// Lines are sent to the current peer; `@name text` addresses a specific
/// connection. The loop never cancels a poll in flight, so every delivered
/// message is acknowledged before input is handled.
async fn chat(client: &mut SmpClient, mut current: Option<String>) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_input(tx);
    let slice = client.config().timeouts.receive_poll.min(INPUT_SLICE);

    loop {
        while let Ok(input) = rx.try_recv() {
            match input {
                Input::Quit => {
                    println!("\nShutting down...");
                    return Ok(());
                }
                Input::Line(line) => send_line(client, current.as_deref(), &line).await,
            }
        }

        if let Some(event) = client.poll(slice).await? {
            if let Some(peer) = print_event(&event) {
                current = Some(peer);
            }
        }
    }
}

fn spawn_input(tx: mpsc::UnboundedSender<Input>) {
    let quit = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit.send(Input::Quit);
        }
    });
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(Input::Line(line)).is_err() {
                return;
            }
        }
    });
}

async fn send_line(client: &mut SmpClient, current: Option<&str>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let (peer, text) = match line.strip_prefix('@').and_then(|rest| rest.split_once(' ')) {
        Some((peer, text)) => (peer, text),
        None => match current {
            Some(peer) => (peer, line),
            None => {
                println!("No peer yet");
                return;
            }
        },
    };
    if let Err(e) = client.send_text(peer, text).await {
        println!("Not sent to {peer}: {e}");
    }
}

/// Print an event; returns the peer it introduces, if any.
fn print_event(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::ConfirmationAccepted { peer } => {
            println!("{peer} joined the invitation");
            Some(peer.clone())
        }
        ClientEvent::Connected { peer } => {
            println!("Connected to {peer}");
            Some(peer.clone())
        }
        ClientEvent::Message { peer, text, .. } => {
            println!("{peer}> {text}");
            None
        }
        ClientEvent::Invitation(pending) => {
            println!(
                "Invitation to a queue on {}:{} not joined (auto-accept off or no e2e keys)",
                pending.host, pending.port
            );
            None
        }
        ClientEvent::JoinedInvitation { peer } => {
            println!("Joined invitation from {peer}");
            Some(peer.clone())
        }
        ClientEvent::SubscriptionEnded { .. } => {
            println!("A subscription was taken over by another client");
            None
        }
        ClientEvent::HandshakeFailed { reason } => {
            println!("Handshake failed: {reason}");
            None
        }
        ClientEvent::Unrecognized => None,
    }
}

/// Contact table commands
async fn contacts(client: &mut SmpClient, action: ContactsAction) -> anyhow::Result<()> {
    match action {
        ContactsAction::List => {
            let names = client.contact_names().await;
            println!("Contacts ({}/{}):", names.len(), MAX_CONTACTS);
            if names.is_empty() {
                println!("  (none)");
            }
            for name in names {
                println!("  {name}");
            }
        }
        ContactsAction::Add { name } => {
            let index = client.add_contact(&name).await?;
            println!("Added {name} (slot {index})");
        }
        ContactsAction::Remove { name } => {
            client.remove_contact(&name).await?;
            println!("Removed {name}");
        }
        ContactsAction::Clear => {
            client.clear_contacts().await?;
            println!("All contacts cleared");
        }
    }
    Ok(())
}

/// Show configuration and local status
async fn show_status(client: &SmpClient, config: &Config, config_path: &std::path::Path) -> anyhow::Result<()> {
    let status = client.status().await;

    println!("SMP Client Status");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("Configuration:");
    println!("  File: {}", config_path.display());
    println!("  Server: {}", config.server.address);
    println!("  Display name: {}", config.client.display_name);
    println!("  Optimistic handshake: {}", config.client.optimistic_handshake);
    println!("  Auto-accept invitations: {}", config.client.auto_accept_invitations);
    println!("  Secure peer queue: {}", config.client.secure_peer_queue);
    println!();

    println!("Storage:");
    println!("  Directory: {}", config.storage.dir.display());
    println!("  Contacts: {}/{}", status.contacts, MAX_CONTACTS);
    println!();

    println!("Session:");
    println!("  Connected: {}", status.home_connected);
    println!("  Reply queue: {}", status.has_reply_queue);
    println!("  Peer servers: {}", status.peer_servers);

    Ok(())
}
