use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use peer_client::common::commands::ClientCommand;
use peer_client::common::events::ClientEvent;
use peer_client::config::ClientConfig;
use peer_client::network::client::ChatClient;
use peer_client::network::tcp::TcpTransportFactory;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Terminal chat client for the relay gateway.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// WebSocket URL of the signaling gateway
    #[arg(long)]
    server_url: Option<String>,
    /// Base URL of the relay's REST API
    #[arg(long)]
    api_url: Option<String>,
    /// API key presented at connect time
    #[arg(long)]
    api_key: Option<String>,
    /// Display name announced to other peers
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.server_url {
        config.signaling_url = url;
    }
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    if let Some(key) = cli.api_key {
        config.api_key = key;
    }
    if let Some(name) = cli.name {
        config.display_name = name;
    }

    // Front end <-> network channels
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    let (event_tx, mut event_rx) = mpsc::channel(100);

    let client = ChatClient::new(config, event_tx, cmd_rx, Arc::new(TcpTransportFactory));
    println!("Your peer id: {}", client.peer_id());
    println!("Commands: /peers, /connect <peerId>, /msg <peerId> <text>, /quit");
    println!("Any other line is broadcast to everyone.");

    tokio::spawn(async move {
        if let Err(err) = client.run().await {
            log::error!("Network client terminated: {err}");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !dispatch_line(line.trim(), &cmd_tx).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    log::error!("stdin error: {err}");
                    break;
                }
            },
            event = event_rx.recv() => match event {
                Some(event) => print_event(event),
                None => break,
            },
        }
    }
}

/// Returns false when the user asked to quit.
async fn dispatch_line(line: &str, cmd_tx: &mpsc::Sender<ClientCommand>) -> bool {
    if line.is_empty() {
        return true;
    }
    let command = if line == "/quit" {
        return false;
    } else if line == "/peers" {
        ClientCommand::RefreshPeers
    } else if let Some(peer_id) = line.strip_prefix("/connect ") {
        ClientCommand::ConnectToPeer {
            peer_id: peer_id.trim().to_string(),
        }
    } else if let Some(rest) = line.strip_prefix("/msg ") {
        match rest.trim().split_once(' ') {
            Some((peer_id, text)) => ClientCommand::SendMessage {
                content: text.to_string(),
                receiver_id: Some(peer_id.to_string()),
            },
            None => {
                println!("usage: /msg <peerId> <text>");
                return true;
            }
        }
    } else if line.starts_with('/') {
        println!("Commands: /peers, /connect <peerId>, /msg <peerId> <text>, /quit");
        return true;
    } else {
        ClientCommand::SendMessage {
            content: line.to_string(),
            receiver_id: None,
        }
    };
    cmd_tx.send(command).await.is_ok()
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::MessageReceived(message) => {
            let name = message.sender_name.as_deref().unwrap_or(&message.sender_id);
            match &message.receiver_id {
                Some(_) => println!("[{name} -> you] {}", message.content),
                None => println!("[{name}] {}", message.content),
            }
        }
        ClientEvent::HistorySynced(messages) => {
            println!("--- {} earlier messages ---", messages.len());
            for message in &messages {
                let name = message.sender_name.as_deref().unwrap_or(&message.sender_id);
                println!("[{name}] {}", message.content);
            }
            println!("---");
        }
        ClientEvent::PeerJoined(peer) => {
            println!("* {} joined ({})", peer.display_name, peer.peer_id);
        }
        ClientEvent::PeerLeft(peer_id) => {
            println!("* {peer_id} left");
        }
        ClientEvent::PeerList(peers) => {
            if peers.is_empty() {
                println!("No other peers online.");
            } else {
                println!("Online peers:");
                for peer in &peers {
                    println!("  {} ({})", peer.display_name, peer.peer_id);
                }
            }
        }
        ClientEvent::Status { status, reason } => match reason {
            Some(reason) => println!("* connection {status:?}: {reason}"),
            None => println!("* connection {status:?}"),
        },
        ClientEvent::SessionChanged { peer_id, state, reason } => match reason {
            Some(reason) => println!("* session {peer_id}: {state:?} ({reason})"),
            None => println!("* session {peer_id}: {state:?}"),
        },
    }
}
