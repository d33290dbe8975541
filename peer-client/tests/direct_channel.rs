//! End-to-end client tests against a real relay: negotiation over the
//! gateway, direct TCP channel between two clients, relay fallback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_wire::TurnConfig;
use tokio::sync::mpsc;
use tokio::time::timeout;

use peer_client::common::commands::ClientCommand;
use peer_client::common::events::ClientEvent;
use peer_client::common::types::{ConnectionStatus, SessionState};
use peer_client::config::ClientConfig;
use peer_client::network::client::ChatClient;
use peer_client::network::tcp::TcpTransportFactory;

use relay_server::config::ServerConfig;
use relay_server::http::{self, AppState};
use relay_server::network::registry::PeerRegistry;
use relay_server::storage::MessageStore;

const API_KEY: &str = "test-key";
const RECV_TIMEOUT: Duration = Duration::from_secs(10);

async fn spawn_relay() -> SocketAddr {
    let config = ServerConfig {
        port: 0,
        api_key: API_KEY.to_string(),
        sqlite_path: ":memory:".to_string(),
        turn: TurnConfig::default(),
    };
    let state = AppState {
        registry: Arc::new(PeerRegistry::new()),
        store: Arc::new(MessageStore::open(":memory:").expect("store")),
        config: Arc::new(config),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, http::router(state)).await.expect("serve");
    });
    addr
}

struct TestClient {
    peer_id: String,
    commands: mpsc::Sender<ClientCommand>,
    events: mpsc::Receiver<ClientEvent>,
}

async fn start_client(addr: SocketAddr, name: &str) -> TestClient {
    let config = ClientConfig {
        signaling_url: format!("ws://{addr}/ws"),
        api_url: format!("http://{addr}"),
        api_key: API_KEY.to_string(),
        display_name: name.to_string(),
    };
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(64);
    let client = ChatClient::new(config, event_tx, cmd_rx, Arc::new(TcpTransportFactory));
    let peer_id = client.peer_id().to_string();
    tokio::spawn(async move {
        client.run().await.expect("client run");
    });
    TestClient {
        peer_id,
        commands: cmd_tx,
        events: event_rx,
    }
}

/// Skip events until the matcher produces a value.
async fn wait_for<T>(
    client: &mut TestClient,
    mut matcher: impl FnMut(&ClientEvent) -> Option<T>,
) -> T {
    loop {
        let event = timeout(RECV_TIMEOUT, client.events.recv())
            .await
            .expect("timed out waiting for client event")
            .expect("event stream ended");
        if let Some(value) = matcher(&event) {
            return value;
        }
    }
}

async fn wait_connected(client: &mut TestClient) {
    wait_for(client, |event| match event {
        ClientEvent::Status {
            status: ConnectionStatus::Connected,
            ..
        } => Some(()),
        _ => None,
    })
    .await;
}

async fn wait_session_state(client: &mut TestClient, peer: &str, expected: SessionState) {
    wait_for(client, |event| match event {
        ClientEvent::SessionChanged { peer_id, state, .. }
            if peer_id == peer && *state == expected =>
        {
            Some(())
        }
        _ => None,
    })
    .await;
}

#[tokio::test]
async fn direct_channel_carries_targeted_messages_with_identity() {
    let addr = spawn_relay().await;
    let mut alice = start_client(addr, "Alice").await;
    let mut bob = start_client(addr, "Bob").await;
    wait_connected(&mut alice).await;
    wait_connected(&mut bob).await;

    alice
        .commands
        .send(ClientCommand::ConnectToPeer {
            peer_id: bob.peer_id.clone(),
        })
        .await
        .expect("command");

    let bob_id = bob.peer_id.clone();
    let alice_id = alice.peer_id.clone();
    wait_session_state(&mut alice, &bob_id, SessionState::Connected).await;
    wait_session_state(&mut bob, &alice_id, SessionState::Connected).await;

    alice
        .commands
        .send(ClientCommand::SendMessage {
            content: "psst, direct".into(),
            receiver_id: Some(bob.peer_id.clone()),
        })
        .await
        .expect("command");

    // Alice logs her own copy; Bob receives the identical record over the
    // direct channel, id included.
    let sent = wait_for(&mut alice, |event| match event {
        ClientEvent::MessageReceived(message) if message.content == "psst, direct" => {
            Some(message.clone())
        }
        _ => None,
    })
    .await;
    let received = wait_for(&mut bob, |event| match event {
        ClientEvent::MessageReceived(message) if message.content == "psst, direct" => {
            Some(message.clone())
        }
        _ => None,
    })
    .await;
    assert_eq!(received.id, sent.id);
    assert_eq!(received.sender_id, alice.peer_id);
    assert_eq!(received.sender_name.as_deref(), Some("Alice"));
    assert_eq!(received.receiver_id.as_deref(), Some(bob.peer_id.as_str()));
}

#[tokio::test]
async fn broadcast_falls_back_to_the_relay_path() {
    let addr = spawn_relay().await;
    let mut alice = start_client(addr, "Alice").await;
    let mut bob = start_client(addr, "Bob").await;
    wait_connected(&mut alice).await;
    wait_connected(&mut bob).await;

    bob.commands
        .send(ClientCommand::SendMessage {
            content: "hello everyone".into(),
            receiver_id: None,
        })
        .await
        .expect("command");

    let delivered = wait_for(&mut alice, |event| match event {
        ClientEvent::MessageReceived(message) if message.content == "hello everyone" => {
            Some(message.clone())
        }
        _ => None,
    })
    .await;
    assert_eq!(delivered.sender_id, bob.peer_id);
    assert_eq!(delivered.receiver_id, None);

    // The sender's own copy arrives through the ack, same record.
    let acked = wait_for(&mut bob, |event| match event {
        ClientEvent::MessageReceived(message) if message.content == "hello everyone" => {
            Some(message.clone())
        }
        _ => None,
    })
    .await;
    assert_eq!(acked.id, delivered.id);
}

#[tokio::test]
async fn late_joiner_sees_relay_history() {
    let addr = spawn_relay().await;
    let mut alice = start_client(addr, "Alice").await;
    wait_connected(&mut alice).await;

    alice
        .commands
        .send(ClientCommand::SendMessage {
            content: "for the record".into(),
            receiver_id: None,
        })
        .await
        .expect("command");
    wait_for(&mut alice, |event| match event {
        ClientEvent::MessageReceived(message) if message.content == "for the record" => Some(()),
        _ => None,
    })
    .await;

    let mut bob = start_client(addr, "Bob").await;
    let history = wait_for(&mut bob, |event| match event {
        ClientEvent::HistorySynced(messages) => Some(messages.clone()),
        _ => None,
    })
    .await;
    assert!(history.iter().any(|m| m.content == "for the record"));
}
