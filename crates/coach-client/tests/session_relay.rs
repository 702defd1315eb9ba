//! Session manager against a live relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use coach_client::{ConnectionState, SessionConfig, SessionManager};
use coach_db::Database;
use coach_gateway::{Relay, router};
use coach_types::events::ServerEvent;

async fn spawn_relay() -> (SocketAddr, Relay) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let relay = Relay::new(db.clone(), db);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(relay.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, relay)
}

/// Session whose events and state changes are forwarded to channels.
struct Client {
    session: SessionManager,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    states: mpsc::UnboundedReceiver<ConnectionState>,
}

fn client() -> Client {
    let session = SessionManager::new(SessionConfig::default());
    let (event_tx, events) = mpsc::unbounded_channel();
    let (state_tx, states) = mpsc::unbounded_channel();
    let _ = session.on_message(move |e| {
        let _ = event_tx.send(e.clone());
    });
    let _ = session.on_connection_change(move |s| {
        let _ = state_tx.send(s.clone());
    });
    Client {
        session,
        events,
        states,
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

async fn wait_for(events: &mut mpsc::UnboundedReceiver<ServerEvent>, kind: &str) -> ServerEvent {
    loop {
        let event = recv(events).await;
        if event.kind() == kind {
            return event;
        }
    }
}

async fn connect(client: &mut Client, addr: SocketAddr, user_id: i64) {
    client.session.connect(user_id, format!("ws://{}/ws", addr));
    assert_eq!(recv(&mut client.states).await, ConnectionState::connecting());
    assert_eq!(recv(&mut client.states).await, ConnectionState::connected());
    match wait_for(&mut client.events, "connected").await {
        ServerEvent::Connected { user_id: id, .. } => assert_eq!(id, user_id),
        other => panic!("expected connected, got {:?}", other),
    }
}

#[tokio::test]
async fn client_and_coach_exchange_messages() {
    let (addr, _relay) = spawn_relay().await;
    let mut luca = client();
    let mut coach = client();
    connect(&mut luca, addr, 1).await;
    connect(&mut coach, addr, 2).await;

    assert!(luca.session.send_message(2, "Finished the squat session"));

    let sent = match wait_for(&mut luca.events, "message_sent").await {
        ServerEvent::MessageSent { message } => message,
        other => panic!("unexpected {:?}", other),
    };
    let received = match wait_for(&mut coach.events, "new_message").await {
        ServerEvent::NewMessage { message } => message,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(sent.id, received.id);
    assert_eq!(received.text, "Finished the squat session");
    assert_eq!(received.sender_name.as_deref(), Some("Luca Rossi"));

    assert!(coach.session.mark_as_read(received.id));
    match wait_for(&mut coach.events, "message_read").await {
        ServerEvent::MessageRead { message_id, success } => {
            assert_eq!(message_id, received.id);
            assert!(success);
        }
        other => panic!("unexpected {:?}", other),
    }

    assert!(luca.session.request_history(2));
    match wait_for(&mut luca.events, "chat_history").await {
        ServerEvent::ChatHistory { messages, other_user_id } => {
            assert_eq!(other_user_id, 2);
            assert_eq!(messages.len(), 1);
            assert!(messages[0].is_read());
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn ping_gets_pong() {
    let (addr, _relay) = spawn_relay().await;
    let mut luca = client();
    connect(&mut luca, addr, 1).await;

    assert!(luca.session.ping());
    assert!(matches!(
        wait_for(&mut luca.events, "pong").await,
        ServerEvent::Pong { .. }
    ));
}

#[tokio::test]
async fn disconnect_unregisters_from_relay() {
    let (addr, relay) = spawn_relay().await;
    let mut luca = client();
    connect(&mut luca, addr, 1).await;
    assert!(relay.registry().is_connected(1).await);

    luca.session.disconnect();
    assert!(!luca.session.is_ready());

    for _ in 0..100 {
        if !relay.registry().is_connected(1).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("relay still routes to user 1");
}
