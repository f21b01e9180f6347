//! Cross-instance delivery through the shared fan-out broker.
//!
//! Simulates two gateway processes by running two session registries, each
//! with its own fan-out listener, over one shared broker. A message sent
//! through one instance's dispatcher must reach subscribers on both.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use broker::{Broker, MemoryBroker};
use chat_store::Database;
use gateway::registry::SESSION_CHANNEL_BUFFER;
use gateway::{FanoutListener, MessageDispatcher, SessionRegistry, SessionState};
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Instance {
    registry: Arc<SessionRegistry>,
    _shutdown_tx: mpsc::Sender<()>,
}

/// Spin up one simulated gateway process: a registry plus a running
/// fan-out listener on the shared broker.
fn start_instance(broker_impl: Arc<dyn Broker>) -> Instance {
    let registry = Arc::new(SessionRegistry::new());
    let listener = Arc::new(FanoutListener::new(registry.clone(), broker_impl));
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        listener.run(shutdown_rx).await.expect("listener failed");
    });
    Instance {
        registry,
        _shutdown_tx: shutdown_tx,
    }
}

/// Wait until `expected` listeners hold a broker subscription, so no test
/// publishes before the spawned listener tasks are ready.
async fn wait_for_listeners(broker_impl: &MemoryBroker, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while broker_impl.subscriber_count() < expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "fan-out listeners did not subscribe in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Attach an authenticated session subscribed to `room_id`, returning the
/// receiving end of its socket channel.
fn attach_subscriber(
    registry: &SessionRegistry,
    user_id: i64,
    room_id: i64,
) -> mpsc::Receiver<Message> {
    let (tx, rx) = mpsc::channel(SESSION_CHANNEL_BUFFER);
    let session = Arc::new(SessionState::new(tx));
    session.bind_identity(user_id);
    let session_id = registry.register(session);
    registry.subscribe(&session_id, room_id).unwrap();
    rx
}

async fn next_json(rx: &mut mpsc::Receiver<Message>) -> serde_json::Value {
    let frame = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("session channel closed");
    let Message::Text(text) = frame else {
        panic!("expected text frame, got {frame:?}");
    };
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn message_sent_on_one_instance_reaches_subscribers_on_both() {
    let memory = Arc::new(MemoryBroker::new());
    let broker_impl: Arc<dyn Broker> = memory.clone();

    let instance_a = start_instance(broker_impl.clone());
    let instance_b = start_instance(broker_impl.clone());
    wait_for_listeners(&memory, 2).await;

    // Only instance A has a dispatcher wired to the store; instance B
    // never calls the send path.
    let store = Arc::new(Database::open_in_memory().unwrap());
    let dispatcher = MessageDispatcher::new(store, broker_impl);

    let room = dispatcher.open_room(7, 1, 2).unwrap();
    let mut rx_a = attach_subscriber(&instance_a.registry, 1, room.id);
    let mut rx_b = attach_subscriber(&instance_b.registry, 2, room.id);

    let sent = dispatcher
        .send_message(room.id, 1, "안녕하세요")
        .await
        .unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = next_json(rx).await;
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["messageId"], sent.message_id);
        assert_eq!(frame["chatRoomId"], room.id);
        assert_eq!(frame["senderId"], 1);
        assert_eq!(frame["content"], "안녕하세요");
        assert_eq!(frame["isRead"], false);
    }
}

#[tokio::test]
async fn subscribers_of_other_rooms_receive_nothing() {
    let memory = Arc::new(MemoryBroker::new());
    let broker_impl: Arc<dyn Broker> = memory.clone();

    let instance = start_instance(broker_impl.clone());
    wait_for_listeners(&memory, 1).await;

    let store = Arc::new(Database::open_in_memory().unwrap());
    let dispatcher = MessageDispatcher::new(store, broker_impl);

    let room = dispatcher.open_room(7, 1, 2).unwrap();
    let other_room = dispatcher.open_room(8, 3, 4).unwrap();

    let mut rx_room = attach_subscriber(&instance.registry, 1, room.id);
    let mut rx_other = attach_subscriber(&instance.registry, 3, other_room.id);

    dispatcher
        .send_message(room.id, 1, "only room 1")
        .await
        .unwrap();

    let frame = next_json(&mut rx_room).await;
    assert_eq!(frame["chatRoomId"], room.id);

    assert!(
        timeout(Duration::from_millis(100), rx_other.recv())
            .await
            .is_err(),
        "subscriber of another room must not receive the message"
    );
}

#[tokio::test]
async fn sender_instance_receives_via_broker_round_trip() {
    // Even the instance that persisted the message gets it through the
    // listener, not through any direct local path.
    let memory = Arc::new(MemoryBroker::new());
    let broker_impl: Arc<dyn Broker> = memory.clone();

    let instance = start_instance(broker_impl.clone());
    wait_for_listeners(&memory, 1).await;

    let store = Arc::new(Database::open_in_memory().unwrap());
    let dispatcher = MessageDispatcher::new(store, broker_impl);

    let room = dispatcher.open_room(7, 1, 2).unwrap();
    let mut rx = attach_subscriber(&instance.registry, 1, room.id);

    let first = dispatcher.send_message(room.id, 1, "one").await.unwrap();
    let second = dispatcher.send_message(room.id, 2, "two").await.unwrap();

    let frame = next_json(&mut rx).await;
    assert_eq!(frame["messageId"], first.message_id);
    let frame = next_json(&mut rx).await;
    assert_eq!(frame["messageId"], second.message_id);
}
