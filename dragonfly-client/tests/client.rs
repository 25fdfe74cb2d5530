use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use dragonfly_broker::broker::Broker;
use dragonfly_broker::config::BrokerConfig;
use dragonfly_client::{AsyncClient, Hooks};
use dragonfly_core::AckCode;

async fn start(config_text: &str) -> SocketAddr {
    let mut config = BrokerConfig::parse(config_text).expect("Could not parse test config");
    config.set_addr("127.0.0.1", 0);

    let broker = Broker::bind(config).await.expect("Could not bind test broker");
    let addr = broker.local_addr().unwrap();

    tokio::spawn(broker.run());

    return addr;
}

#[tokio::test]
async fn publish_reaches_a_subscriber() {
    let addr = start("").await;

    let (messages_tx, mut messages_rx) = mpsc::unbounded_channel();
    let (subs_tx, mut subs_rx) = mpsc::unbounded_channel();

    let hooks = Hooks::new()
        .on_subscribed(move |code| {
            subs_tx.send(code).unwrap();
        })
        .on_message(move |topic, body| {
            messages_tx.send((topic.to_owned(), body.to_owned())).unwrap();
        });

    let mut subscriber = AsyncClient::connect(addr, None, None, hooks).await.unwrap();
    subscriber.subscribe("chat").await.unwrap();

    let code = timeout(Duration::from_secs(5), subs_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, AckCode::SUCCESS);

    let mut publisher = AsyncClient::connect(addr, None, None, Hooks::new())
        .await
        .unwrap();
    publisher.publish("chat/room1", "hello").await.unwrap();

    let (topic, body) = timeout(Duration::from_secs(5), messages_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(topic, "chat/room1");
    assert_eq!(body, "hello");
}

#[tokio::test]
async fn handshake_refusal_fails_the_connect() {
    let addr = start("# General\nrequire_auth true\n\n# User\nusername User\npassword Pwd\n").await;

    let seen = Arc::new(Mutex::new(None));
    let seen_clone = Arc::clone(&seen);

    let hooks = Hooks::new().on_connected(move |code| {
        *seen_clone.lock().unwrap() = Some(code);
    });

    let result = AsyncClient::connect(
        addr,
        Some(String::from("Nobody")),
        Some(String::from("Pwd")),
        hooks,
    )
    .await;

    assert!(result.is_err());
    assert_eq!(*seen.lock().unwrap(), Some(AckCode::REFUSED));
}

#[tokio::test]
async fn credentialed_handshake_succeeds() {
    let addr = start("# General\nrequire_auth true\n\n# User\nusername User\npassword Pwd\n").await;

    let client = AsyncClient::connect(
        addr,
        Some(String::from("User")),
        Some(String::from("Pwd")),
        Hooks::new(),
    )
    .await;

    assert!(client.is_ok());
}

#[tokio::test]
async fn disconnect_waits_for_the_ack() {
    let addr = start("").await;

    let disconnected = Arc::new(AtomicBool::new(false));
    let disconnected_clone = Arc::clone(&disconnected);

    let hooks = Hooks::new().on_disconnected(move |_code| {
        disconnected_clone.store(true, Ordering::SeqCst);
    });

    let client = AsyncClient::connect(addr, None, None, hooks).await.unwrap();

    timeout(Duration::from_secs(5), client.disconnect())
        .await
        .unwrap()
        .unwrap();

    assert!(disconnected.load(Ordering::SeqCst));
}

#[tokio::test]
async fn ack_hooks_fire_per_operation() {
    let addr = start("").await;

    let (acks_tx, mut acks_rx) = mpsc::unbounded_channel();
    let pub_tx = acks_tx.clone();
    let sub_tx = acks_tx.clone();
    let unsub_tx = acks_tx;

    let hooks = Hooks::new()
        .on_published(move |code| {
            pub_tx.send(("published", code)).unwrap();
        })
        .on_subscribed(move |code| {
            sub_tx.send(("subscribed", code)).unwrap();
        })
        .on_unsubscribed(move |code| {
            unsub_tx.send(("unsubscribed", code)).unwrap();
        });

    let mut client = AsyncClient::connect(addr, None, None, hooks).await.unwrap();

    client.subscribe("a").await.unwrap();
    client.publish("b", "x").await.unwrap();
    client.unsubscribe("a").await.unwrap();
    client.unsubscribe("a").await.unwrap();

    assert_eq!(next(&mut acks_rx).await, ("subscribed", AckCode::SUCCESS));
    assert_eq!(next(&mut acks_rx).await, ("published", AckCode::SUCCESS));
    assert_eq!(next(&mut acks_rx).await, ("unsubscribed", AckCode::SUCCESS));
    assert_eq!(next(&mut acks_rx).await, ("unsubscribed", AckCode::NO_OP));
}

async fn next(rx: &mut mpsc::UnboundedReceiver<(&'static str, AckCode)>) -> (&'static str, AckCode) {
    return timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for an ack")
        .expect("Hook channel closed");
}
