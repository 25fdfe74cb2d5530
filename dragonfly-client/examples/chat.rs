//! Minimal chat room over a Dragonfly broker.
//!
//! Run a broker, then one `chat` per participant:
//!
//! ```text
//! cargo run --example chat -- alice secret
//! ```
//!
//! Lines from stdin publish to the `chat` topic; an empty line leaves.

use std::env;

use tokio::io::{AsyncBufReadExt, BufReader};

use dragonfly_client::{AsyncClient, Hooks};

#[tokio::main]
async fn main() {
    let mut args = env::args().skip(1);
    let username = args.next();
    let password = args.next();
    let name = username.clone().unwrap_or_else(|| String::from("anonymous"));

    let hooks = Hooks::new()
        .on_connected(|code| {
            if code.is_err() {
                println!("Connection failed: {code}");
            } else {
                println!("Connected");
            }
        })
        .on_subscribed(|code| {
            if code.is_err() {
                println!("Couldn't subscribe: {code}");
            }
        })
        .on_published(|code| {
            if code.is_err() {
                println!("Couldn't publish: {code}");
            }
        })
        .on_disconnected(|_code| {
            println!("Disconnected");
        })
        .on_message(|_topic, body| {
            println!("{body}");
        });

    let mut client = AsyncClient::connect(
        ("localhost", dragonfly_core::DEFAULT_PORT),
        username,
        password,
        hooks,
    )
    .await
    .expect("Could not connect to the broker");

    client.subscribe("chat").await.expect("Could not subscribe");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.is_empty() {
            break;
        }

        client
            .publish("chat", &format!("<{name}> {line}"))
            .await
            .expect("Could not publish");
    }

    client.unsubscribe("chat").await.expect("Could not unsubscribe");
    client.disconnect().await.expect("Could not disconnect");
}
