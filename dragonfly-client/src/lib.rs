use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use dragonfly_core::err::client::{self, ClientError};
use dragonfly_core::io::read_message;
use dragonfly_core::{AckCode, Encode, Message, Payload};

type CodeHook = Arc<dyn Fn(AckCode) + Send + Sync>;
type MessageHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Callbacks dispatched by the receive worker. Every hook is optional;
/// an unset hook drops the event.
#[derive(Clone, Default)]
pub struct Hooks {
    on_connected: Option<CodeHook>,
    on_disconnected: Option<CodeHook>,
    on_subscribed: Option<CodeHook>,
    on_unsubscribed: Option<CodeHook>,
    on_published: Option<CodeHook>,
    on_message: Option<MessageHook>,
}

impl Hooks {
    pub fn new() -> Self {
        return Self::default();
    }

    /// Fires with the CONNECTED ack code during the handshake, before
    /// [AsyncClient::connect] returns.
    pub fn on_connected(mut self, hook: impl Fn(AckCode) + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(hook));
        return self;
    }

    /// Fires when the broker acknowledges a disconnect, or when it closes
    /// the stream outright.
    pub fn on_disconnected(mut self, hook: impl Fn(AckCode) + Send + Sync + 'static) -> Self {
        self.on_disconnected = Some(Arc::new(hook));
        return self;
    }

    pub fn on_subscribed(mut self, hook: impl Fn(AckCode) + Send + Sync + 'static) -> Self {
        self.on_subscribed = Some(Arc::new(hook));
        return self;
    }

    pub fn on_unsubscribed(mut self, hook: impl Fn(AckCode) + Send + Sync + 'static) -> Self {
        self.on_unsubscribed = Some(Arc::new(hook));
        return self;
    }

    pub fn on_published(mut self, hook: impl Fn(AckCode) + Send + Sync + 'static) -> Self {
        self.on_published = Some(Arc::new(hook));
        return self;
    }

    /// Fires with the topic and payload of every inbound PUBLISH.
    pub fn on_message(mut self, hook: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(hook));
        return self;
    }
}

/// Asynchronous Dragonfly client: performs the CONNECT handshake up front,
/// then serves inbound frames from a background worker while the caller
/// publishes and subscribes from the write half.
pub struct AsyncClient {
    writer: OwnedWriteHalf,
    worker: JoinHandle<()>,
    disconnect_rx: oneshot::Receiver<AckCode>,
}

impl AsyncClient {
    /// Connects, sends CONNECT with the given credentials, and waits for
    /// the CONNECTED ack. The `on_connected` hook fires with the ack code
    /// either way; a failure code also fails the call.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        username: Option<String>,
        password: Option<String>,
        hooks: Hooks,
    ) -> Result<Self, ClientError> {
        let mut stream = TcpStream::connect(addr).await?;

        let frame = Message::connect(username, password).encode()?;
        stream.write_all(&frame).await?;

        let code = match read_message::<_, ClientError>(&mut stream).await? {
            Some(message) => match message.payload() {
                Payload::ConnAck { code, .. } => *code,
                _ => {
                    return Err(ClientError::new(
                        client::ErrorKind::ProtocolError,
                        format!(
                            "First frame received from the broker was {}, not CONNECTED.",
                            message.kind()
                        ),
                    ));
                }
            },
            None => {
                return Err(ClientError::new(
                    client::ErrorKind::ProtocolError,
                    String::from("Broker closed the stream during the handshake."),
                ));
            }
        };

        if let Some(hook) = &hooks.on_connected {
            hook(code);
        }

        if code.is_err() {
            return Err(ClientError::new(
                client::ErrorKind::ConnectionRefused,
                format!("Broker refused the connection: {code}."),
            ));
        }

        let (read_half, write_half) = stream.into_split();
        let (done_tx, done_rx) = oneshot::channel();

        let worker = tokio::spawn(receive_loop(read_half, hooks, done_tx));

        return Ok(Self {
            writer: write_half,
            worker,
            disconnect_rx: done_rx,
        });
    }

    pub async fn publish(&mut self, topic: &str, body: &str) -> Result<(), ClientError> {
        let frame = Message::publish(topic.to_owned(), body.to_owned()).encode()?;
        self.writer.write_all(&frame).await?;
        return Ok(());
    }

    pub async fn subscribe(&mut self, pattern: &str) -> Result<(), ClientError> {
        let frame = Message::subscribe(pattern.to_owned()).encode()?;
        self.writer.write_all(&frame).await?;
        return Ok(());
    }

    pub async fn unsubscribe(&mut self, pattern: &str) -> Result<(), ClientError> {
        let frame = Message::unsubscribe(pattern.to_owned()).encode()?;
        self.writer.write_all(&frame).await?;
        return Ok(());
    }

    /// Graceful shutdown: sends CONNECT with the disconnect flag, waits for
    /// the worker to observe the broker's CONNECTED-with-disconnect ack,
    /// and closes the stream.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        let frame = Message::disconnect_request().encode()?;
        self.writer.write_all(&frame).await?;

        // the sender is dropped instead when the broker closes first
        let _ = self.disconnect_rx.await;

        let _ = self.writer.shutdown().await;
        let _ = self.worker.await;

        return Ok(());
    }
}

async fn receive_loop(mut read_half: OwnedReadHalf, hooks: Hooks, done: oneshot::Sender<AckCode>) {
    let mut done = Some(done);

    loop {
        match read_message::<_, ClientError>(&mut read_half).await {
            Ok(Some(message)) => match message.payload() {
                Payload::ConnAck { code, disconnect } if *disconnect => {
                    if let Some(hook) = &hooks.on_disconnected {
                        hook(*code);
                    }
                    if let Some(done) = done.take() {
                        let _ = done.send(*code);
                    }
                    return;
                }
                Payload::ConnAck { code, .. } => {
                    if let Some(hook) = &hooks.on_connected {
                        hook(*code);
                    }
                }
                Payload::Publish { topic, body } => {
                    if let Some(hook) = &hooks.on_message {
                        hook(topic, body);
                    }
                }
                Payload::PubAck { code } => {
                    if let Some(hook) = &hooks.on_published {
                        hook(*code);
                    }
                }
                Payload::SubAck { code } => {
                    if let Some(hook) = &hooks.on_subscribed {
                        hook(*code);
                    }
                }
                Payload::UnsubAck { code } => {
                    if let Some(hook) = &hooks.on_unsubscribed {
                        hook(*code);
                    }
                }
                _ => {
                    log::warn!("Ignoring unexpected {} frame.", message.kind());
                }
            },
            Ok(None) => {
                if let Some(hook) = &hooks.on_disconnected {
                    hook(AckCode::SUCCESS);
                }
                return;
            }
            Err(err) => match err.kind() {
                // a garbled frame is dropped; the stream stays aligned
                client::ErrorKind::DecodeError => {
                    log::warn!("Dropping malformed frame: {err}");
                }
                _ => {
                    log::warn!("Receive loop ending: {err}");
                    return;
                }
            },
        }
    }
}
