use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{mpsc, watch, Mutex};

use dragonfly_core::err::server::{ErrorKind, ServerError};
use dragonfly_core::err::DecodeErrorKind;
use dragonfly_core::io::read_message;
use dragonfly_core::topic::TopicPattern;
use dragonfly_core::{AckCode, Encode, Message, Origin, Payload};

use crate::auth::{Action, AuthManager};
use crate::config::BrokerConfig;
use crate::session::{SessionId, SessionRegistry};
use crate::topic::SubscriptionIndex;

/// Broker lifecycle. `Crashed` is terminal and only reached when startup
/// fails; a running broker that is asked to stop drains back to `Stopped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Crashed = 4,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            1 => return State::Starting,
            2 => return State::Running,
            3 => return State::Stopping,
            4 => return State::Crashed,
            _ => return State::Stopped,
        }
    }
}

/// Registry and index share one critical section: every dispatch locks it
/// once, mutates, and releases, so session tasks never observe a partial
/// routing update.
struct Shared {
    sessions: SessionRegistry,
    index: SubscriptionIndex,
}

pub struct Broker {
    listener: TcpListener,
    shared: Arc<Mutex<Shared>>,
    auth: Arc<AuthManager>,
    state: Arc<AtomicU8>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Cheap clone handed to whatever owns shutdown (signal handler, tests).
#[derive(Clone)]
pub struct BrokerHandle {
    state: Arc<AtomicU8>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl BrokerHandle {
    pub fn state(&self) -> State {
        return State::from_u8(self.state.load(Ordering::SeqCst));
    }

    /// Transitions the broker to `Stopping` and unblocks the accept loop.
    pub fn stop(&self) {
        self.state.store(State::Stopping as u8, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
    }
}

impl Broker {
    /// Resolves the configured address and opens the listening socket with
    /// address reuse. The broker is `Starting` until [run](Self::run).
    pub async fn bind(config: BrokerConfig) -> Result<Broker, ServerError> {
        let state = Arc::new(AtomicU8::new(State::Starting as u8));

        match Self::listen(&config).await {
            Ok(listener) => {
                let (shutdown_tx, shutdown_rx) = watch::channel(false);

                return Ok(Broker {
                    listener,
                    shared: Arc::new(Mutex::new(Shared {
                        sessions: SessionRegistry::new(),
                        index: SubscriptionIndex::new(),
                    })),
                    auth: Arc::new(AuthManager::new(config.into_policy())),
                    state,
                    shutdown_tx: Arc::new(shutdown_tx),
                    shutdown_rx,
                });
            }
            Err(err) => {
                state.store(State::Crashed as u8, Ordering::SeqCst);
                log::error!("Could not open the listening socket: {err}");
                return Err(err);
            }
        }
    }

    async fn listen(config: &BrokerConfig) -> Result<TcpListener, ServerError> {
        let addr = lookup_host(config.addr()).await?.next().ok_or_else(|| {
            ServerError::new(
                ErrorKind::ProtocolError,
                format!("Could not resolve {}", config.addr()),
            )
        })?;

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };

        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;

        return Ok(socket.listen(1024)?);
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        return Ok(self.listener.local_addr()?);
    }

    pub fn handle(&self) -> BrokerHandle {
        return BrokerHandle {
            state: Arc::clone(&self.state),
            shutdown: Arc::clone(&self.shutdown_tx),
        };
    }

    pub fn state(&self) -> State {
        return State::from_u8(self.state.load(Ordering::SeqCst));
    }

    /// Accepts connections until [BrokerHandle::stop] fires, serving each
    /// session on its own task. Dropping out of the loop closes the
    /// listening socket; session sockets close as their tasks finish.
    pub async fn run(self) -> Result<(), ServerError> {
        self.state.store(State::Running as u8, Ordering::SeqCst);
        log::info!("Dragonfly broker listening on {}", self.listener.local_addr()?);

        let mut shutdown = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            log::debug!("Accepted connection from {addr}");

                            let shared = Arc::clone(&self.shared);
                            let auth = Arc::clone(&self.auth);

                            tokio::spawn(async move {
                                if let Err(err) = handle_client(shared, auth, stream, addr).await {
                                    log::warn!("Error handling client {addr}: {err}");
                                } else {
                                    log::debug!("Closing connection {addr}");
                                }
                            });
                        }
                        Err(err) => {
                            log::error!("Rejected TCP connection: {err}");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        log::info!("Dragonfly broker stopped.");
        self.state.store(State::Stopped as u8, Ordering::SeqCst);

        return Ok(());
    }
}

/// One task per connection: a writer draining the session's outbound queue
/// and this reader driving the two-stage frame loop. Whatever ends the
/// reader, the session's slot and index entries are cleared before the
/// writer is allowed to finish flushing.
async fn handle_client(
    shared: Arc<Mutex<Shared>>,
    auth: Arc<AuthManager>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), ServerError> {
    let (mut read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();

    let id = {
        let mut shared = shared.lock().await;
        shared.sessions.register(addr, tx.clone())
    };

    log::debug!("Session {id} opened for {addr}");

    let writer = tokio::spawn(write_frames(id, write_half, rx));

    let result = read_loop(&shared, &auth, id, &mut read_half, &tx).await;

    {
        let mut shared = shared.lock().await;
        shared.sessions.unregister(id);
        shared.index.drop_session(id);
    }

    log::debug!("Session {id} closed.");

    // dropping the last sender lets the writer flush queued frames and exit
    drop(tx);
    let _ = writer.await;

    return result;
}

/// Send path: whole-frame writes, one frame in flight at a time. A write
/// error ends the task, which closes the queue and thereby the session.
async fn write_frames(id: SessionId, mut write_half: OwnedWriteHalf, mut rx: UnboundedReceiver<Bytes>) {
    while let Some(frame) = rx.recv().await {
        if let Err(err) = write_half.write_all(&frame).await {
            log::warn!("Session {id}: send failed: {err}");
            return;
        }
    }

    let _ = write_half.shutdown().await;
}

async fn read_loop(
    shared: &Arc<Mutex<Shared>>,
    auth: &AuthManager,
    id: SessionId,
    read_half: &mut OwnedReadHalf,
    tx: &UnboundedSender<Bytes>,
) -> Result<(), ServerError> {
    loop {
        tokio::select! {
            message = read_message::<_, ServerError>(read_half) => {
                match message {
                    Ok(Some(message)) => {
                        if dispatch(shared, auth, id, message).await? {
                            return Ok(());
                        }
                    }
                    // peer closed at a frame boundary
                    Ok(None) => {
                        return Ok(());
                    }
                    Err(err) => match err.kind() {
                        // the stream can no longer be assumed frame aligned
                        ErrorKind::DecodeError(DecodeErrorKind::OversizedBody) => {
                            return Err(err);
                        }
                        // a garbled frame is dropped, the session survives:
                        // the declared body was consumed in full, so the
                        // next read starts on a frame boundary
                        ErrorKind::DecodeError(_) => {
                            log::warn!("Session {id}: dropping malformed frame: {err}");
                        }
                        _ => {
                            return Err(err);
                        }
                    },
                }
            }
            // the writer dropped the queue after a send failure
            _ = tx.closed() => {
                return Err(ServerError::new(
                    ErrorKind::SessionClosed,
                    format!("Session {id} send path closed."),
                ));
            }
        }
    }
}

/// Routes one decoded frame. Returns `Ok(true)` when the session should
/// close (graceful disconnect, or the refusal ack of a failed handshake).
async fn dispatch(
    shared: &Arc<Mutex<Shared>>,
    auth: &AuthManager,
    id: SessionId,
    message: Message,
) -> Result<bool, ServerError> {
    let mut shared = shared.lock().await;
    let shared = &mut *shared;

    let session = match shared.sessions.get_mut(id) {
        Some(session) => session,
        None => {
            return Err(ServerError::new(
                ErrorKind::SessionClosed,
                format!("Session {id} is gone."),
            ));
        }
    };

    match message.payload() {
        Payload::Connect {
            username,
            password,
            disconnect,
        } => {
            if *disconnect {
                log::info!("Session {id}: disconnect requested.");

                if let Some(frame) = encoded(&Message::disconnect_ack()) {
                    session.send(frame)?;
                }

                // the caller clears the registry slot and the index entries
                return Ok(true);
            }

            session.set_credentials(username.clone(), password.clone());

            if auth.check(session, Action::Connect, None) {
                session.set_connected(true);
                log::info!(
                    "Session {id}: connected{}",
                    match session.username() {
                        Some(username) => format!(" as {username}"),
                        None => String::new(),
                    }
                );

                if let Some(frame) = encoded(&Message::conn_ack(AckCode::SUCCESS)) {
                    session.send(frame)?;
                }

                return Ok(false);
            } else {
                session.set_connected(false);
                log::info!("Session {id}: connection refused.");

                if let Some(frame) = encoded(&Message::conn_ack(AckCode::REFUSED)) {
                    session.send(frame)?;
                }

                return Ok(true);
            }
        }

        Payload::Publish { topic, body } => {
            if !auth.check(session, Action::Publish, Some(topic)) {
                log::debug!("Session {id}: publish on {topic} refused.");

                if let Some(frame) = encoded(&Message::pub_ack(AckCode::REFUSED)) {
                    session.send(frame)?;
                }

                return Ok(false);
            }

            // one server-origin copy, fanned out to every matching
            // subscriber; a failed delivery closes only that subscriber
            let mut delivery = Message::publish(topic.clone(), body.clone());
            delivery.set_origin(Origin::Server);

            if let Some(frame) = encoded(&delivery) {
                for subscriber_id in shared.index.matching_subscribers(topic) {
                    if let Some(subscriber) = shared.sessions.get(subscriber_id) {
                        if let Err(err) = subscriber.send(frame.clone()) {
                            log::warn!("Session {subscriber_id}: delivery failed: {err}");
                        }
                    }
                }
            }

            let session = shared.sessions.get(id).expect("publisher vanished mid-dispatch");

            if let Some(frame) = encoded(&Message::pub_ack(AckCode::SUCCESS)) {
                session.send(frame)?;
            }

            return Ok(false);
        }

        Payload::Subscribe { topic } => {
            if !auth.check(session, Action::Subscribe, Some(topic)) {
                log::debug!("Session {id}: subscribe to {topic} refused.");

                if let Some(frame) = encoded(&Message::sub_ack(AckCode::REFUSED)) {
                    session.send(frame)?;
                }

                return Ok(false);
            }

            if session.is_subscribed(topic) {
                if let Some(frame) = encoded(&Message::sub_ack(AckCode::NO_OP)) {
                    session.send(frame)?;
                }

                return Ok(false);
            }

            match TopicPattern::compile(topic) {
                Ok(pattern) => {
                    session.add_subscription(topic.clone());
                    shared.index.subscribe(pattern, id);

                    log::debug!("Session {id}: subscribed to {topic}");

                    let session = shared.sessions.get(id).expect("subscriber vanished mid-dispatch");
                    if let Some(frame) = encoded(&Message::sub_ack(AckCode::SUCCESS)) {
                        session.send(frame)?;
                    }
                }
                Err(err) => {
                    log::warn!("Session {id}: rejected pattern {topic}: {err}");

                    if let Some(frame) = encoded(&Message::sub_ack(AckCode::BAD_PATTERN)) {
                        session.send(frame)?;
                    }
                }
            }

            return Ok(false);
        }

        Payload::Unsubscribe { topic } => {
            if session.remove_subscription(topic) {
                shared.index.unsubscribe(topic, id);

                log::debug!("Session {id}: unsubscribed from {topic}");

                let session = shared.sessions.get(id).expect("session vanished mid-dispatch");
                if let Some(frame) = encoded(&Message::unsub_ack(AckCode::SUCCESS)) {
                    session.send(frame)?;
                }
            } else {
                if let Some(frame) = encoded(&Message::unsub_ack(AckCode::NO_OP)) {
                    session.send(frame)?;
                }
            }

            return Ok(false);
        }

        // server-originated kinds have no business arriving here
        Payload::ConnAck { .. }
        | Payload::PubAck { .. }
        | Payload::SubAck { .. }
        | Payload::UnsubAck { .. } => {
            log::warn!("Session {id}: ignoring unexpected {} frame.", message.kind());
            return Ok(false);
        }
    }
}

/// Encode failures are logged and the emission suppressed; the dispatch
/// that wanted the frame carries on as a no-op.
fn encoded(message: &Message) -> Option<Bytes> {
    match message.encode() {
        Ok(frame) => return Some(frame),
        Err(err) => {
            log::error!("Could not encode {} frame: {err}", message.kind());
            return None;
        }
    }
}
