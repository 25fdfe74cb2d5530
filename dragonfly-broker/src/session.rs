use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use dragonfly_core::err::server::{self, ServerError};

pub type SessionId = usize;

/// Broker-side state for one client connection.
///
/// `connected` is false until the CONNECT handshake succeeds; the dispatcher
/// refuses PUBLISH and SUBSCRIBE on a session that never completed it.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    addr: SocketAddr,
    username: Option<String>,
    password: Option<String>,
    connected: bool,
    subscriptions: Vec<String>,
    outbound: UnboundedSender<Bytes>,
}

impl Session {
    fn new(id: SessionId, addr: SocketAddr, outbound: UnboundedSender<Bytes>) -> Self {
        return Self {
            id,
            addr,
            username: None,
            password: None,
            connected: false,
            subscriptions: vec![],
            outbound,
        };
    }

    pub fn id(&self) -> SessionId {
        return self.id;
    }

    pub fn addr(&self) -> SocketAddr {
        return self.addr;
    }

    pub fn username(&self) -> Option<&str> {
        return self.username.as_deref();
    }

    pub fn password(&self) -> Option<&str> {
        return self.password.as_deref();
    }

    pub fn set_credentials(&mut self, username: Option<String>, password: Option<String>) {
        self.username = username;
        self.password = password;
    }

    pub fn is_connected(&self) -> bool {
        return self.connected;
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn subscriptions(&self) -> &[String] {
        return &self.subscriptions;
    }

    pub fn is_subscribed(&self, pattern: &str) -> bool {
        return self.subscriptions.iter().any(|p| p == pattern);
    }

    /// Appends a pattern the session is not yet subscribed to. The caller
    /// checks [is_subscribed](Self::is_subscribed) first.
    pub fn add_subscription(&mut self, pattern: String) {
        self.subscriptions.push(pattern);
    }

    /// Returns true if the pattern was present.
    pub fn remove_subscription(&mut self, pattern: &str) -> bool {
        if let Some(idx) = self.subscriptions.iter().position(|p| p == pattern) {
            self.subscriptions.remove(idx);
            return true;
        }

        return false;
    }

    /// Queues one encoded frame on the session's send path. The writer task
    /// drains the queue with whole-frame writes, so frames from concurrent
    /// dispatches never interleave.
    pub fn send(&self, frame: Bytes) -> Result<(), ServerError> {
        return self.outbound.send(frame).map_err(|_| {
            ServerError::new(
                server::ErrorKind::SessionClosed,
                format!("Session {} send path is closed.", self.id),
            )
        });
    }
}

/// Sparse session slot array with stable integer ids.
///
/// Closing a session empties its slot; the next registration reuses the
/// lowest empty slot before growing the array, so a live id is always a
/// valid index.
pub struct SessionRegistry {
    slots: Vec<Option<Session>>,
    free: BinaryHeap<Reverse<SessionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        return Self {
            slots: vec![],
            free: BinaryHeap::new(),
        };
    }

    pub fn register(&mut self, addr: SocketAddr, outbound: UnboundedSender<Bytes>) -> SessionId {
        match self.free.pop() {
            Some(Reverse(id)) => {
                self.slots[id] = Some(Session::new(id, addr, outbound));
                return id;
            }
            None => {
                let id = self.slots.len();
                self.slots.push(Some(Session::new(id, addr, outbound)));
                return id;
            }
        }
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        return self.slots.get(id).and_then(|slot| slot.as_ref());
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        return self.slots.get_mut(id).and_then(|slot| slot.as_mut());
    }

    pub fn unregister(&mut self, id: SessionId) -> Option<Session> {
        let session = self.slots.get_mut(id).and_then(|slot| slot.take());

        if session.is_some() {
            self.free.push(Reverse(id));
        }

        return session;
    }

    pub fn len(&self) -> usize {
        return self.slots.iter().filter(|slot| slot.is_some()).count();
    }
}
