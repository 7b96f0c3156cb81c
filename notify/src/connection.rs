use crate::error::{connection_error, ConnectionErrorKind, Result};
use async_trait::async_trait;
use log::*;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a connection. Transitions only move forward:
/// `Pending -> Accepted -> Closed` (or straight to `Closed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Accepted,
    Closed,
}

impl ConnectionState {
    pub fn is_closed(&self) -> bool {
        *self == ConnectionState::Closed
    }
}

/// A live outbound channel capable of receiving JSON messages.
#[async_trait]
pub trait Channel: Send + Sync {
    fn id(&self) -> &ConnectionId;

    fn state(&self) -> ConnectionState;

    fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Completes the accept handshake. Accepting twice is harmless.
    async fn accept(&self) -> Result<()>;

    /// Serializes `message` and hands it to the transport.
    async fn send_json(&self, message: &Value) -> Result<()>;

    /// Marks the channel closed and wakes anything waiting on it.
    /// Returns `false` if it was already closed.
    fn close(&self) -> bool;
}

/// Queue-backed channel. Frames are pushed into a bounded queue that the
/// transport's writer task drains through the paired [`Outbound`].
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
    state: watch::Sender<ConnectionState>,
}

/// The transport side of a [`Connection`].
pub struct Outbound {
    id: ConnectionId,
    receiver: mpsc::Receiver<String>,
    state: watch::Receiver<ConnectionState>,
}

impl Connection {
    /// Creates a pending connection whose queue holds at most `capacity` frames.
    pub fn new(capacity: usize) -> (Arc<Self>, Outbound) {
        let id = ConnectionId::new();
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (state, state_receiver) = watch::channel(ConnectionState::Pending);

        let connection = Arc::new(Self {
            id: id.clone(),
            outbound: sender,
            state,
        });
        let outbound = Outbound {
            id,
            receiver,
            state: state_receiver,
        };
        (connection, outbound)
    }
}

#[async_trait]
impl Channel for Connection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn accept(&self) -> Result<()> {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Pending {
                *state = ConnectionState::Accepted;
                true
            } else {
                false
            }
        });

        match self.state() {
            ConnectionState::Closed => Err(connection_error(ConnectionErrorKind::Closed, &self.id)),
            _ => Ok(()),
        }
    }

    async fn send_json(&self, message: &Value) -> Result<()> {
        match self.state() {
            ConnectionState::Pending => {
                return Err(connection_error(ConnectionErrorKind::NotAccepted, &self.id))
            }
            ConnectionState::Closed => {
                return Err(connection_error(ConnectionErrorKind::Closed, &self.id))
            }
            ConnectionState::Accepted => {}
        }

        let payload = serde_json::to_string(message)?;
        let mut state = self.state.subscribe();

        // A full queue parks the sender; closing the connection must release it.
        tokio::select! {
            biased;
            _ = state.wait_for(ConnectionState::is_closed) => {
                Err(connection_error(ConnectionErrorKind::Closed, &self.id))
            }
            sent = self.outbound.send(payload) => match sent {
                Ok(()) => Ok(()),
                Err(_) => {
                    debug!("Writer for connection {} is gone, closing it", self.id);
                    self.close();
                    Err(connection_error(ConnectionErrorKind::SendFailed, &self.id))
                }
            },
        }
    }

    fn close(&self) -> bool {
        self.state.send_replace(ConnectionState::Closed) != ConnectionState::Closed
    }
}

impl Outbound {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Next frame to write, or `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<String> {
        tokio::select! {
            biased;
            _ = self.state.wait_for(ConnectionState::is_closed) => None,
            payload = self.receiver.recv() => payload,
        }
    }
}
