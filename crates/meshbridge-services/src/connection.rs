//! Bridged socket connections.
//!
//! A `Connection` is the pair of halves the pump drives plus a cancellation
//! token. The token is the close signal: the topic keeps a
//! `ConnectionHandle` and cancelling it stops the pump bound to that socket.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionIoError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Read half. `Err(ConnectionIoError::Closed)` on a clean close.
#[async_trait]
pub trait FrameReader: Send {
    async fn read_frame(&mut self) -> Result<Bytes, ConnectionIoError>;
}

/// Write half.
#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), ConnectionIoError>;

    /// Best-effort close. Errors are ignored; the peer may already be gone.
    async fn close(&mut self);
}

pub struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) reader: Box<dyn FrameReader>,
    pub(crate) writer: Box<dyn FrameWriter>,
    pub(crate) token: CancellationToken,
}

impl Connection {
    pub fn new(reader: impl FrameReader + 'static, writer: impl FrameWriter + 'static) -> Self {
        Self {
            id: ConnectionId::next(),
            reader: Box::new(reader),
            writer: Box::new(writer),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            token: self.token.clone(),
        }
    }
}

/// What a topic holds for its active connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    token: CancellationToken,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Signal the pump to stop and close the socket.
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

// ── In-memory connection ──────────────────────────────────────────────────────

/// The far side of a `channel_connection`: what a client would send and see.
pub struct RemoteEnd {
    /// Frames sent here are read by the pump. Dropping it closes the read side.
    pub tx: mpsc::Sender<Bytes>,
    /// Frames the pump wrote. Yields `None` once the connection is closed.
    pub rx: mpsc::Receiver<Bytes>,
}

struct ChannelReader(mpsc::Receiver<Bytes>);
struct ChannelWriter(Option<mpsc::Sender<Bytes>>);

#[async_trait]
impl FrameReader for ChannelReader {
    async fn read_frame(&mut self) -> Result<Bytes, ConnectionIoError> {
        self.0.recv().await.ok_or(ConnectionIoError::Closed)
    }
}

#[async_trait]
impl FrameWriter for ChannelWriter {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), ConnectionIoError> {
        let tx = self.0.as_ref().ok_or(ConnectionIoError::Closed)?;
        tx.send(frame)
            .await
            .map_err(|_| ConnectionIoError::Write("remote end dropped".into()))
    }

    async fn close(&mut self) {
        self.0.take();
    }
}

/// A connection backed by channels, for embedding the bridge without a
/// socket and for tests.
pub fn channel_connection(buffer: usize) -> (Connection, RemoteEnd) {
    let (to_pump, from_remote) = mpsc::channel(buffer);
    let (to_remote, from_pump) = mpsc::channel(buffer);
    let conn = Connection::new(ChannelReader(from_remote), ChannelWriter(Some(to_remote)));
    (
        conn,
        RemoteEnd {
            tx: to_pump,
            rx: from_pump,
        },
    )
}
