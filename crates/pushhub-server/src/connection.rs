//! One client-facing delivery channel with a bounded mailbox.
//!
//! The router is the only writer ([`Connection::enqueue`], never blocks).
//! The stream sink is the only reader: it takes the mailbox once with
//! [`Connection::drain`] and pulls payloads until the connection closes.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::Stream;
use parking_lot::Mutex;
use pushhub_core::{ClientId, ConnectionId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Payload as held in a mailbox. Shared across every recipient of one event.
pub type Payload = Arc<str>;

/// Lifecycle of a [`Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting payloads.
    Open,
    /// Closed; the mailbox no longer accepts or yields payloads.
    Closed,
}

/// A live delivery channel for one client.
pub struct Connection {
    id: ConnectionId,
    client_id: ClientId,
    tx: mpsc::Sender<Payload>,
    rx: Mutex<Option<mpsc::Receiver<Payload>>>,
    closed: CancellationToken,
    delivered: AtomicU64,
    dropped: AtomicU64,
    connected_at: Instant,
}

impl Connection {
    /// Create an open connection with a fresh ID and a mailbox of `capacity`
    /// payloads (at least one).
    pub fn new(client_id: ClientId, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            id: ConnectionId::new(),
            client_id,
            tx,
            rx: Mutex::new(Some(rx)),
            closed: CancellationToken::new(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            connected_at: Instant::now(),
        }
    }

    /// Unique connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Owning client.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Offer a payload without waiting.
    ///
    /// Returns `false` if the mailbox is full (the payload is dropped and
    /// counted) or the connection is closed.
    pub fn enqueue(&self, payload: Payload) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.tx.try_send(payload) {
            Ok(()) => {
                let _ = self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Take the reading side of the mailbox. Only the first call returns
    /// `Some`.
    pub fn drain(&self) -> Option<Drain> {
        let rx = self.rx.lock().take()?;
        Some(Drain {
            rx,
            closed: self.closed.clone(),
        })
    }

    /// Close the connection. Any pending [`Drain::next`] returns `None`
    /// immediately and undelivered payloads are discarded.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    /// Payloads accepted into the mailbox.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Payloads dropped because the mailbox was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Time since the connection was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("state", &self.state())
            .field("dropped", &self.dropped_count())
            .finish_non_exhaustive()
    }
}

/// Reading side of a connection's mailbox.
pub struct Drain {
    rx: mpsc::Receiver<Payload>,
    closed: CancellationToken,
}

impl Drain {
    /// Wait for the next payload. Returns `None` once the connection closes.
    pub async fn next(&mut self) -> Option<Payload> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            payload = self.rx.recv() => payload,
        }
    }

    /// Adapt into a stream that ends when the connection closes.
    pub fn into_stream(self) -> impl Stream<Item = Payload> + Send + 'static {
        futures::stream::unfold(self, |mut drain| async move {
            let payload = drain.next().await?;
            Some((payload, drain))
        })
    }
}
