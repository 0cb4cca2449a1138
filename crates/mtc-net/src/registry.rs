//! ---
//! mtc_section: "05-networking-external-interfaces"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Line-oriented adapter server and wire protocol."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Bound on one client write when the registry is built without an explicit one.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Write half of a client transport.
pub type ClientWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Identifier assigned to each registered connection.
pub type ConnectionId = u64;

/// One agent connection as seen by the broadcaster.
///
/// Writes go through a per-connection lock so lines from the broadcaster and
/// the heartbeat session never interleave. Every write is bounded by the
/// write timeout and abandoned as soon as the connection is marked closed.
pub struct Connection {
    id: ConnectionId,
    peer: String,
    writer: AsyncMutex<ClientWriter>,
    closed: watch::Sender<bool>,
    write_timeout: Duration,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    fn new(id: ConnectionId, peer: String, writer: ClientWriter, write_timeout: Duration) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            peer,
            writer: AsyncMutex::new(writer),
            closed,
            write_timeout,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that observes the connection being dropped from the registry.
    pub fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Flag the connection closed. Returns `true` only for the first call.
    pub(crate) fn mark_closed(&self) -> bool {
        self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    /// Hold the write lock, e.g. to keep a snapshot and its replay contiguous.
    pub(crate) async fn lock_writer(&self) -> AsyncMutexGuard<'_, ClientWriter> {
        self.writer.lock().await
    }

    /// Write `lines` and flush while holding the connection's write lock.
    pub async fn write_lines(&self, lines: &[String]) -> io::Result<()> {
        let mut writer = tokio::select! {
            writer = self.writer.lock() => writer,
            _ = closed_signal(self.closed.subscribe()) => return Err(closed_error()),
        };
        self.write_bounded(&mut writer, lines).await
    }

    /// Write through an already held write lock, giving up after the write
    /// timeout or once the connection is marked closed.
    pub(crate) async fn write_bounded(
        &self,
        writer: &mut ClientWriter,
        lines: &[String],
    ) -> io::Result<()> {
        let closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(closed_error());
        }
        tokio::select! {
            written = timeout(self.write_timeout, write_locked(writer, lines)) => match written {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "client write timed out")),
            },
            _ = closed_signal(closed) => Err(closed_error()),
        }
    }

    /// Mark closed and shut the write side down.
    ///
    /// Marking first cancels any write in flight, which releases the lock.
    pub(crate) async fn close(&self) {
        self.mark_closed();
        let mut writer = self.writer.lock().await;
        match timeout(self.write_timeout, writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(peer = %self.peer, error = %err, "client shutdown reported an error")
            }
            Err(_) => debug!(peer = %self.peer, "client shutdown timed out"),
        }
    }
}

async fn write_locked(writer: &mut ClientWriter, lines: &[String]) -> io::Result<()> {
    for line in lines {
        writer.write_all(line.as_bytes()).await?;
    }
    writer.flush().await
}

/// Resolves once the connection is flagged closed.
async fn closed_signal(mut closed: watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

/// Snapshot of broadcaster counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryMetrics {
    /// Connections ever registered.
    pub registered: u64,
    /// Connections removed for any reason.
    pub unregistered: u64,
    /// Lines handed to a client without error.
    pub lines_sent: u64,
    /// Connections dropped after a failed write.
    pub write_failures: u64,
}

#[derive(Default)]
struct Counters {
    registered: AtomicU64,
    unregistered: AtomicU64,
    lines_sent: AtomicU64,
    write_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> RegistryMetrics {
        RegistryMetrics {
            registered: self.registered.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
            lines_sent: self.lines_sent.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Live set of agent connections and the fan-out over it.
///
/// Set membership is guarded by one lock; payload writes only take the
/// per-connection lock so a slow client does not serialize the others.
pub struct ConnectionRegistry {
    connections: Mutex<IndexMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
    verbose: bool,
    write_timeout: Duration,
    counters: Counters,
}

impl ConnectionRegistry {
    pub fn new(verbose: bool) -> Self {
        Self {
            connections: Mutex::new(IndexMap::new()),
            next_id: AtomicU64::new(1),
            verbose,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            counters: Counters::default(),
        }
    }

    /// Bound every client write by `write_timeout`.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Allocate a connection that is not yet visible to broadcasts.
    pub fn create(&self, writer: ClientWriter, peer: impl Into<String>) -> Arc<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Arc::new(Connection::new(id, peer.into(), writer, self.write_timeout))
    }

    /// Make a connection visible to broadcasts.
    pub fn insert(&self, connection: Arc<Connection>) {
        debug!(id = connection.id, peer = %connection.peer, "connection registered");
        self.connections.lock().insert(connection.id, connection);
        self.counters.registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove a connection. Safe to call any number of times.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.lock().shift_remove(&id);
        match removed {
            Some(connection) => {
                connection.mark_closed();
                self.counters.unregistered.fetch_add(1, Ordering::Relaxed);
                debug!(id, peer = %connection.peer, "connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Drop a connection after a failed write.
    pub(crate) fn drop_failed(&self, connection: &Connection, err: &io::Error) {
        if self.unregister(connection.id) {
            self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!(peer = %connection.peer, error = %err, "client write failed; dropping connection");
        }
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().contains_key(&id)
    }

    /// Connections registered at this instant, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    pub fn metrics(&self) -> RegistryMetrics {
        self.counters.snapshot()
    }

    /// Write `lines` to one connection, dropping it on failure.
    pub async fn send_to(&self, connection: &Connection, lines: &[String]) -> bool {
        self.echo(lines);
        match connection.write_lines(lines).await {
            Ok(()) => {
                self.record_sent(lines);
                true
            }
            Err(err) => {
                self.drop_failed(connection, &err);
                false
            }
        }
    }

    /// Write `lines` to every registered connection.
    ///
    /// Connections are written concurrently. A failing or stalled connection
    /// is removed and the remaining ones still receive the lines. Returns how
    /// many connections were reached.
    pub async fn broadcast(&self, lines: &[String]) -> usize {
        if lines.is_empty() {
            return 0;
        }
        self.echo(lines);
        let targets = self.snapshot();
        let results = join_all(
            targets
                .iter()
                .map(|connection| connection.write_lines(lines)),
        )
        .await;

        let mut delivered = 0;
        for (connection, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => {
                    self.record_sent(lines);
                    delivered += 1;
                }
                Err(err) => self.drop_failed(connection, &err),
            }
        }
        delivered
    }

    /// Unregister and shut down every connection.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Connection>> = {
            let mut connections = self.connections.lock();
            connections.drain(..).map(|(_, connection)| connection).collect()
        };
        for connection in drained {
            self.counters.unregistered.fetch_add(1, Ordering::Relaxed);
            connection.close().await;
        }
    }

    pub(crate) fn record_sent(&self, lines: &[String]) {
        self.counters
            .lines_sent
            .fetch_add(lines.len() as u64, Ordering::Relaxed);
    }

    pub(crate) fn echo(&self, lines: &[String]) {
        if self.verbose {
            for line in lines {
                info!(line = %line.trim_end(), "sending");
            }
        }
    }
}
