//! ---
//! mtc_section: "05-networking-external-interfaces"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Line-oriented adapter server and wire protocol."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
//! Per-connection heartbeat loop.
//!
//! A session reads the agent side of one connection. Until the first `* PING`
//! arrives no deadline applies; afterwards the connection is dropped when no
//! ping arrives within twice the heartbeat interval.
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info};

use crate::protocol::{is_ping, pong_line, LineSplitter, MAX_INBOUND_LINE};
use crate::registry::{Connection, ConnectionRegistry};

/// Heartbeat state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no ping seen yet; no timeout applies.
    AwaitingFirstPing,
    /// Pings are flowing; the deadline is enforced.
    Active,
    /// Terminal.
    Closed,
}

/// Why a session terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The adapter is shutting down.
    Shutdown,
    /// The peer closed its side.
    PeerClosed,
    /// No ping within the heartbeat deadline.
    TimedOut,
    /// Reading from the peer failed.
    ReadFailed,
    /// Writing a pong failed.
    WriteFailed,
    /// The connection was dropped elsewhere, e.g. by a failed broadcast.
    Dropped,
}

/// Read side of one agent connection.
pub struct Session<R> {
    reader: R,
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    heartbeat: Duration,
    shutdown: watch::Receiver<bool>,
    state: SessionState,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(
        reader: R,
        connection: Arc<Connection>,
        registry: Arc<ConnectionRegistry>,
        heartbeat: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            reader,
            connection,
            registry,
            heartbeat,
            shutdown,
            state: SessionState::AwaitingFirstPing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve the connection until it ends, then unregister and close it.
    pub async fn run(mut self) -> SessionEnd {
        let end = self.serve().await;
        self.state = SessionState::Closed;
        self.registry.unregister(self.connection.id());
        self.connection.close().await;
        match end {
            SessionEnd::TimedOut => {
                info!(peer = %self.connection.peer(), "heartbeat deadline missed; closing connection")
            }
            other => debug!(peer = %self.connection.peer(), reason = ?other, "session closed"),
        }
        end
    }

    async fn serve(&mut self) -> SessionEnd {
        let mut closed = self.connection.subscribe_closed();
        let mut splitter = LineSplitter::default();
        let mut buf = vec![0u8; MAX_INBOUND_LINE];
        let mut deadline: Option<Instant> = None;

        loop {
            if *self.shutdown.borrow() {
                return SessionEnd::Shutdown;
            }
            if *closed.borrow() {
                return SessionEnd::Dropped;
            }

            let wake_at = deadline.unwrap_or_else(Instant::now);
            let read = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return SessionEnd::Shutdown;
                    }
                    continue;
                }
                _ = closed.changed() => continue,
                _ = sleep_until(wake_at), if deadline.is_some() => {
                    return SessionEnd::TimedOut;
                }
                read = self.reader.read(&mut buf) => read,
            };

            let n = match read {
                Ok(0) => return SessionEnd::PeerClosed,
                Ok(n) => n,
                Err(err) => {
                    debug!(peer = %self.connection.peer(), error = %err, "client read failed");
                    return SessionEnd::ReadFailed;
                }
            };

            for line in splitter.push(&buf[..n]) {
                if !is_ping(&line) {
                    debug!(peer = %self.connection.peer(), line = %line, "ignoring inbound line");
                    continue;
                }
                if self.heartbeat.is_zero() {
                    continue;
                }
                if self.state == SessionState::AwaitingFirstPing {
                    debug!(
                        peer = %self.connection.peer(),
                        heartbeat_ms = self.heartbeat.as_millis() as u64,
                        "heartbeat established"
                    );
                    self.state = SessionState::Active;
                }
                let next_deadline = Instant::now() + self.heartbeat * 2;
                deadline = Some(next_deadline);

                let pong = [pong_line(self.heartbeat.as_millis() as u64)];
                match timeout_at(next_deadline, self.connection.write_lines(&pong)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        self.registry.drop_failed(&self.connection, &err);
                        return SessionEnd::WriteFailed;
                    }
                    Err(_) => return SessionEnd::TimedOut,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        connection: Arc<Connection>,
        agent: DuplexStream,
        shutdown: watch::Sender<bool>,
        session: Session<tokio::io::ReadHalf<DuplexStream>>,
    }

    fn harness(heartbeat_ms: u64) -> Harness {
        let registry = Arc::new(ConnectionRegistry::new(false));
        let (agent, adapter_side) = duplex(4096);
        let (reader, writer) = tokio::io::split(adapter_side);
        let connection = registry.create(Box::new(writer), "agent");
        registry.insert(connection.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let session = Session::new(
            reader,
            connection.clone(),
            registry.clone(),
            Duration::from_millis(heartbeat_ms),
            shutdown_rx,
        );
        Harness {
            registry,
            connection,
            agent,
            shutdown,
            session,
        }
    }

    async fn read_line(agent: &mut DuplexStream) -> String {
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = agent.read(&mut byte).await.unwrap();
            if n == 0 || byte[0] == b'\n' {
                break;
            }
            out.push(byte[0]);
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn ping_gets_pong_and_missing_ping_times_out() {
        let Harness {
            registry,
            connection,
            mut agent,
            shutdown: _shutdown,
            session,
        } = harness(1000);
        assert_eq!(session.state(), SessionState::AwaitingFirstPing);
        let task = tokio::spawn(session.run());

        agent.write_all(b"* PING\n").await.unwrap();
        assert_eq!(read_line(&mut agent).await, "* PONG 1000");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        agent.write_all(b"* PING\r\n").await.unwrap();
        assert_eq!(read_line(&mut agent).await, "* PONG 1000");
        assert!(registry.contains(connection.id()));

        assert_eq!(task.await.unwrap(), SessionEnd::TimedOut);
        assert!(!registry.contains(connection.id()));
        assert!(connection.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn no_deadline_before_first_ping() {
        let Harness {
            registry,
            connection,
            agent,
            shutdown,
            session,
        } = harness(100);
        let task = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(registry.contains(connection.id()));

        shutdown.send(true).unwrap();
        assert_eq!(task.await.unwrap(), SessionEnd::Shutdown);
        assert!(registry.is_empty());
        drop(agent);
    }

    #[tokio::test]
    async fn peer_close_unregisters_once() {
        let Harness {
            registry,
            connection,
            mut agent,
            shutdown: _shutdown,
            session,
        } = harness(1000);
        let task = tokio::spawn(session.run());

        agent.write_all(b"hello adapter\n").await.unwrap();
        agent.shutdown().await.unwrap();
        drop(agent);

        assert_eq!(task.await.unwrap(), SessionEnd::PeerClosed);
        assert!(!registry.unregister(connection.id()));
        assert_eq!(registry.metrics().unregistered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_heartbeat_sends_no_pong() {
        let Harness {
            registry,
            connection,
            mut agent,
            shutdown: _shutdown,
            session,
        } = harness(0);
        let task = tokio::spawn(session.run());

        agent.write_all(b"* PING\n").await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(registry.contains(connection.id()));

        registry.unregister(connection.id());
        assert_eq!(task.await.unwrap(), SessionEnd::Dropped);
        let mut rest = Vec::new();
        agent.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn heartbeat_timeout_cancels_a_stalled_broadcast() {
        let registry = Arc::new(
            ConnectionRegistry::new(false).with_write_timeout(Duration::from_secs(30)),
        );
        let (mut stalled_agent, stalled_side) = duplex(64);
        let (reader, writer) = tokio::io::split(stalled_side);
        let stalled = registry.create(Box::new(writer), "stalled");
        registry.insert(stalled.clone());
        let (healthy_side, mut healthy_agent) = duplex(8192);
        registry.insert(registry.create(Box::new(healthy_side), "healthy"));

        let (_shutdown, shutdown_rx) = watch::channel(false);
        let session = tokio::spawn(
            Session::new(
                reader,
                stalled.clone(),
                registry.clone(),
                Duration::from_millis(100),
                shutdown_rx,
            )
            .run(),
        );

        stalled_agent.write_all(b"* PING\n").await.unwrap();
        assert_eq!(read_line(&mut stalled_agent).await, "* PONG 100");

        let line = vec![format!("{}\n", "x".repeat(1024))];
        let delivered = tokio::time::timeout(Duration::from_secs(2), registry.broadcast(&line))
            .await
            .expect("broadcast blocked on the stalled agent");
        assert_eq!(delivered, 1);

        let end = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("timed out session was never reaped")
            .unwrap();
        assert_eq!(end, SessionEnd::TimedOut);
        assert!(stalled.is_closed());
        assert_eq!(registry.len(), 1);

        let mut received = vec![0u8; 1025];
        healthy_agent.read_exact(&mut received).await.unwrap();
        assert_eq!(received, line[0].as_bytes());
        drop(stalled_agent);
    }
}
