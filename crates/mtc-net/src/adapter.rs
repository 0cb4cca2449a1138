//! ---
//! mtc_section: "05-networking-external-interfaces"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Line-oriented adapter server and wire protocol."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
//! The owning aggregate: tracked datums, connections, replay log, lifecycle.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use mtc_asset::AssetRef;
use mtc_common::config::AdapterSettings;
use mtc_common::time::{format_timestamp, Clock, SystemClock};
use mtc_datum::{Datum, DatumValue};

use crate::listener::accept_loop;
use crate::protocol::{asset_add_frame, asset_remove_frame, command_line, DeviceCommand};
use crate::publish::{self, compose, PublishMode, SharedDatum};
use crate::registry::{ClientWriter, Connection, ConnectionRegistry, RegistryMetrics};
use crate::replay::ReplayLog;
use crate::session::{Session, SessionEnd};
use crate::{AdapterError, Result};

struct Running {
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
}

struct Shared {
    settings: AdapterSettings,
    clock: Arc<dyn Clock>,
    registry: Arc<ConnectionRegistry>,
    datums: Mutex<Vec<SharedDatum>>,
    replay: Mutex<ReplayLog>,
    begun: AtomicBool,
    shutdown: watch::Sender<bool>,
    sessions: Mutex<Vec<JoinHandle<SessionEnd>>>,
    running: AsyncMutex<Option<Running>>,
}

/// Handle to one adapter instance. Clones share the same state.
///
/// Datums are registered once and then mutated by application code through
/// the `Arc<Mutex<_>>` returned by [`Adapter::add_datum`]. Do not hold a datum
/// lock across a call into the adapter.
#[derive(Clone)]
pub struct Adapter {
    shared: Arc<Shared>,
}

impl Adapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Adapter stamping lines from `clock` instead of the system time.
    pub fn with_clock(settings: AdapterSettings, clock: Arc<dyn Clock>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let write_timeout = settings
            .heartbeat_timeout()
            .unwrap_or(settings.shutdown_grace);
        let registry =
            Arc::new(ConnectionRegistry::new(settings.verbose).with_write_timeout(write_timeout));
        Self {
            shared: Arc::new(Shared {
                settings,
                clock,
                registry,
                datums: Mutex::new(Vec::new()),
                replay: Mutex::new(ReplayLog::new()),
                begun: AtomicBool::new(false),
                shutdown,
                sessions: Mutex::new(Vec::new()),
                running: AsyncMutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.shared.settings
    }

    /// Bind the listener and start accepting agents.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.shared.running.lock().await;
        if running.is_some() {
            return Err(AdapterError::AlreadyRunning);
        }

        let settings = &self.shared.settings;
        let addr = SocketAddr::new(settings.bind_address, settings.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AdapterError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        self.shared.shutdown.send_replace(false);
        let accept = tokio::spawn(accept_loop(
            listener,
            self.clone(),
            self.shared.shutdown.subscribe(),
        ));
        info!(
            address = %local_addr,
            heartbeat_ms = settings.heartbeat_millis(),
            "adapter listening"
        );

        *running = Some(Running { local_addr, accept });
        Ok(local_addr)
    }

    /// Stop accepting, close every client and wait for sessions to exit.
    ///
    /// Sessions still running after the grace period are abandoned.
    pub async fn stop(&self) {
        let Some(running) = self.shared.running.lock().await.take() else {
            return;
        };
        let settings = &self.shared.settings;
        self.shared.shutdown.send_replace(true);

        let accept_wait = settings
            .heartbeat_timeout()
            .unwrap_or(settings.shutdown_grace);
        let mut accept = running.accept;
        if timeout(accept_wait, &mut accept).await.is_err() {
            warn!("accept loop did not stop in time; aborting it");
            accept.abort();
        }

        if timeout(settings.shutdown_grace, self.shared.registry.close_all())
            .await
            .is_err()
        {
            warn!("closing clients exceeded the grace period");
        }

        let sessions = std::mem::take(&mut *self.shared.sessions.lock());
        let pending = sessions.len();
        if timeout(settings.shutdown_grace, join_all(sessions)).await.is_err() {
            warn!(pending, "sessions did not exit within the grace period; abandoning");
        }
        info!(address = %running.local_addr, "adapter stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.shared.running.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Result<SocketAddr> {
        self.shared
            .running
            .lock()
            .await
            .as_ref()
            .map(|running| running.local_addr)
            .ok_or(AdapterError::NotRunning)
    }

    pub async fn server_port(&self) -> Result<u16> {
        Ok(self.local_addr().await?.port())
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn metrics(&self) -> RegistryMetrics {
        self.shared.registry.metrics()
    }

    /// Track a datum and hand back the shared handle used to mutate it.
    pub fn add_datum<D: Datum + 'static>(&self, datum: D) -> Arc<Mutex<D>> {
        let handle = Arc::new(Mutex::new(datum));
        self.track(handle.clone());
        handle
    }

    /// Track a datum that is already shared.
    pub fn track<D: Datum + 'static>(&self, datum: Arc<Mutex<D>>) {
        let shared: SharedDatum = datum;
        debug!(datum = %shared.lock().id(), "tracking datum");
        self.shared.datums.lock().push(shared);
    }

    /// Stop tracking the datum rendered as `key`.
    pub fn remove_datum(&self, key: &str) -> bool {
        let mut datums = self.shared.datums.lock();
        let before = datums.len();
        datums.retain(|datum| datum.lock().id().key() != key);
        before != datums.len()
    }

    pub fn remove_all_datums(&self) {
        self.shared.datums.lock().clear();
    }

    /// Keys of tracked datums in tracked order.
    pub fn datum_keys(&self) -> Vec<String> {
        self.datums()
            .iter()
            .map(|datum| datum.lock().id().key())
            .collect()
    }

    /// Dynamically set the datum rendered as `key`.
    pub fn set(&self, key: &str, value: impl Into<DatumValue>) -> Result<bool> {
        let datum = self
            .datums()
            .into_iter()
            .find(|datum| datum.lock().id().key() == key)
            .ok_or_else(|| AdapterError::UnknownDatum(key.to_owned()))?;
        let changed = datum.lock().set_value(value.into())?;
        Ok(changed)
    }

    /// Mark every tracked datum unavailable.
    pub fn unavailable(&self) {
        for datum in self.datums() {
            datum.lock().set_unavailable();
        }
    }

    /// Open a mark-and-sweep cycle; the next publish prepares it.
    pub fn begin(&self) {
        publish::begin(&self.datums());
        self.shared.begun.store(true, Ordering::SeqCst);
    }

    /// Publish changed datums to every client at `timestamp`, or now.
    pub async fn send_changed(&self, timestamp: Option<DateTime<Utc>>) {
        let timestamp = format_timestamp(timestamp.unwrap_or_else(|| self.shared.clock.now()));
        let datums = self.datums();
        if self.shared.begun.swap(false, Ordering::SeqCst) {
            publish::prepare(&datums);
        }
        let lines = compose(&datums, PublishMode::Changed, &timestamp);
        publish::cleanup(&datums);
        self.shared.registry.broadcast(&lines).await;
    }

    /// Write a full dump of every datum to one client.
    pub async fn send_all_to(&self, connection: &Connection) -> bool {
        let timestamp = format_timestamp(self.shared.clock.now());
        let lines = compose(&self.datums(), PublishMode::Full, &timestamp);
        self.shared.registry.send_to(connection, &lines).await
    }

    /// Push a device command. Durable commands are replayed to new clients.
    pub async fn send_command(&self, command: DeviceCommand, value: &str, durable: bool) {
        if durable {
            self.shared.replay.lock().record_command(command, value);
        }
        self.shared
            .registry
            .broadcast(&[command_line(command, value)])
            .await;
    }

    /// Publish an asset document.
    pub async fn add_asset(&self, asset: AssetRef, durable: bool) -> Result<()> {
        let timestamp = format_timestamp(self.shared.clock.now());
        let frame = asset_add_frame(&timestamp, asset.as_ref())?;
        if durable {
            self.shared.replay.lock().record_asset(asset);
        }
        self.shared.registry.broadcast(&[frame]).await;
        Ok(())
    }

    /// Retire an asset on the agent.
    pub async fn remove_asset(&self, asset_id: &str, durable: bool) {
        let timestamp = format_timestamp(self.shared.clock.now());
        if durable {
            self.shared.replay.lock().record_removal(asset_id);
        }
        self.shared
            .registry
            .broadcast(&[asset_remove_frame(&timestamp, asset_id)])
            .await;
    }

    /// Register a write-only client such as an in-memory stream.
    ///
    /// The client receives the snapshot and replay before any later
    /// broadcast. Check [`Connection::is_closed`] to see whether that write
    /// succeeded.
    pub async fn add_client<W>(&self, writer: W, peer: impl Into<String>) -> Arc<Connection>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.register(Box::new(writer), peer.into()).await
    }

    /// Serve a bidirectional stream as if it had been accepted by the listener.
    pub fn serve<S>(&self, stream: S, peer: impl Into<String>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.attach(reader, Box::new(writer), peer.into());
    }

    pub(crate) fn attach<R>(&self, reader: R, writer: ClientWriter, peer: String)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let adapter = self.clone();
        let shutdown = self.shared.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let connection = adapter.register(writer, peer).await;
            if connection.is_closed() {
                return SessionEnd::WriteFailed;
            }
            Session::new(
                reader,
                connection,
                adapter.shared.registry.clone(),
                adapter.shared.settings.heartbeat,
                shutdown,
            )
            .run()
            .await
        });

        let mut sessions = self.shared.sessions.lock();
        sessions.retain(|session| !session.is_finished());
        sessions.push(handle);
    }

    /// Insert a connection and write its snapshot and replay while holding its
    /// write lock, so no broadcast can land in between.
    async fn register(&self, writer: ClientWriter, peer: String) -> Arc<Connection> {
        let registry = &self.shared.registry;
        let connection = registry.create(writer, peer);
        let mut guard = connection.lock_writer().await;
        registry.insert(connection.clone());

        let timestamp = format_timestamp(self.shared.clock.now());
        let mut lines = compose(&self.datums(), PublishMode::Full, &timestamp);
        lines.extend(self.shared.replay.lock().frames(&timestamp));
        registry.echo(&lines);

        let written = connection.write_bounded(&mut guard, &lines).await;
        drop(guard);
        match written {
            Ok(()) => {
                registry.record_sent(&lines);
                info!(peer = %connection.peer(), clients = registry.len(), "agent connected");
            }
            Err(err) => registry.drop_failed(&connection, &err),
        }
        connection
    }

    fn datums(&self) -> Vec<SharedDatum> {
        self.shared.datums.lock().clone()
    }
}
