//! ---
//! mtc_section: "05-networking-external-interfaces"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Line-oriented adapter server and wire protocol."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
//! Adapter side of the agent line protocol.
//!
//! The [`Adapter`] owns the tracked datums, the live connection set and the
//! replay log. Application code mutates datums and calls
//! [`Adapter::send_changed`]; agents connect over TCP, receive a snapshot and
//! then every subsequent data line.

pub mod adapter;
pub mod listener;
pub mod protocol;
pub mod publish;
pub mod registry;
pub mod replay;
pub mod session;

use std::net::SocketAddr;

use mtc_asset::AssetError;
use mtc_datum::DatumError;

/// Result alias for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Failures surfaced to the application driving the adapter.
///
/// Per-client transport failures are not represented here; they are logged
/// and the affected connection is dropped.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Socket level failure outside any single client.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The listener could not be bound.
    #[error("failed to bind adapter listener on {addr}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// `start` was called on a running adapter.
    #[error("adapter is already running")]
    AlreadyRunning,
    /// The operation needs a bound listener.
    #[error("adapter is not running")]
    NotRunning,
    /// No tracked datum carries the key.
    #[error("no datum tracked under '{0}'")]
    UnknownDatum(String),
    /// A datum rejected the requested mutation.
    #[error(transparent)]
    Datum(#[from] DatumError),
    /// An asset body could not be rendered.
    #[error(transparent)]
    Asset(#[from] AssetError),
}

pub use adapter::Adapter;
pub use protocol::{DeviceCommand, LineSplitter};
pub use publish::{compose, PublishMode, SharedDatum};
pub use registry::{ClientWriter, Connection, ConnectionId, ConnectionRegistry, RegistryMetrics};
pub use replay::ReplayLog;
pub use session::{Session, SessionEnd, SessionState};
