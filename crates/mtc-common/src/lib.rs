//! ---
//! mtc_section: "01-core-functionality"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Shared primitives and utilities for the adapter runtime."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
//! Core shared primitives for the MTConnect adapter workspace.
//! This crate exposes configuration loading, logging, and the time source
//! used to stamp every outbound protocol line.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{AdapterSettings, AppConfig, LoadedAppConfig, LoggingConfig, SimulatorConfig};
pub use logging::{init_tracing, LogFormat};
pub use time::{format_timestamp, Clock, FixedClock, SystemClock};
