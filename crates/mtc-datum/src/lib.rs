//! ---
//! mtc_section: "02-messaging-ipc-data-model"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Datum family and alarm condition reconciliation."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
//! Named, typed units of reported machine state.
//!
//! Every datum renders itself as a pipe-delimited protocol fragment and keeps
//! a sticky change flag that is consumed by the next publish cycle.
#![warn(missing_docs)]

pub mod condition;
pub mod datum;
pub mod event;
pub mod message;
pub mod time_series;

/// Token rendered in place of a value when a datum is unavailable.
pub const UNAVAILABLE: &str = "UNAVAILABLE";

/// Shared result type for datum operations.
pub type Result<T> = std::result::Result<T, DatumError>;

/// Contract violations raised to the application code driving a datum.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DatumError {
    /// A value of the wrong shape was handed to a typed datum.
    #[error("datum '{datum}' expects a {expected} value, got {found}")]
    ArgumentMismatch {
        /// Rendered key of the datum.
        datum: String,
        /// Shape the datum accepts.
        expected: &'static str,
        /// Shape that was supplied.
        found: &'static str,
    },
    /// Manual clearing was requested on a mark-and-sweep condition.
    #[error("condition '{condition}' is swept automatically; clear is only valid on simple conditions")]
    NotSimple {
        /// Rendered key of the condition.
        condition: String,
    },
    /// Text did not name a condition level.
    #[error("unknown condition level '{0}'")]
    UnknownLevel(String),
    /// Text did not name a condition qualifier.
    #[error("unknown condition qualifier '{0}'")]
    UnknownQualifier(String),
}

pub use condition::{Activation, Condition, ConditionLevel, ConditionQualifier};
pub use datum::{Datum, DatumId, DatumValue};
pub use event::{CountEvent, Event, EventValue, IntegerEvent, Sample, TextEvent, TimestampEvent};
pub use message::{Message, MessageValue};
pub use time_series::TimeSeries;
