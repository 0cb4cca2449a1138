//! ---
//! mtc_section: "02-messaging-ipc-data-model"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Datum family and alarm condition reconciliation."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};

use crate::condition::Activation;
use crate::{DatumError, Result};

/// Identity of a datum: an optional device prefix and a data item name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatumId {
    device: Option<String>,
    name: String,
}

impl DatumId {
    /// Identity without a device prefix.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            device: None,
            name: name.into(),
        }
    }

    /// Identity scoped to a device, rendered as `device:name`.
    pub fn with_device(device: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            device: Some(device.into()),
            name: name.into(),
        }
    }

    /// Data item name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional device prefix.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Key as it appears on the wire.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DatumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            Some(device) => write!(f, "{}:{}", device, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Dynamically shaped value accepted by [`Datum::set_value`].
#[derive(Debug, Clone, PartialEq)]
pub enum DatumValue {
    /// Free text.
    Text(String),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean flag.
    Boolean(bool),
    /// Point in time.
    Timestamp(DateTime<Utc>),
    /// Message text with an optional native code.
    Message {
        /// Controller specific code.
        native_code: Option<String>,
        /// Human readable text.
        text: String,
    },
    /// Batch of samples for a time series.
    Series(Vec<f64>),
    /// Alarm activation for a condition.
    Activation(Activation),
    /// Explicit "no value".
    Unavailable,
}

impl DatumValue {
    /// Short name of the value shape, used in mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            DatumValue::Text(_) => "text",
            DatumValue::Integer(_) => "integer",
            DatumValue::Float(_) => "float",
            DatumValue::Boolean(_) => "boolean",
            DatumValue::Timestamp(_) => "timestamp",
            DatumValue::Message { .. } => "message",
            DatumValue::Series(_) => "series",
            DatumValue::Activation(_) => "activation",
            DatumValue::Unavailable => "unavailable",
        }
    }
}

impl From<&str> for DatumValue {
    fn from(value: &str) -> Self {
        DatumValue::Text(value.to_owned())
    }
}

impl From<String> for DatumValue {
    fn from(value: String) -> Self {
        DatumValue::Text(value)
    }
}

impl From<i64> for DatumValue {
    fn from(value: i64) -> Self {
        DatumValue::Integer(value)
    }
}

impl From<f64> for DatumValue {
    fn from(value: f64) -> Self {
        DatumValue::Float(value)
    }
}

impl From<bool> for DatumValue {
    fn from(value: bool) -> Self {
        DatumValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for DatumValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatumValue::Timestamp(value)
    }
}

impl From<Vec<f64>> for DatumValue {
    fn from(value: Vec<f64>) -> Self {
        DatumValue::Series(value)
    }
}

impl From<Activation> for DatumValue {
    fn from(value: Activation) -> Self {
        DatumValue::Activation(value)
    }
}

/// Capability set shared by every reported data item.
///
/// Implementations keep a sticky change flag: it is raised when the value
/// differs from what was last reported and consumed by [`Datum::add_to_update`].
pub trait Datum: Send {
    /// Identity of the datum.
    fn id(&self) -> &DatumId;

    /// Whether each fragment must occupy its own protocol line.
    fn separate_line(&self) -> bool {
        false
    }

    /// Whether the datum currently holds a value.
    fn is_available(&self) -> bool;

    /// Whether a change is waiting to be reported.
    fn has_changed(&self) -> bool;

    /// Drop the current value, raising the change flag if one was held.
    fn set_unavailable(&mut self);

    /// Type-checked dynamic setter. Returns whether the value changed.
    fn set_value(&mut self, value: DatumValue) -> Result<bool>;

    /// Append pending fragments and consume the change flag.
    fn add_to_update(&mut self, fragments: &mut Vec<String>);

    /// Append every fragment regardless of the change flag.
    fn render_all(&self, fragments: &mut Vec<String>);

    /// Start a reporting cycle.
    fn begin(&mut self) {}

    /// Close the collection phase of a reporting cycle.
    fn prepare(&mut self) {}

    /// Finish a reporting cycle after its lines were written.
    fn cleanup(&mut self);
}

/// Value slot with a sticky change flag, shared by the plain datum variants.
#[derive(Debug, Clone)]
pub(crate) struct Tracked<T> {
    value: Option<T>,
    changed: bool,
}

impl<T: PartialEq> Tracked<T> {
    /// Fresh slots are unavailable with their initial state still unreported.
    pub(crate) fn new() -> Self {
        Self {
            value: None,
            changed: true,
        }
    }

    pub(crate) fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub(crate) fn set(&mut self, value: T) -> bool {
        if self.value.as_ref() == Some(&value) {
            return false;
        }
        self.value = Some(value);
        self.changed = true;
        true
    }

    pub(crate) fn clear(&mut self) -> bool {
        if self.value.take().is_some() {
            self.changed = true;
            true
        } else {
            false
        }
    }

    pub(crate) fn changed(&self) -> bool {
        self.changed
    }

    pub(crate) fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }
}

pub(crate) fn mismatch(id: &DatumId, expected: &'static str, found: &DatumValue) -> DatumError {
    DatumError::ArgumentMismatch {
        datum: id.key(),
        expected,
        found: found.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_prefix_is_rendered() {
        assert_eq!(DatumId::new("avail").key(), "avail");
        assert_eq!(DatumId::with_device("mill", "avail").key(), "mill:avail");
    }

    #[test]
    fn tracked_flag_is_sticky_until_taken() {
        let mut slot = Tracked::new();
        assert!(slot.take_changed());
        assert!(slot.set(1));
        assert!(slot.set(2));
        assert!(!slot.set(2));
        assert!(slot.changed());
        assert!(slot.take_changed());
        assert!(!slot.take_changed());
        assert!(slot.clear());
        assert!(!slot.clear());
        assert_eq!(slot.get(), None);
    }
}
