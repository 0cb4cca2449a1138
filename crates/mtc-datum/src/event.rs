//! ---
//! mtc_section: "02-messaging-ipc-data-model"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Datum family and alarm condition reconciliation."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use mtc_common::time::format_timestamp;

use crate::datum::{mismatch, Datum, DatumId, DatumValue, Tracked};
use crate::{Result, UNAVAILABLE};

/// Value types an [`Event`] can carry.
pub trait EventValue: Clone + PartialEq + Send + 'static {
    /// Shape name used in mismatch errors.
    const KIND: &'static str;

    /// Wire rendering of the value.
    fn render(&self) -> String;

    /// Values that mean "no value" and make the event unavailable.
    fn is_sentinel(&self) -> bool {
        false
    }

    /// Extract a value of this type, handing the input back on mismatch.
    fn from_datum_value(value: DatumValue) -> std::result::Result<Self, DatumValue>;
}

impl EventValue for String {
    const KIND: &'static str = "text";

    fn render(&self) -> String {
        self.clone()
    }

    fn is_sentinel(&self) -> bool {
        self.is_empty() || self == UNAVAILABLE
    }

    fn from_datum_value(value: DatumValue) -> std::result::Result<Self, DatumValue> {
        match value {
            DatumValue::Text(text) => Ok(text),
            other => Err(other),
        }
    }
}

impl EventValue for i64 {
    const KIND: &'static str = "integer";

    fn render(&self) -> String {
        self.to_string()
    }

    fn from_datum_value(value: DatumValue) -> std::result::Result<Self, DatumValue> {
        match value {
            DatumValue::Integer(number) => Ok(number),
            other => Err(other),
        }
    }
}

impl EventValue for u32 {
    const KIND: &'static str = "count";

    fn render(&self) -> String {
        self.to_string()
    }

    fn from_datum_value(value: DatumValue) -> std::result::Result<Self, DatumValue> {
        match value {
            DatumValue::Integer(number) => u32::try_from(number).map_err(|_| DatumValue::Integer(number)),
            other => Err(other),
        }
    }
}

impl EventValue for f64 {
    const KIND: &'static str = "float";

    fn render(&self) -> String {
        self.to_string()
    }

    fn is_sentinel(&self) -> bool {
        self.is_nan()
    }

    fn from_datum_value(value: DatumValue) -> std::result::Result<Self, DatumValue> {
        match value {
            DatumValue::Float(number) => Ok(number),
            DatumValue::Integer(number) => Ok(number as f64),
            other => Err(other),
        }
    }
}

impl EventValue for bool {
    const KIND: &'static str = "boolean";

    fn render(&self) -> String {
        self.to_string()
    }

    fn from_datum_value(value: DatumValue) -> std::result::Result<Self, DatumValue> {
        match value {
            DatumValue::Boolean(flag) => Ok(flag),
            other => Err(other),
        }
    }
}

impl EventValue for DateTime<Utc> {
    const KIND: &'static str = "timestamp";

    fn render(&self) -> String {
        format_timestamp(*self)
    }

    fn from_datum_value(value: DatumValue) -> std::result::Result<Self, DatumValue> {
        match value {
            DatumValue::Timestamp(instant) => Ok(instant),
            other => Err(other),
        }
    }
}

/// Single-valued datum packed onto the shared data line as `name|value`.
#[derive(Debug, Clone)]
pub struct Event<T: EventValue = String> {
    id: DatumId,
    slot: Tracked<T>,
}

/// Text event such as availability or execution state.
pub type TextEvent = Event<String>;
/// Signed integer event such as a program line number.
pub type IntegerEvent = Event<i64>;
/// Unsigned counter such as a part count.
pub type CountEvent = Event<u32>;
/// Numeric sample such as a spindle speed.
pub type Sample = Event<f64>;
/// Event carrying a point in time.
pub type TimestampEvent = Event<DateTime<Utc>>;

impl<T: EventValue> Event<T> {
    /// Create an unavailable event.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_id(DatumId::new(name))
    }

    /// Create an unavailable event scoped to a device.
    pub fn with_device(device: impl Into<String>, name: impl Into<String>) -> Self {
        Self::from_id(DatumId::with_device(device, name))
    }

    fn from_id(id: DatumId) -> Self {
        Self {
            id,
            slot: Tracked::new(),
        }
    }

    /// Store a value. Sentinel values make the event unavailable.
    pub fn set(&mut self, value: impl Into<T>) -> bool {
        let value = value.into();
        if value.is_sentinel() {
            return self.slot.clear();
        }
        self.slot.set(value)
    }

    /// Current value, `None` while unavailable.
    pub fn value(&self) -> Option<&T> {
        self.slot.get()
    }

    /// Fragment as it appears on the wire.
    pub fn render(&self) -> String {
        match self.slot.get() {
            Some(value) => format!("{}|{}", self.id, value.render()),
            None => format!("{}|{}", self.id, UNAVAILABLE),
        }
    }
}

impl<T: EventValue> Datum for Event<T> {
    fn id(&self) -> &DatumId {
        &self.id
    }

    fn is_available(&self) -> bool {
        self.slot.get().is_some()
    }

    fn has_changed(&self) -> bool {
        self.slot.changed()
    }

    fn set_unavailable(&mut self) {
        self.slot.clear();
    }

    fn set_value(&mut self, value: DatumValue) -> Result<bool> {
        if let DatumValue::Unavailable = value {
            return Ok(self.slot.clear());
        }
        match T::from_datum_value(value) {
            Ok(value) => Ok(self.set(value)),
            Err(other) => Err(mismatch(&self.id, T::KIND, &other)),
        }
    }

    fn add_to_update(&mut self, fragments: &mut Vec<String>) {
        if self.slot.take_changed() {
            fragments.push(self.render());
        }
    }

    fn render_all(&self, fragments: &mut Vec<String>) {
        fragments.push(self.render());
    }

    fn cleanup(&mut self) {
        self.slot.take_changed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatumError;
    use chrono::TimeZone;

    #[test]
    fn not_available_on_creation() {
        let event = TextEvent::new("avail");
        assert!(!event.is_available());
        assert!(event.has_changed());
        assert_eq!(event.render(), "avail|UNAVAILABLE");
    }

    #[test]
    fn formats_each_value_type() {
        let mut text = TextEvent::new("testEvent1");
        text.set("a value");
        assert_eq!(text.render(), "testEvent1|a value");

        let mut count = IntegerEvent::with_device("testDevice2", "testEvent2");
        assert_eq!(count.render(), "testDevice2:testEvent2|UNAVAILABLE");
        count.set(42);
        assert_eq!(count.render(), "testDevice2:testEvent2|42");

        let mut speed = Sample::new("speed");
        speed.set(3.1);
        assert_eq!(speed.render(), "speed|3.1");

        let mut stamp = TimestampEvent::new("when");
        let instant = Utc.with_ymd_and_hms(2020, 3, 22, 13, 34, 12).unwrap()
            + chrono::Duration::milliseconds(18);
        stamp.set(instant);
        assert_eq!(stamp.render(), "when|2020-03-22T13:34:12.0180000Z");
    }

    #[test]
    fn add_to_update_consumes_change_once() {
        let mut event = TextEvent::new("avail");
        event.set("AVAILABLE");

        let mut first = Vec::new();
        event.add_to_update(&mut first);
        assert_eq!(first, vec!["avail|AVAILABLE".to_owned()]);

        let mut second = Vec::new();
        event.add_to_update(&mut second);
        assert!(second.is_empty());

        assert!(!event.set("AVAILABLE"));
        event.add_to_update(&mut second);
        assert!(second.is_empty());
    }

    #[test]
    fn sentinel_values_make_event_unavailable() {
        let mut event = TextEvent::new("mode");
        event.set("AUTOMATIC");
        event.cleanup();

        assert!(event.set(""));
        assert!(!event.is_available());
        assert!(event.has_changed());

        let mut sample = Sample::new("load");
        sample.set(1.5);
        sample.set(f64::NAN);
        assert!(!sample.is_available());
    }

    #[test]
    fn set_unavailable_raises_change_only_when_available() {
        let mut event = TextEvent::new("avail");
        event.cleanup();
        event.set_unavailable();
        assert!(!event.has_changed());

        event.set("AVAILABLE");
        event.cleanup();
        event.set_unavailable();
        assert!(event.has_changed());
        assert_eq!(event.render(), "avail|UNAVAILABLE");
    }

    #[test]
    fn dynamic_set_rejects_wrong_shape() {
        let mut count = IntegerEvent::new("count");
        let err = count.set_value(DatumValue::from("ten")).unwrap_err();
        assert_eq!(
            err,
            DatumError::ArgumentMismatch {
                datum: "count".to_owned(),
                expected: "integer",
                found: "text",
            }
        );
        assert!(count.set_value(DatumValue::Integer(10)).unwrap());
        assert!(count.set_value(DatumValue::Unavailable).unwrap());
        assert!(!count.is_available());
    }

    #[test]
    fn counter_rejects_out_of_range_integers() {
        let mut parts = CountEvent::new("partCount");
        assert!(parts.set_value(DatumValue::Integer(7)).unwrap());
        assert_eq!(parts.render(), "partCount|7");
        let err = parts.set_value(DatumValue::Integer(-1)).unwrap_err();
        assert!(matches!(err, DatumError::ArgumentMismatch { expected: "count", .. }));
        assert_eq!(parts.value(), Some(&7));
    }
}
