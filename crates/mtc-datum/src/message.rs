//! ---
//! mtc_section: "02-messaging-ipc-data-model"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Datum family and alarm condition reconciliation."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
use crate::datum::{mismatch, Datum, DatumId, DatumValue, Tracked};
use crate::{Result, UNAVAILABLE};

/// Operator message text with an optional controller code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageValue {
    /// Controller specific code, empty on the wire when absent.
    pub native_code: Option<String>,
    /// Message text.
    pub text: String,
}

impl MessageValue {
    /// Message without a native code.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            native_code: None,
            text: text.into(),
        }
    }

    /// Attach a native code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.native_code = Some(code.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.native_code.as_deref().map_or(true, str::is_empty)
    }
}

/// Message datum, always written on its own line as `name|code|text`.
#[derive(Debug, Clone)]
pub struct Message {
    id: DatumId,
    slot: Tracked<MessageValue>,
}

impl Message {
    /// Create an unavailable message.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: DatumId::new(name),
            slot: Tracked::new(),
        }
    }

    /// Create an unavailable message scoped to a device.
    pub fn with_device(device: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DatumId::with_device(device, name),
            slot: Tracked::new(),
        }
    }

    /// Store a message. An empty message makes the datum unavailable.
    pub fn set(&mut self, value: MessageValue) -> bool {
        if value.is_empty() {
            return self.slot.clear();
        }
        self.slot.set(value)
    }

    /// Shorthand for a coded message.
    pub fn set_coded(&mut self, code: impl Into<String>, text: impl Into<String>) -> bool {
        self.set(MessageValue::new(text).with_code(code))
    }

    /// Current message, `None` while unavailable.
    pub fn value(&self) -> Option<&MessageValue> {
        self.slot.get()
    }

    /// Fragment as it appears on the wire.
    pub fn render(&self) -> String {
        match self.slot.get() {
            Some(value) => format!(
                "{}|{}|{}",
                self.id,
                value.native_code.as_deref().unwrap_or_default(),
                value.text
            ),
            None => format!("{}||{}", self.id, UNAVAILABLE),
        }
    }
}

impl Datum for Message {
    fn id(&self) -> &DatumId {
        &self.id
    }

    fn separate_line(&self) -> bool {
        true
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
        match value {
            DatumValue::Message { native_code, text } => {
                Ok(self.set(MessageValue { native_code, text }))
            }
            DatumValue::Text(text) => Ok(self.set(MessageValue::new(text))),
            DatumValue::Unavailable => Ok(self.slot.clear()),
            other => Err(mismatch(&self.id, "message", &other)),
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
