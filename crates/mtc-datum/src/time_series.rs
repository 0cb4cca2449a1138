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

/// Batch of samples written on its own line as `name|count|rate|v1 v2 ...`.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    id: DatumId,
    rate: Option<f64>,
    slot: Tracked<Vec<f64>>,
}

impl TimeSeries {
    /// Create an unavailable series without a sample rate.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: DatumId::new(name),
            rate: None,
            slot: Tracked::new(),
        }
    }

    /// Create an unavailable series scoped to a device.
    pub fn with_device(device: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DatumId::with_device(device, name),
            rate: None,
            slot: Tracked::new(),
        }
    }

    /// Sample rate in hertz. Zero is treated as unknown.
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Replace the batch of samples.
    pub fn set(&mut self, values: Vec<f64>) -> bool {
        self.slot.set(values)
    }

    /// Current samples, `None` while unavailable.
    pub fn values(&self) -> Option<&[f64]> {
        self.slot.get().map(Vec::as_slice)
    }

    /// Fragment as it appears on the wire.
    pub fn render(&self) -> String {
        let Some(values) = self.slot.get() else {
            return format!("{}|||{}", self.id, UNAVAILABLE);
        };
        let count = if values.is_empty() {
            String::new()
        } else {
            values.len().to_string()
        };
        let rate = match self.rate {
            Some(rate) if rate != 0.0 && !values.is_empty() => rate.to_string(),
            _ => String::new(),
        };
        let samples = values
            .iter()
            .map(|value| format_sample(*value))
            .collect::<Vec<_>>()
            .join(" ");
        format!("{}|{}|{}|{}", self.id, count, rate, samples)
    }
}

/// At least one and at most six fractional digits.
fn format_sample(value: f64) -> String {
    let mut text = format!("{value:.6}");
    if text.contains('.') {
        while text.ends_with('0') && !text.ends_with(".0") {
            text.pop();
        }
    }
    if text == "-0.0" {
        text = "0.0".to_owned();
    }
    text
}

impl Datum for TimeSeries {
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
            DatumValue::Series(values) => Ok(self.set(values)),
            DatumValue::Unavailable => Ok(self.slot.clear()),
            other => Err(mismatch(&self.id, "series", &other)),
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

    #[test]
    fn not_available_on_creation() {
        let series = TimeSeries::new("eventName");
        assert!(!series.is_available());
        assert_eq!(series.render(), "eventName|||UNAVAILABLE");
    }

    #[test]
    fn formats_samples_and_rate() {
        let mut plain = TimeSeries::new("testTimeSeries1");
        plain.set(vec![1.0, 2.1333885, 3.0]);
        assert_eq!(plain.render(), "testTimeSeries1|3||1.0 2.133389 3.0");

        let mut rated = TimeSeries::new("testTimeSeries1").with_rate(4.0);
        rated.set(vec![1.0, 2.1333885, 3.0]);
        assert_eq!(rated.render(), "testTimeSeries1|3|4|1.0 2.133389 3.0");

        let mut scoped = TimeSeries::with_device("testDevice2", "testTimeSeries2").with_rate(4.0);
        assert_eq!(scoped.render(), "testDevice2:testTimeSeries2|||UNAVAILABLE");
        scoped.set(vec![0.0, 2.1, 3.2]);
        assert_eq!(scoped.render(), "testDevice2:testTimeSeries2|3|4|0.0 2.1 3.2");
    }

    #[test]
    fn zero_rate_is_left_blank() {
        let mut series = TimeSeries::new("ts").with_rate(0.0);
        series.set(vec![1.5]);
        assert_eq!(series.render(), "ts|1||1.5");
    }

    #[test]
    fn set_unavailable_drops_samples() {
        let mut series = TimeSeries::new("ts");
        series.set(vec![1.22]);
        assert!(series.is_available());
        series.set_unavailable();
        assert!(!series.is_available());
        assert_eq!(series.values(), None);
    }

    #[test]
    fn sample_format_trims_trailing_zeros() {
        assert_eq!(format_sample(3.0), "3.0");
        assert_eq!(format_sample(2.50), "2.5");
        assert_eq!(format_sample(-1.25), "-1.25");
        assert_eq!(format_sample(0.1234567), "0.123457");
    }
}
