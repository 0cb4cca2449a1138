//! ---
//! mtc_section: "02-messaging-ipc-data-model"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Datum family and alarm condition reconciliation."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
//! Alarm conditions and their mark-and-sweep reconciliation.
//!
//! A condition holds either a single placeholder activation (nothing is wrong,
//! or nothing is known) or a set of coded activations keyed by native code.
//! Non-simple conditions run a `begin` / `add`* / `prepare` cycle: activations
//! that were not re-asserted since `begin` are reported as NORMAL once and then
//! forgotten at `cleanup`. Simple conditions keep activations until `clear`.
use std::collections::HashSet;
use std::str::FromStr;

use indexmap::IndexMap;
use strum::{AsRefStr, Display, EnumString};
use tracing::trace;

use crate::datum::{mismatch, Datum, DatumId, DatumValue};
use crate::{DatumError, Result};

/// Severity of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ConditionLevel {
    /// Nothing is known about the condition.
    Unavailable,
    /// Operating normally.
    Normal,
    /// Attention is required but operation continues.
    Warning,
    /// Operation is impaired.
    Fault,
}

impl ConditionLevel {
    /// Parse a level from its wire name.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_str(text).map_err(|_| DatumError::UnknownLevel(text.to_owned()))
    }
}

/// Direction of an out-of-range reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ConditionQualifier {
    /// Reading below the expected range.
    Low,
    /// Reading above the expected range.
    High,
}

impl ConditionQualifier {
    /// Parse a qualifier from its wire name.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_str(text).map_err(|_| DatumError::UnknownQualifier(text.to_owned()))
    }
}

/// One alarm instance within a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// Severity.
    pub level: ConditionLevel,
    /// Controller specific alarm code; empty when absent.
    pub native_code: String,
    /// Controller specific severity; empty when absent.
    pub native_severity: String,
    /// Optional range qualifier.
    pub qualifier: Option<ConditionQualifier>,
    /// Human readable text.
    pub message: String,
}

impl Activation {
    /// Activation at `level` with every optional field empty.
    pub fn new(level: ConditionLevel) -> Self {
        Self {
            level,
            native_code: String::new(),
            native_severity: String::new(),
            qualifier: None,
            message: String::new(),
        }
    }

    /// Set the native code identifying this alarm instance.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.native_code = code.into();
        self
    }

    /// Set the message text.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the native severity.
    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.native_severity = severity.into();
        self
    }

    /// Set the qualifier.
    pub fn with_qualifier(mut self, qualifier: ConditionQualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    /// Uncoded NORMAL or UNAVAILABLE activation standing for "no alarm".
    pub fn is_placeholder(&self) -> bool {
        self.native_code.is_empty()
            && matches!(
                self.level,
                ConditionLevel::Normal | ConditionLevel::Unavailable
            )
    }

    /// `LEVEL|nativeCode|nativeSeverity|qualifier|message`
    pub fn render(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.level,
            self.native_code,
            self.native_severity,
            self.qualifier.map(|q| q.as_ref().to_owned()).unwrap_or_default(),
            self.message
        )
    }
}

#[derive(Debug, Clone)]
struct Slot {
    activation: Activation,
    changed: bool,
}

impl Slot {
    fn fresh(activation: Activation) -> Self {
        Self {
            activation,
            changed: true,
        }
    }

    fn update(&mut self, activation: Activation) -> bool {
        if self.activation == activation {
            return false;
        }
        self.activation = activation;
        self.changed = true;
        true
    }
}

/// Named alarm condition.
#[derive(Debug, Clone)]
pub struct Condition {
    id: DatumId,
    simple: bool,
    placeholder: Option<Slot>,
    coded: IndexMap<String, Slot>,
    marked: HashSet<String>,
    sweep_started: bool,
    reconciled: bool,
}

impl Condition {
    /// Mark-and-sweep condition, initially UNAVAILABLE.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(DatumId::new(name), false)
    }

    /// Condition whose activations persist until explicitly cleared.
    pub fn simple(name: impl Into<String>) -> Self {
        Self::build(DatumId::new(name), true)
    }

    /// Condition scoped to a device.
    pub fn with_device(device: impl Into<String>, name: impl Into<String>, simple: bool) -> Self {
        Self::build(DatumId::with_device(device, name), simple)
    }

    fn build(id: DatumId, simple: bool) -> Self {
        Self {
            id,
            simple,
            placeholder: Some(Slot::fresh(Activation::new(ConditionLevel::Unavailable))),
            coded: IndexMap::new(),
            marked: HashSet::new(),
            sweep_started: false,
            reconciled: false,
        }
    }

    /// Whether activations must be cleared manually.
    pub fn is_simple(&self) -> bool {
        self.simple
    }

    /// Currently held activations, placeholder first.
    pub fn activations(&self) -> Vec<&Activation> {
        self.placeholder
            .iter()
            .chain(self.coded.values())
            .map(|slot| &slot.activation)
            .collect()
    }

    /// Look up a coded activation.
    pub fn activation(&self, native_code: &str) -> Option<&Activation> {
        self.coded.get(native_code).map(|slot| &slot.activation)
    }

    /// Assert an activation. Returns whether the condition changed.
    pub fn add(&mut self, activation: Activation) -> bool {
        if activation.is_placeholder() {
            return self.reset(activation.level);
        }

        if self.placeholder.take().is_some() {
            trace!(condition = %self.id, "placeholder replaced by coded activation");
        }

        let code = activation.native_code.clone();
        self.marked.insert(code.clone());
        match self.coded.get_mut(&code) {
            Some(slot) => slot.update(activation),
            None => {
                self.coded.insert(code, Slot::fresh(activation));
                true
            }
        }
    }

    /// Assert a coded fault.
    pub fn fault(&mut self, native_code: impl Into<String>, message: impl Into<String>) -> bool {
        self.add(
            Activation::new(ConditionLevel::Fault)
                .with_code(native_code)
                .with_message(message),
        )
    }

    /// Assert a coded warning.
    pub fn warning(&mut self, native_code: impl Into<String>, message: impl Into<String>) -> bool {
        self.add(
            Activation::new(ConditionLevel::Warning)
                .with_code(native_code)
                .with_message(message),
        )
    }

    /// Collapse the condition to a single NORMAL placeholder.
    pub fn normal(&mut self) -> bool {
        self.reset(ConditionLevel::Normal)
    }

    /// Collapse the condition to a single UNAVAILABLE placeholder.
    pub fn unavailable(&mut self) -> bool {
        self.reset(ConditionLevel::Unavailable)
    }

    /// Manually clear one coded activation of a simple condition.
    ///
    /// Returns `Ok(false)` when no activation carries `native_code`.
    pub fn clear(&mut self, native_code: &str) -> Result<bool> {
        if !self.simple {
            return Err(DatumError::NotSimple {
                condition: self.id.key(),
            });
        }
        if !self.coded.contains_key(native_code) {
            return Ok(false);
        }

        let live = self
            .coded
            .keys()
            .filter(|code| self.marked.contains(*code))
            .count();
        let last_live = live <= 1 && self.marked.contains(native_code);
        if last_live {
            self.replace_with_placeholder(ConditionLevel::Normal);
            return Ok(true);
        }

        if let Some(slot) = self.coded.get_mut(native_code) {
            slot.update(Activation::new(ConditionLevel::Normal).with_code(native_code));
        }
        self.marked.remove(native_code);
        Ok(true)
    }

    /// Global reset to `level`. A single activation already at `level` is kept.
    fn reset(&mut self, level: ConditionLevel) -> bool {
        if let Some(slot) = &self.placeholder {
            if slot.activation.level == level {
                return false;
            }
        } else if self.coded.len() == 1 {
            if let Some((code, slot)) = self.coded.first() {
                if slot.activation.level == level {
                    let code = code.clone();
                    self.marked.insert(code);
                    return false;
                }
            }
        }
        self.replace_with_placeholder(level);
        true
    }

    fn replace_with_placeholder(&mut self, level: ConditionLevel) {
        self.coded.clear();
        self.marked.clear();
        self.placeholder = Some(Slot::fresh(Activation::new(level)));
    }

    fn reportable(&self) -> bool {
        !self.sweep_started || self.reconciled
    }

    fn fragment(&self, activation: &Activation) -> String {
        format!("{}|{}", self.id, activation.render())
    }
}

impl Datum for Condition {
    fn id(&self) -> &DatumId {
        &self.id
    }

    fn separate_line(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        !matches!(
            &self.placeholder,
            Some(slot) if slot.activation.level == ConditionLevel::Unavailable
        )
    }

    fn has_changed(&self) -> bool {
        self.placeholder
            .iter()
            .chain(self.coded.values())
            .any(|slot| slot.changed)
    }

    fn set_unavailable(&mut self) {
        self.unavailable();
    }

    fn set_value(&mut self, value: DatumValue) -> Result<bool> {
        match value {
            DatumValue::Activation(activation) => Ok(self.add(activation)),
            DatumValue::Unavailable => Ok(self.unavailable()),
            other => Err(mismatch(&self.id, "activation", &other)),
        }
    }

    fn add_to_update(&mut self, fragments: &mut Vec<String>) {
        if !self.reportable() {
            return;
        }
        let id = &self.id;
        for slot in self.placeholder.iter_mut().chain(self.coded.values_mut()) {
            if std::mem::take(&mut slot.changed) {
                fragments.push(format!("{}|{}", id, slot.activation.render()));
            }
        }
    }

    fn render_all(&self, fragments: &mut Vec<String>) {
        for activation in self.activations() {
            fragments.push(self.fragment(activation));
        }
    }

    fn begin(&mut self) {
        if self.simple {
            return;
        }
        self.marked.clear();
        self.sweep_started = true;
        self.reconciled = false;
    }

    fn prepare(&mut self) {
        if self.simple || !self.sweep_started {
            return;
        }

        let any_marked =
            self.placeholder.is_some() || self.coded.keys().any(|code| self.marked.contains(code));
        if !any_marked {
            trace!(condition = %self.id, "no activation re-asserted; reverting to normal");
            self.reset(ConditionLevel::Normal);
        } else {
            for (code, slot) in self.coded.iter_mut() {
                if !self.marked.contains(code) {
                    slot.update(Activation::new(ConditionLevel::Normal).with_code(code.clone()));
                }
            }
        }
        self.reconciled = true;
    }

    fn cleanup(&mut self) {
        for slot in self.placeholder.iter_mut().chain(self.coded.values_mut()) {
            slot.changed = false;
        }

        if self.simple || self.reconciled {
            let marked = &self.marked;
            self.coded.retain(|code, _| marked.contains(code));
        } else if self.sweep_started {
            // Sweep abandoned before prepare: keep everything asserted.
            self.marked = self.coded.keys().cloned().collect();
        }
        self.sweep_started = false;
        self.reconciled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(condition: &mut Condition) -> Vec<String> {
        let mut fragments = Vec::new();
        condition.add_to_update(&mut fragments);
        condition.cleanup();
        fragments
    }

    fn cycle(condition: &mut Condition, faults: &[(&str, &str)]) -> Vec<String> {
        condition.begin();
        for (code, message) in faults {
            condition.fault(*code, *message);
        }
        condition.prepare();
        drain(condition)
    }

    #[test]
    fn starts_unavailable() {
        let mut condition = Condition::new("cond");
        assert!(!condition.is_available());
        assert!(condition.has_changed());
        assert_eq!(drain(&mut condition), vec!["cond|UNAVAILABLE||||"]);
    }

    #[test]
    fn normal_is_reported_once() {
        let mut condition = Condition::new("cond");
        drain(&mut condition);
        assert!(condition.normal());
        assert!(!condition.normal());
        assert_eq!(drain(&mut condition), vec!["cond|NORMAL||||"]);
        assert!(drain(&mut condition).is_empty());
    }

    #[test]
    fn fault_then_not_reasserted_reverts_to_normal() {
        let mut condition = Condition::new("cond");
        condition.normal();
        drain(&mut condition);

        assert_eq!(
            cycle(&mut condition, &[("111", "A Fault")]),
            vec!["cond|FAULT|111|||A Fault"]
        );
        assert_eq!(cycle(&mut condition, &[]), vec!["cond|NORMAL||||"]);
        assert!(cycle(&mut condition, &[]).is_empty());
    }

    #[test]
    fn unasserted_code_is_swept_individually() {
        let mut condition = Condition::new("cond");
        condition.normal();
        drain(&mut condition);

        let first = cycle(
            &mut condition,
            &[("111", "A Fault"), ("112", "Another Fault")],
        );
        assert_eq!(
            first,
            vec!["cond|FAULT|111|||A Fault", "cond|FAULT|112|||Another Fault"]
        );

        let second = cycle(&mut condition, &[("112", "Another Fault")]);
        assert_eq!(second, vec!["cond|NORMAL|111|||"]);
        assert!(condition.activation("111").is_none());
        assert!(condition.activation("112").is_some());

        assert_eq!(cycle(&mut condition, &[]), vec!["cond|NORMAL||||"]);
    }

    #[test]
    fn simultaneous_clears_are_not_merged() {
        let mut condition = Condition::new("cond");
        cycle(
            &mut condition,
            &[("1", "a"), ("2", "b"), ("3", "c")],
        );
        let swept = cycle(&mut condition, &[("3", "c")]);
        assert_eq!(swept, vec!["cond|NORMAL|1|||", "cond|NORMAL|2|||"]);
    }

    #[test]
    fn reasserting_same_fault_reports_nothing() {
        let mut condition = Condition::new("cond");
        cycle(&mut condition, &[("111", "A Fault")]);
        assert!(cycle(&mut condition, &[("111", "A Fault")]).is_empty());
        assert_eq!(
            cycle(&mut condition, &[("111", "Worse")]),
            vec!["cond|FAULT|111|||Worse"]
        );
    }

    #[test]
    fn warning_renders_all_fields() {
        let mut condition = Condition::with_device("mill", "temp", false);
        condition.add(
            Activation::new(ConditionLevel::Warning)
                .with_code("T1")
                .with_severity("2")
                .with_qualifier(ConditionQualifier::High)
                .with_message("Too hot"),
        );
        assert_eq!(drain(&mut condition), vec!["mill:temp|WARNING|T1|2|HIGH|Too hot"]);
    }

    #[test]
    fn nothing_reported_mid_sweep() {
        let mut condition = Condition::new("cond");
        drain(&mut condition);
        condition.begin();
        condition.fault("1", "x");
        let mut fragments = Vec::new();
        condition.add_to_update(&mut fragments);
        assert!(fragments.is_empty());
        condition.prepare();
        condition.add_to_update(&mut fragments);
        assert_eq!(fragments, vec!["cond|FAULT|1|||x"]);
    }

    #[test]
    fn simple_condition_never_auto_clears() {
        let mut condition = Condition::simple("cond");
        condition.normal();
        drain(&mut condition);
        condition.fault("111", "A Fault");
        assert_eq!(drain(&mut condition), vec!["cond|FAULT|111|||A Fault"]);

        for _ in 0..3 {
            assert!(cycle(&mut condition, &[]).is_empty());
        }
        assert!(condition.activation("111").is_some());
    }

    #[test]
    fn clearing_last_activation_collapses_to_normal() {
        let mut condition = Condition::simple("cond");
        condition.fault("111", "A Fault");
        drain(&mut condition);
        assert!(condition.clear("111").unwrap());
        assert_eq!(drain(&mut condition), vec!["cond|NORMAL||||"]);
    }

    #[test]
    fn clearing_one_of_two_reports_only_that_code() {
        let mut condition = Condition::simple("cond");
        condition.fault("111", "A Fault");
        condition.fault("112", "Another Fault");
        drain(&mut condition);

        assert!(condition.clear("111").unwrap());
        assert_eq!(drain(&mut condition), vec!["cond|NORMAL|111|||"]);
        assert!(condition.activation("111").is_none());

        assert!(!condition.clear("999").unwrap());
        assert!(condition.clear("112").unwrap());
        assert_eq!(drain(&mut condition), vec!["cond|NORMAL||||"]);
    }

    #[test]
    fn clearing_both_in_one_cycle_never_leaves_an_empty_set() {
        let mut condition = Condition::simple("cond");
        condition.fault("1", "a");
        condition.fault("2", "b");
        drain(&mut condition);
        condition.clear("1").unwrap();
        condition.clear("2").unwrap();
        assert_eq!(drain(&mut condition), vec!["cond|NORMAL||||"]);
        assert_eq!(condition.activations().len(), 1);
    }

    #[test]
    fn clear_on_swept_condition_is_a_contract_violation() {
        let mut condition = Condition::new("cond");
        let err = condition.clear("1").unwrap_err();
        assert_eq!(
            err,
            DatumError::NotSimple {
                condition: "cond".to_owned()
            }
        );
    }

    #[test]
    fn placeholder_never_coexists_with_coded() {
        let mut condition = Condition::new("cond");
        condition.normal();
        condition.fault("1", "x");
        assert_eq!(condition.activations().len(), 1);
        assert_eq!(condition.activations()[0].native_code, "1");
        condition.normal();
        assert_eq!(condition.activations().len(), 1);
        assert!(condition.activations()[0].is_placeholder());
    }

    #[test]
    fn set_unavailable_collapses_activations() {
        let mut condition = Condition::new("cond");
        condition.fault("1", "x");
        drain(&mut condition);
        condition.set_unavailable();
        assert!(!condition.is_available());
        assert_eq!(drain(&mut condition), vec!["cond|UNAVAILABLE||||"]);
    }

    #[test]
    fn levels_and_qualifiers_parse_case_insensitively() {
        assert_eq!(ConditionLevel::parse("fault").unwrap(), ConditionLevel::Fault);
        assert_eq!(ConditionQualifier::parse("High").unwrap(), ConditionQualifier::High);
        assert_eq!(
            ConditionLevel::parse("bad"),
            Err(DatumError::UnknownLevel("bad".to_owned()))
        );
    }

    #[test]
    fn full_render_has_no_side_effects() {
        let mut condition = Condition::new("cond");
        condition.fault("1", "x");
        let mut fragments = Vec::new();
        condition.render_all(&mut fragments);
        assert_eq!(fragments, vec!["cond|FAULT|1|||x"]);
        assert!(condition.has_changed());
    }
}
