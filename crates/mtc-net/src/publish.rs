//! ---
//! mtc_section: "05-networking-external-interfaces"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Line-oriented adapter server and wire protocol."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
//! Composition of tracked datums into protocol lines.
use std::sync::Arc;

use parking_lot::Mutex;

use mtc_datum::Datum;

use crate::protocol::data_line;

/// Datum shared between application code and the adapter.
pub type SharedDatum = Arc<Mutex<dyn Datum>>;

/// Which datums contribute to a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Only datums whose change flag is raised; consumes the flags.
    Changed,
    /// Every datum, without touching change flags.
    Full,
}

/// Build the lines for one publish at `timestamp`.
///
/// Packable fragments share the first line in tracked order. Each fragment of
/// a separate-line datum gets its own line after that. A line is only emitted
/// when it carries at least one fragment.
pub fn compose(datums: &[SharedDatum], mode: PublishMode, timestamp: &str) -> Vec<String> {
    let mut packed = Vec::new();
    let mut standalone = Vec::new();

    for datum in datums {
        let mut datum = datum.lock();
        let target = if datum.separate_line() {
            &mut standalone
        } else {
            &mut packed
        };
        match mode {
            PublishMode::Changed => datum.add_to_update(target),
            PublishMode::Full => datum.render_all(target),
        }
    }

    let mut lines = Vec::with_capacity(1 + standalone.len());
    if !packed.is_empty() {
        lines.push(data_line(timestamp, &packed));
    }
    for fragment in standalone {
        lines.push(data_line(timestamp, std::slice::from_ref(&fragment)));
    }
    lines
}

/// Close the reporting cycle on every datum.
pub fn cleanup(datums: &[SharedDatum]) {
    for datum in datums {
        datum.lock().cleanup();
    }
}

/// Open a reporting cycle on every datum.
pub fn begin(datums: &[SharedDatum]) {
    for datum in datums {
        datum.lock().begin();
    }
}

/// Close the collection phase on every datum.
pub fn prepare(datums: &[SharedDatum]) {
    for datum in datums {
        datum.lock().prepare();
    }
}
