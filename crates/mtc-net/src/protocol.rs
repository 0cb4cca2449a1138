//! ---
//! mtc_section: "05-networking-external-interfaces"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Line-oriented adapter server and wire protocol."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
//! Wire encoders for the adapter-to-agent line protocol.
use strum::{AsRefStr, Display, EnumIter, EnumString};

use mtc_asset::Asset;

/// Prefix of a heartbeat request sent by the agent.
pub const PING: &str = "* PING";
/// Boundary marker wrapping multiline asset bodies.
pub const MULTILINE_MARKER: &str = "--multiline--ABCD";
/// Longest inbound line kept before it is discarded as garbage.
pub const MAX_INBOUND_LINE: usize = 4096;

/// Device properties that can be pushed to the agent as `* name: value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum DeviceCommand {
    /// Device manufacturer.
    Manufacturer,
    /// Station identifier.
    Station,
    /// Device serial number.
    SerialNumber,
    /// Free text description.
    Description,
    /// Native controller name.
    NativeName,
    /// Calibration data.
    Calibration,
    /// Whether unit conversion is required.
    ConversionRequired,
    /// Whether timestamps are relative.
    RelativeTime,
    /// Whether timestamps are real time.
    RealTime,
    /// Device name binding.
    Device,
    /// Device UUID.
    #[strum(serialize = "uuid")]
    Uuid,
}

/// `* PONG <ms>` reply advertising the heartbeat interval.
pub fn pong_line(heartbeat_ms: u64) -> String {
    format!("* PONG {heartbeat_ms}\n")
}

/// `* <command>: <value>`
pub fn command_line(command: DeviceCommand, value: &str) -> String {
    format!("* {}: {}\n", command, value)
}

/// Data line carrying packed fragments behind a timestamp.
pub fn data_line(timestamp: &str, fragments: &[String]) -> String {
    let mut line = String::with_capacity(timestamp.len() + 1 + fragments.len() * 16);
    line.push_str(timestamp);
    for fragment in fragments {
        line.push('|');
        line.push_str(fragment);
    }
    line.push('\n');
    line
}

/// Multiline asset frame announcing a new or updated asset.
pub fn asset_add_frame(timestamp: &str, asset: &dyn Asset) -> mtc_asset::Result<String> {
    let body = asset.to_xml()?;
    Ok(format!(
        "{timestamp}|@ASSET@|{}|{}|{MULTILINE_MARKER}\n{body}\n{MULTILINE_MARKER}\n",
        asset.asset_id(),
        asset.asset_type(),
    ))
}

/// Frame retiring an asset.
pub fn asset_remove_frame(timestamp: &str, asset_id: &str) -> String {
    format!("{timestamp}|@REMOVE_ASSET@|{asset_id}\n")
}

/// Whether an inbound line is a heartbeat request.
pub fn is_ping(line: &str) -> bool {
    line.starts_with(PING)
}

/// Reassembles newline-terminated lines from arbitrary read chunks.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk and return every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let raw = std::mem::take(&mut self.pending);
                let text = String::from_utf8_lossy(&raw);
                lines.push(text.trim_end_matches('\r').to_owned());
            } else if self.pending.len() < MAX_INBOUND_LINE {
                self.pending.push(byte);
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtc_asset::XmlAsset;
    use strum::IntoEnumIterator;

    #[test]
    fn command_names_follow_agent_vocabulary() {
        let names: Vec<String> = DeviceCommand::iter().map(|c| c.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "manufacturer",
                "station",
                "serialNumber",
                "description",
                "nativeName",
                "calibration",
                "conversionRequired",
                "relativeTime",
                "realTime",
                "device",
                "uuid",
            ]
        );
        assert_eq!(
            command_line(DeviceCommand::SerialNumber, "SN-1"),
            "* serialNumber: SN-1\n"
        );
    }

    #[test]
    fn data_line_joins_fragments() {
        let fragments = vec!["avail|AVAILABLE".to_owned(), "estop|ARMED".to_owned()];
        assert_eq!(
            data_line("2024-01-01T00:00:00.0000000Z", &fragments),
            "2024-01-01T00:00:00.0000000Z|avail|AVAILABLE|estop|ARMED\n"
        );
    }

    #[test]
    fn asset_frames_are_wrapped() {
        let asset = XmlAsset::new("T1", "CuttingTool", "<CuttingTool assetId=\"T1\"/>");
        assert_eq!(
            asset_add_frame("TS", &asset).unwrap(),
            "TS|@ASSET@|T1|CuttingTool|--multiline--ABCD\n<CuttingTool assetId=\"T1\"/>\n--multiline--ABCD\n"
        );
        assert_eq!(asset_remove_frame("TS", "T1"), "TS|@REMOVE_ASSET@|T1\n");
    }

    #[test]
    fn splitter_handles_partial_and_crlf_lines() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"* PI").is_empty());
        assert_eq!(splitter.push(b"NG\r\nhello\n* P"), vec!["* PING", "hello"]);
        assert_eq!(splitter.push(b"ING\n"), vec!["* PING"]);
        assert!(is_ping("* PING"));
        assert!(!is_ping("PING"));
    }

    #[test]
    fn splitter_truncates_runaway_lines() {
        let mut splitter = LineSplitter::default();
        let garbage = vec![b'x'; MAX_INBOUND_LINE * 2];
        assert!(splitter.push(&garbage).is_empty());
        let lines = splitter.push(b"\n");
        assert_eq!(lines[0].len(), MAX_INBOUND_LINE);
    }
}
