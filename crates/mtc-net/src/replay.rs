//! ---
//! mtc_section: "05-networking-external-interfaces"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Line-oriented adapter server and wire protocol."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
use mtc_asset::AssetRef;
use tracing::warn;

use crate::protocol::{asset_add_frame, asset_remove_frame, command_line, DeviceCommand};

/// Durable commands and asset changes handed to every new connection.
#[derive(Default)]
pub struct ReplayLog {
    commands: Vec<(DeviceCommand, String)>,
    assets_added: Vec<AssetRef>,
    assets_removed: Vec<String>,
}

impl ReplayLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_command(&mut self, command: DeviceCommand, value: impl Into<String>) {
        self.commands.push((command, value.into()));
    }

    pub fn record_asset(&mut self, asset: AssetRef) {
        self.assets_added.push(asset);
    }

    pub fn record_removal(&mut self, asset_id: impl Into<String>) {
        self.assets_removed.push(asset_id.into());
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.assets_added.is_empty() && self.assets_removed.is_empty()
    }

    /// Frames in replay order: commands, asset adds, then asset removals.
    pub fn frames(&self, timestamp: &str) -> Vec<String> {
        let mut frames = Vec::with_capacity(
            self.commands.len() + self.assets_added.len() + self.assets_removed.len(),
        );
        frames.extend(
            self.commands
                .iter()
                .map(|(command, value)| command_line(*command, value)),
        );
        for asset in &self.assets_added {
            match asset_add_frame(timestamp, asset.as_ref()) {
                Ok(frame) => frames.push(frame),
                Err(err) => {
                    warn!(asset = asset.asset_id(), error = %err, "skipping asset that no longer renders")
                }
            }
        }
        frames.extend(
            self.assets_removed
                .iter()
                .map(|asset_id| asset_remove_frame(timestamp, asset_id)),
        );
        frames
    }
}
