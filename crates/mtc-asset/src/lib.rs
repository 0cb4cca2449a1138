//! ---
//! mtc_section: "09-integration-interoperability"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Asset documents rendered as XML bodies."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
//! Asset documents sent over the adapter's multiline asset channel.
#![warn(missing_docs)]

pub mod cutting_tool;
pub mod xml;

use std::sync::Arc;

pub use cutting_tool::{CountDirection, CuttingItem, CuttingTool, LifeType, Measurement, ToolLife};
pub use xml::XmlWriter;

/// Shared result type for asset rendering.
pub type Result<T> = std::result::Result<T, AssetError>;

/// Errors raised while rendering an asset document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetError {
    /// An attribute was written after the element's content started.
    #[error("attribute '{0}' written outside of an open start tag")]
    MisplacedAttribute(String),
    /// `end` was called with no open element.
    #[error("end of element requested with no open element")]
    UnbalancedEnd,
    /// The document was finished with elements still open.
    #[error("element '{0}' was never closed")]
    UnclosedElement(String),
}

/// A document describing a physical asset such as a cutting tool.
pub trait Asset: Send + Sync {
    /// Unique asset identifier.
    fn asset_id(&self) -> &str;

    /// Asset type, also the name of the root element.
    fn asset_type(&self) -> &str;

    /// Write the asset's root element and its children.
    fn write_xml(&self, writer: &mut XmlWriter);

    /// Render the asset as a self-contained XML body without declaration.
    fn to_xml(&self) -> Result<String> {
        let mut writer = XmlWriter::new();
        self.write_xml(&mut writer);
        writer.finish()
    }
}

/// Shared handle to an asset.
pub type AssetRef = Arc<dyn Asset>;

/// Asset whose XML body is supplied verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAsset {
    asset_id: String,
    asset_type: String,
    body: String,
}

impl XmlAsset {
    /// Wrap a pre-rendered XML body.
    pub fn new(
        asset_id: impl Into<String>,
        asset_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            asset_type: asset_type.into(),
            body: body.into(),
        }
    }
}

impl Asset for XmlAsset {
    fn asset_id(&self) -> &str {
        &self.asset_id
    }

    fn asset_type(&self) -> &str {
        &self.asset_type
    }

    fn write_xml(&self, writer: &mut XmlWriter) {
        writer.raw(&self.body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_asset_is_passed_through() {
        let asset = XmlAsset::new("A1", "Part", "<Part assetId=\"A1\"/>");
        assert_eq!(asset.to_xml().unwrap(), "<Part assetId=\"A1\"/>");
        assert_eq!(asset.asset_type(), "Part");
    }
}
