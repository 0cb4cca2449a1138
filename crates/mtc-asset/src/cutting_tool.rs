//! ---
//! mtc_section: "09-integration-interoperability"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Asset documents rendered as XML bodies."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
use strum::{AsRefStr, Display};

use crate::{Asset, XmlWriter};

/// Unit a tool life is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LifeType {
    /// Cutting minutes.
    Minutes,
    /// Machined parts.
    PartCount,
    /// Measured wear.
    Wear,
}

/// Whether the life counter increments or decrements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum CountDirection {
    /// Counts up towards the limit.
    Up,
    /// Counts down towards zero.
    Down,
}

/// Life counter of a tool or cutting item.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolLife {
    /// Counting unit.
    pub life_type: LifeType,
    /// Counting direction.
    pub direction: CountDirection,
    /// Current value.
    pub value: String,
    /// Initial value.
    pub initial: Option<String>,
    /// Limit value.
    pub limit: Option<String>,
    /// Warning threshold.
    pub warning: Option<String>,
}

impl ToolLife {
    /// Life counter with only the current value.
    pub fn new(life_type: LifeType, direction: CountDirection, value: impl Into<String>) -> Self {
        Self {
            life_type,
            direction,
            value: value.into(),
            initial: None,
            limit: None,
            warning: None,
        }
    }

    /// Add initial and limit values.
    pub fn with_bounds(mut self, initial: impl Into<String>, limit: impl Into<String>) -> Self {
        self.initial = Some(initial.into());
        self.limit = Some(limit.into());
        self
    }

    /// Add a warning threshold.
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    fn write(&self, element: &str, writer: &mut XmlWriter) {
        writer
            .start(element)
            .attr("type", self.life_type.as_ref())
            .attr("countDirection", self.direction.as_ref())
            .attr_opt("initial", self.initial.as_deref())
            .attr_opt("limit", self.limit.as_deref())
            .attr_opt("warning", self.warning.as_deref())
            .text(&self.value)
            .end();
    }
}

/// Typed dimensional measurement such as `FunctionalLength`.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Element name.
    pub kind: String,
    /// Short code, e.g. `LF`.
    pub code: String,
    /// Measured value.
    pub value: f64,
    /// Nominal value.
    pub nominal: Option<f64>,
    /// Lower tolerance.
    pub minimum: Option<f64>,
    /// Upper tolerance.
    pub maximum: Option<f64>,
    /// Units of the measurement.
    pub units: Option<String>,
}

impl Measurement {
    /// Measurement with only a value.
    pub fn new(kind: impl Into<String>, code: impl Into<String>, value: f64) -> Self {
        Self {
            kind: kind.into(),
            code: code.into(),
            value,
            nominal: None,
            minimum: None,
            maximum: None,
            units: None,
        }
    }

    /// Add nominal and tolerance range.
    pub fn with_range(mut self, nominal: f64, minimum: f64, maximum: f64) -> Self {
        self.nominal = Some(nominal);
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    /// Add units.
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    fn write(&self, writer: &mut XmlWriter) {
        let nominal = self.nominal.map(|v| v.to_string());
        let minimum = self.minimum.map(|v| v.to_string());
        let maximum = self.maximum.map(|v| v.to_string());
        writer
            .start(&self.kind)
            .attr("code", &self.code)
            .attr_opt("nominal", nominal.as_deref())
            .attr_opt("minimum", minimum.as_deref())
            .attr_opt("maximum", maximum.as_deref())
            .attr_opt("units", self.units.as_deref())
            .text(&self.value.to_string())
            .end();
    }
}

/// Element with attributes and a text value, e.g. `ProcessSpindleSpeed`.
#[derive(Debug, Clone, PartialEq)]
struct Property {
    name: String,
    attributes: Vec<(String, String)>,
    value: String,
}

impl Property {
    fn write(&self, writer: &mut XmlWriter) {
        writer.start(&self.name);
        for (key, value) in &self.attributes {
            writer.attr(key, value);
        }
        writer.text(&self.value).end();
    }
}

fn write_measurements(measurements: &[Measurement], writer: &mut XmlWriter) {
    if measurements.is_empty() {
        return;
    }
    writer.start("Measurements");
    for measurement in measurements {
        measurement.write(writer);
    }
    writer.end();
}

/// Insert or other cutting edge mounted on a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct CuttingItem {
    indices: String,
    item_id: Option<String>,
    grade: Option<String>,
    manufacturers: Option<String>,
    description: Option<String>,
    properties: Vec<Property>,
    life: Vec<ToolLife>,
    measurements: Vec<Measurement>,
}

impl CuttingItem {
    /// Cutting item covering `indices`, e.g. `1-10`.
    pub fn new(indices: impl Into<String>) -> Self {
        Self {
            indices: indices.into(),
            item_id: None,
            grade: None,
            manufacturers: None,
            description: None,
            properties: Vec::new(),
            life: Vec::new(),
            measurements: Vec::new(),
        }
    }

    /// Set the item identifier.
    pub fn with_item_id(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    /// Set the grade.
    pub fn with_grade(mut self, grade: impl Into<String>) -> Self {
        self.grade = Some(grade.into());
        self
    }

    /// Set the manufacturers.
    pub fn with_manufacturers(mut self, manufacturers: impl Into<String>) -> Self {
        self.manufacturers = Some(manufacturers.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a text-only property element such as `Locus`.
    pub fn add_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.push(Property {
            name: name.into(),
            attributes: Vec::new(),
            value: value.into(),
        });
    }

    /// Add an item life counter.
    pub fn add_life(&mut self, life: ToolLife) {
        self.life.push(life);
    }

    /// Add a measurement.
    pub fn add_measurement(&mut self, measurement: Measurement) {
        self.measurements.push(measurement);
    }

    fn write(&self, writer: &mut XmlWriter) {
        writer
            .start("CuttingItem")
            .attr("indices", &self.indices)
            .attr_opt("itemId", self.item_id.as_deref())
            .attr_opt("grade", self.grade.as_deref())
            .attr_opt("manufacturers", self.manufacturers.as_deref());
        if let Some(description) = &self.description {
            writer.element("Description", description);
        }
        for property in &self.properties {
            property.write(writer);
        }
        for life in &self.life {
            life.write("ItemLife", writer);
        }
        write_measurements(&self.measurements, writer);
        writer.end();
    }
}

/// Cutting tool asset with its life cycle data.
#[derive(Debug, Clone, PartialEq)]
pub struct CuttingTool {
    asset_id: String,
    tool_id: String,
    serial_number: String,
    manufacturers: Option<String>,
    description: Option<String>,
    status: Vec<String>,
    life: Vec<ToolLife>,
    properties: Vec<Property>,
    measurements: Vec<Measurement>,
    items: Vec<CuttingItem>,
}

impl CuttingTool {
    /// Asset type and root element name.
    pub const ASSET_TYPE: &'static str = "CuttingTool";

    /// New tool with no life cycle data.
    pub fn new(
        asset_id: impl Into<String>,
        tool_id: impl Into<String>,
        serial_number: impl Into<String>,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            tool_id: tool_id.into(),
            serial_number: serial_number.into(),
            manufacturers: None,
            description: None,
            status: Vec::new(),
            life: Vec::new(),
            properties: Vec::new(),
            measurements: Vec::new(),
            items: Vec::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the manufacturers.
    pub fn with_manufacturers(mut self, manufacturers: impl Into<String>) -> Self {
        self.manufacturers = Some(manufacturers.into());
        self
    }

    /// Append cutter status values such as `USED` or `MEASURED`.
    pub fn add_status<I, S>(&mut self, status: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.status.extend(status.into_iter().map(Into::into));
    }

    /// Add a tool life counter.
    pub fn add_life(&mut self, life: ToolLife) {
        self.life.push(life);
    }

    /// Add a life cycle property such as `ProcessSpindleSpeed`.
    pub fn add_property<K, V>(
        &mut self,
        name: impl Into<String>,
        attributes: impl IntoIterator<Item = (K, V)>,
        value: impl Into<String>,
    ) where
        K: Into<String>,
        V: Into<String>,
    {
        self.properties.push(Property {
            name: name.into(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            value: value.into(),
        });
    }

    /// Add a tool measurement.
    pub fn add_measurement(&mut self, measurement: Measurement) {
        self.measurements.push(measurement);
    }

    /// Add a cutting item.
    pub fn add_item(&mut self, item: CuttingItem) {
        self.items.push(item);
    }
}

impl Asset for CuttingTool {
    fn asset_id(&self) -> &str {
        &self.asset_id
    }

    fn asset_type(&self) -> &str {
        Self::ASSET_TYPE
    }

    fn write_xml(&self, writer: &mut XmlWriter) {
        writer
            .start(Self::ASSET_TYPE)
            .attr("serialNumber", &self.serial_number)
            .attr("toolId", &self.tool_id)
            .attr("assetId", &self.asset_id)
            .attr_opt("manufacturers", self.manufacturers.as_deref());
        if let Some(description) = &self.description {
            writer.element("Description", description);
        }

        writer.start("CuttingToolLifeCycle");
        if !self.status.is_empty() {
            writer.start("CutterStatus");
            for status in &self.status {
                writer.element("Status", status);
            }
            writer.end();
        }
        for life in &self.life {
            life.write("ToolLife", writer);
        }
        for property in &self.properties {
            property.write(writer);
        }
        write_measurements(&self.measurements, writer);
        if !self.items.is_empty() {
            writer
                .start("CuttingItems")
                .attr("count", &self.items.len().to_string());
            for item in &self.items {
                item.write(writer);
            }
            writer.end();
        }
        writer.end();

        writer.end();
    }
}
