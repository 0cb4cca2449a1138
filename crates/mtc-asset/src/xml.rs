//! ---
//! mtc_section: "09-integration-interoperability"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Asset documents rendered as XML bodies."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
use crate::{AssetError, Result};

/// Minimal streaming XML writer producing a body without declaration.
#[derive(Debug, Default)]
pub struct XmlWriter {
    out: String,
    open: Vec<String>,
    in_start_tag: bool,
    error: Option<AssetError>,
}

impl XmlWriter {
    /// Empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an element.
    pub fn start(&mut self, name: &str) -> &mut Self {
        self.close_start_tag();
        self.out.push('<');
        self.out.push_str(name);
        self.open.push(name.to_owned());
        self.in_start_tag = true;
        self
    }

    /// Add an attribute to the element just opened.
    pub fn attr(&mut self, name: &str, value: &str) -> &mut Self {
        if !self.in_start_tag {
            self.fail(AssetError::MisplacedAttribute(name.to_owned()));
            return self;
        }
        self.out.push(' ');
        self.out.push_str(name);
        self.out.push_str("=\"");
        escape_into(&mut self.out, value, true);
        self.out.push('"');
        self
    }

    /// Add an attribute only when a value is present.
    pub fn attr_opt(&mut self, name: &str, value: Option<&str>) -> &mut Self {
        match value {
            Some(value) => self.attr(name, value),
            None => self,
        }
    }

    /// Escaped character data.
    pub fn text(&mut self, text: &str) -> &mut Self {
        self.close_start_tag();
        escape_into(&mut self.out, text, false);
        self
    }

    /// Pre-rendered markup copied verbatim.
    pub fn raw(&mut self, markup: &str) -> &mut Self {
        self.close_start_tag();
        self.out.push_str(markup);
        self
    }

    /// Close the innermost open element.
    pub fn end(&mut self) -> &mut Self {
        let Some(name) = self.open.pop() else {
            self.fail(AssetError::UnbalancedEnd);
            return self;
        };
        if self.in_start_tag {
            self.out.push_str("/>");
            self.in_start_tag = false;
        } else {
            self.out.push_str("</");
            self.out.push_str(&name);
            self.out.push('>');
        }
        self
    }

    /// Element holding only text.
    pub fn element(&mut self, name: &str, text: &str) -> &mut Self {
        self.start(name).text(text).end()
    }

    /// Return the document, or the first structural error encountered.
    pub fn finish(mut self) -> Result<String> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if let Some(name) = self.open.pop() {
            return Err(AssetError::UnclosedElement(name));
        }
        Ok(self.out)
    }

    fn close_start_tag(&mut self) {
        if self.in_start_tag {
            self.out.push('>');
            self.in_start_tag = false;
        }
    }

    fn fail(&mut self, err: AssetError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

fn escape_into(out: &mut String, text: &str, attribute: bool) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\n' if attribute => out.push_str("&#10;"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_nested_elements_and_self_closing_tags() {
        let mut writer = XmlWriter::new();
        writer
            .start("Root")
            .attr("id", "1")
            .element("Name", "a & b")
            .start("Empty")
            .end()
            .end();
        assert_eq!(
            writer.finish().unwrap(),
            "<Root id=\"1\"><Name>a &amp; b</Name><Empty/></Root>"
        );
    }

    #[test]
    fn escapes_quotes_in_attributes_only() {
        let mut writer = XmlWriter::new();
        writer.start("A").attr("q", "say \"hi\"").text("\"ok\"").end();
        assert_eq!(
            writer.finish().unwrap(),
            "<A q=\"say &quot;hi&quot;\">\"ok\"</A>"
        );
    }

    #[test]
    fn reports_structural_errors() {
        let mut unclosed = XmlWriter::new();
        unclosed.start("A");
        assert_eq!(
            unclosed.finish(),
            Err(AssetError::UnclosedElement("A".to_owned()))
        );

        let mut misplaced = XmlWriter::new();
        misplaced.start("A").text("x").attr("late", "1").end();
        assert_eq!(
            misplaced.finish(),
            Err(AssetError::MisplacedAttribute("late".to_owned()))
        );

        let mut unbalanced = XmlWriter::new();
        unbalanced.end();
        assert_eq!(unbalanced.finish(), Err(AssetError::UnbalancedEnd));
    }
}
