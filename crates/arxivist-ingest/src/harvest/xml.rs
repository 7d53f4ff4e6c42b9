//! Namespace-free XML element tree
//!
//! OAI-PMH responses mix the protocol namespace with one namespace per
//! metadata format. Names here are reduced to their local part so callers
//! can address `record/header/datestamp` without caring about prefixes.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Concatenated, unescaped text and CDATA content
    pub text: String,
}

impl Element {
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the first child called `name`, if present and non-empty.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.as_str())
            .filter(|t| !t.is_empty())
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Walk a path of child names from this element.
    pub fn find(&self, path: &[&str]) -> Option<&Element> {
        path.iter().try_fold(self, |el, name| el.child(name))
    }

    /// JSON view of the element.
    ///
    /// Leaf elements become strings; otherwise attributes are stored under
    /// `@name`, text under `#text`, and repeated children become arrays.
    pub fn to_json(&self) -> Value {
        if self.children.is_empty() && self.attributes.is_empty() {
            return Value::String(self.text.clone());
        }

        let mut map = Map::new();
        for (key, value) in &self.attributes {
            map.insert(format!("@{}", key), Value::String(value.clone()));
        }
        if !self.text.is_empty() {
            map.insert("#text".to_string(), Value::String(self.text.clone()));
        }

        for child in &self.children {
            let value = child.to_json();
            match map.get_mut(&child.name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                },
                None => {
                    map.insert(child.name.clone(), value);
                },
            }
        }

        Value::Object(map)
    }
}

fn local(name: &[u8]) -> Result<String> {
    std::str::from_utf8(name)
        .map(str::to_string)
        .map_err(|e| IngestError::malformed(format!("non UTF-8 XML name: {}", e)))
}

fn open(start: &BytesStart<'_>) -> Result<Element> {
    let mut element = Element {
        name: local(start.local_name().as_ref())?,
        ..Element::default()
    };

    for attr in start.attributes() {
        let attr = attr.map_err(|e| IngestError::malformed(format!("XML attribute: {}", e)))?;
        let raw = attr.key.as_ref();
        if raw == b"xmlns" || raw.starts_with(b"xmlns:") {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|e| IngestError::malformed(format!("XML attribute value: {}", e)))?;
        element
            .attributes
            .push((local(attr.key.local_name().as_ref())?, value.into_owned()));
    }

    Ok(element)
}

fn close(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(IngestError::malformed("XML document has more than one root")),
    }
    Ok(())
}

/// Parse a document into its root element.
pub fn parse(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(open(&start)?),
            Ok(Event::Empty(start)) => {
                let element = open(&start)?;
                close(&mut stack, &mut root, element)?;
            },
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| IngestError::malformed("unbalanced XML end tag"))?;
                close(&mut stack, &mut root, element)?;
            },
            Ok(Event::Text(text)) => {
                if let Some(current) = stack.last_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| IngestError::malformed(format!("XML text: {}", e)))?;
                    current.text.push_str(&text);
                }
            },
            Ok(Event::CData(data)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data));
                }
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => {
                return Err(IngestError::malformed(format!(
                    "XML error at position {}: {}",
                    reader.error_position(),
                    e
                )))
            },
        }
    }

    if !stack.is_empty() {
        return Err(IngestError::malformed("XML document ended inside an element"));
    }
    root.ok_or_else(|| IngestError::malformed("empty XML document"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<oai:record xmlns:oai="http://www.openarchives.org/OAI/2.0/">
  <oai:header status="active">
    <oai:identifier>oai:arXiv.org:2101.00001</oai:identifier>
    <oai:datestamp>2021-01-04</oai:datestamp>
  </oai:header>
  <oai:metadata>
    <arXivRaw xmlns="http://arxiv.org/OAI/arXivRaw/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
      <id>2101.00001</id>
      <title>Graphs &amp; Things</title>
      <abstract><![CDATA[We show that a < b.]]></abstract>
      <version version="v1"><date>Mon, 4 Jan 2021</date></version>
      <version version="v2"><date>Tue, 5 Jan 2021</date></version>
      <categories>cs.LG stat.ML</categories>
    </arXivRaw>
  </oai:metadata>
</oai:record>"#;

    #[test]
    fn test_prefixes_are_stripped() {
        let root = parse(RECORD).unwrap();
        assert_eq!(root.name, "record");
        assert_eq!(
            root.find(&["header", "datestamp"]).map(|e| e.text.as_str()),
            Some("2021-01-04")
        );
        assert_eq!(root.child("header").unwrap().attr("status"), Some("active"));
    }

    #[test]
    fn test_namespace_declarations_are_dropped() {
        let root = parse(RECORD).unwrap();
        let raw = root.find(&["metadata", "arXivRaw"]).unwrap();
        assert!(raw.attributes.is_empty());
    }

    #[test]
    fn test_text_and_cdata_are_unescaped() {
        let root = parse(RECORD).unwrap();
        let raw = root.find(&["metadata", "arXivRaw"]).unwrap();
        assert_eq!(raw.child_text("title"), Some("Graphs & Things"));
        assert_eq!(raw.child_text("abstract"), Some("We show that a < b."));
    }

    #[test]
    fn test_to_json_groups_repeated_children() {
        let root = parse(RECORD).unwrap();
        let raw = root.find(&["metadata", "arXivRaw"]).unwrap();
        let value = raw.to_json();

        assert_eq!(value["id"], json!("2101.00001"));
        assert_eq!(value["version"][0]["@version"], json!("v1"));
        assert_eq!(value["version"][1]["date"], json!("Tue, 5 Jan 2021"));
    }

    #[test]
    fn test_mismatched_tags_are_malformed() {
        let err = parse("<a><b></a>").unwrap_err();
        assert!(matches!(err, IngestError::Malformed(_)));
    }

    #[test]
    fn test_empty_document_is_malformed() {
        assert!(matches!(parse("   "), Err(IngestError::Malformed(_))));
    }
}
