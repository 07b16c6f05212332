//! Minimal element tree built on top of `quick-xml` events.
//!
//! Experiment files are small, so they are read into a tree first and then
//! interpreted, instead of driving the value parser directly from the event
//! stream.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

/// Header written at the top of every document produced by this crate.
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Concatenated character data (text and CDATA) found directly inside
    /// this element.
    pub text: String,
}

impl Element {
    /// Parses a document and returns its root element.
    pub fn parse(document: &str) -> Result<Element> {
        let mut reader = Reader::from_str(document);
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(Element::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Element::from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => set_root(&mut root, element)?,
                    }
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        Error::XmlError("unexpected closing tag".to_string())
                    })?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => set_root(&mut root, element)?,
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        let bytes = data.into_inner();
                        current.text.push_str(&String::from_utf8_lossy(&bytes));
                    }
                }
                Event::Eof => break,
                _ => (),
            }
        }

        if !stack.is_empty() {
            return Err(Error::XmlError(format!(
                "unexpected end of document inside <{}>",
                stack.last().map(|e| e.name.as_str()).unwrap_or_default()
            )));
        }
        root.ok_or_else(|| Error::XmlError("document has no root element".to_string()))
    }

    fn from_start(start: &BytesStart) -> Result<Element> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Element {
            name,
            attributes,
            children: Vec::new(),
            text: String::new(),
        })
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn required_attr(&self, key: &str) -> Result<&str> {
        self.attr(key).ok_or_else(|| {
            Error::XmlError(format!("<{}> is missing attribute '{}'", self.name, key))
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Returns an error unless this element carries the given tag name.
    pub fn expect_name(&self, name: &str) -> Result<()> {
        if self.name == name {
            Ok(())
        } else {
            Err(Error::XmlError(format!(
                "expected <{}>, found <{}>",
                name, self.name
            )))
        }
    }
}

fn set_root(root: &mut Option<Element>, element: Element) -> Result<()> {
    if root.is_some() {
        return Err(Error::XmlError(
            "document has more than one root element".to_string(),
        ));
    }
    *root = Some(element);
    Ok(())
}

/// Escapes text for use in element content or attribute values.
pub fn escape(text: &str) -> Cow<str> {
    quick_xml::escape::escape(text)
}

/// Wraps arbitrary markup in a CDATA section, splitting any embedded
/// section terminator.
pub fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}
