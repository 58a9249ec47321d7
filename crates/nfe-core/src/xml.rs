//! Generic XML element tree with tolerant deep search.
//!
//! NFe layouts differ between schema versions and emitters: fields move
//! between nesting levels, and some values live in attributes in one layout
//! and text nodes in another. Rather than modelling each variant, lookups
//! search the whole tree for a tag or attribute name and return the first
//! match in document order. Missing nodes are `None`, never an error.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::XmlError;

/// One element of a parsed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    /// Local name, without namespace prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Text directly inside this element, trimmed.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// This element and all its descendants, in document order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    /// First element named `tag`, searching this element and its subtree.
    pub fn find_first(&self, tag: &str) -> Option<&Element> {
        self.descendants().find(|e| e.name == tag)
    }

    /// Every element named `tag` in document order.
    pub fn find_all(&self, tag: &str) -> Vec<&Element> {
        self.descendants().filter(|e| e.name == tag).collect()
    }

    /// Non-empty text of the first element named `tag`.
    pub fn find_text(&self, tag: &str) -> Option<&str> {
        self.find_first(tag)
            .map(Element::text)
            .filter(|t| !t.is_empty())
    }

    /// Value of the first attribute named `attr` on any element.
    pub fn find_attr(&self, attr: &str) -> Option<&str> {
        self.descendants().find_map(|e| e.attr(attr))
    }

    /// Value of `attr` on the first element named `tag` that carries it.
    pub fn find_attr_on(&self, tag: &str, attr: &str) -> Option<&str> {
        self.descendants()
            .filter(|e| e.name == tag)
            .find_map(|e| e.attr(attr))
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, XmlError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();

        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| XmlError::Syntax(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| XmlError::Syntax(e.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            name,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }
}

/// Pre-order iterator over an element subtree.
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

/// Parse a whole document into its root element.
pub fn parse(text: &str) -> Result<Element, XmlError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Element::from_start(&e)?),
            Ok(Event::Empty(e)) => {
                let element = Element::from_start(&e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| XmlError::Syntax("unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| XmlError::Syntax(e.to_string()))?;
                push_text(&mut stack, text);
            }
            Ok(Event::CData(c)) => {
                let bytes = c.into_inner();
                push_text(&mut stack, String::from_utf8_lossy(&bytes));
            }
            Ok(Event::Eof) => break,
            // declarations, comments, processing instructions, doctype
            Ok(_) => {}
            Err(e) => {
                return Err(XmlError::Syntax(format!(
                    "at position {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }

    if let Some(open) = stack.pop() {
        return Err(XmlError::Unclosed(open.name));
    }

    root.ok_or(XmlError::Empty)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), XmlError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_some() {
        return Err(XmlError::MultipleRoots(element.name));
    } else {
        *root = Some(element);
    }
    Ok(())
}

fn push_text(stack: &mut [Element], text: Cow<'_, str>) {
    if let Some(top) = stack.last_mut() {
        top.text.push_str(&text);
    }
}
