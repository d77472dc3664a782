//! XML structural tree builder.
//!
//! Syndication formats disagree wildly about shape, so the pipeline first
//! lowers raw XML into a uniform nested tree and lets the format-specific
//! extractors navigate it by name. Element names keep their namespace
//! prefix (`content:encoded`, `dc:creator`, `rdf:RDF`) so extractors can
//! match on the qualified name directly. CDATA sections are tagged on the
//! receiving node so downstream text unwrapping can distinguish them.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Nesting depth cap for feed documents. Real feeds are a handful of
/// levels deep; anything past this is a hostile or broken document.
const MAX_XML_DEPTH: usize = 200;

/// Errors raised while parsing a feed document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The XML document itself could not be parsed.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// Element nesting exceeds [`MAX_XML_DEPTH`].
    #[error("XML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// The document parsed, but its root matches none of the supported
    /// syndication signatures (RSS 2.0, Atom, RDF/RSS 1.0).
    #[error("Unable to parse feed: unsupported format")]
    UnsupportedFormat,
}

/// One element in the structural tree.
///
/// Children are stored as an ordered name/node list rather than a map so
/// repeated elements (`<item>`, `<link>`, `<entry>`) are preserved; the
/// accessors present them as either "first by name" or "all by name".
#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub attrs: HashMap<String, String>,
    pub children: Vec<(String, XmlNode)>,
    pub text: Option<String>,
    /// True when any of this node's text arrived as a CDATA section.
    pub cdata: bool,
}

impl XmlNode {
    /// First child element with the given qualified name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
    }

    /// All child elements with the given qualified name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, node)| node)
    }

    /// Attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Trimmed element text, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    fn append_text(&mut self, fragment: &str) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return;
        }
        match &mut self.text {
            Some(existing) => {
                existing.push(' ');
                existing.push_str(fragment);
            }
            None => self.text = Some(fragment.to_string()),
        }
    }
}

/// Parses an XML document into a structural tree.
///
/// The returned node is a synthetic root whose children are the document's
/// top-level elements, so format detection can probe for `rss`, `feed`, or
/// `rdf:RDF` uniformly.
///
/// Entity handling is quick-xml's builtin five predefined entities only;
/// custom DOCTYPE entities are never expanded.
pub fn parse_document(xml: &str) -> Result<XmlNode, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root = XmlNode::default();
    // Stack of open elements; the synthetic root sits at the bottom.
    let mut stack: Vec<(String, XmlNode)> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if stack.len() >= MAX_XML_DEPTH {
                    return Err(ParseError::MaxDepthExceeded(MAX_XML_DEPTH));
                }
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut node = XmlNode::default();
                read_attributes(&e, &reader, &mut node);
                stack.push((name, node));
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut node = XmlNode::default();
                read_attributes(&e, &reader, &mut node);
                attach(&mut root, &mut stack, name, node);
            }
            Ok(Event::End(_)) => {
                // quick-xml validates start/end pairing; an End with an
                // empty stack is unreachable for well-formed input.
                if let Some((name, node)) = stack.pop() {
                    attach(&mut root, &mut stack, name, node);
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                if let Some((_, node)) = stack.last_mut() {
                    node.append_text(&text);
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                if let Some((_, node)) = stack.last_mut() {
                    node.append_text(&text);
                    node.cdata = true;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
    }

    if root.children.is_empty() {
        return Err(ParseError::Xml("document has no root element".into()));
    }

    Ok(root)
}

fn read_attributes(e: &quick_xml::events::BytesStart<'_>, reader: &Reader<&[u8]>, node: &mut XmlNode) {
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed XML attribute");
                continue;
            }
        };
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(value) => {
                node.attrs.insert(key, value.into_owned());
            }
            Err(e) => {
                tracing::debug!(attr = %key, error = %e, "Skipping undecodable attribute value");
            }
        }
    }
}

fn attach(root: &mut XmlNode, stack: &mut [(String, XmlNode)], name: String, node: XmlNode) {
    match stack.last_mut() {
        Some((_, parent)) => parent.children.push((name, node)),
        None => root.children.push((name, node)),
    }
}
