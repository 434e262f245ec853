//! Owned XML tree built from quick-xml events.
//!
//! Feed extraction needs random access to children, attributes, inner text
//! and inner markup, so the event stream is folded into a small DOM first.

use super::decode::decode_feed;
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Maximum element nesting depth accepted by [`XmlDocument::parse`].
/// Bounds memory on maliciously nested documents.
pub const MAX_XML_DEPTH: usize = 256;

/// Errors raised while parsing a feed body as XML.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XmlError {
    #[error("XML syntax error: {0}")]
    Syntax(String),

    #[error("document has no root element")]
    MissingRoot,

    #[error("document has more than one root element (second root <{0}>)")]
    MultipleRoots(String),

    #[error("text content outside the root element")]
    TextOutsideRoot,

    #[error("element <{0}> is never closed")]
    Unclosed(String),

    #[error("nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("unsupported document encoding '{0}'")]
    UnknownEncoding(String),

    #[error("document is not valid {0}")]
    Decode(String),
}

/// A node in the tree. Comments and processing instructions are not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    CData(String),
}

/// An element with its qualified name (e.g. `rdf:RDF`), attributes in
/// document order and child nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of the attribute with the given qualified name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    /// Element children in document order, skipping text.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            _ => None,
        })
    }

    /// First element named `name`, searching this element and then its
    /// descendants in document order.
    pub fn find_first(&self, name: &str) -> Option<&XmlElement> {
        if self.name == name {
            return Some(self);
        }
        self.child_elements().find_map(|child| child.find_first(name))
    }

    /// Concatenated text of all descendant text and CDATA nodes.
    pub fn inner_text(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    /// Child markup re-serialized as XML.
    pub fn inner_xml(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            write_node(child, &mut out);
        }
        out
    }
}

fn collect_text(nodes: &[XmlNode], out: &mut String) {
    for node in nodes {
        match node {
            XmlNode::Text(text) | XmlNode::CData(text) => out.push_str(text),
            XmlNode::Element(el) => collect_text(&el.children, out),
        }
    }
}

fn write_node(node: &XmlNode, out: &mut String) {
    match node {
        XmlNode::Text(text) => out.push_str(&partial_escape(text.as_str())),
        XmlNode::CData(text) => {
            out.push_str("<![CDATA[");
            out.push_str(text);
            out.push_str("]]>");
        }
        XmlNode::Element(el) => {
            out.push('<');
            out.push_str(&el.name);
            for (key, value) in &el.attributes {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                out.push_str(&escape(value.as_str()));
                out.push('"');
            }
            if el.children.is_empty() {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in &el.children {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(&el.name);
            out.push('>');
        }
    }
}

/// A parsed document with exactly one root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    root: XmlElement,
}

impl XmlDocument {
    /// Decodes a raw body (see [`decode_feed`]) and parses it.
    pub fn from_bytes(bytes: &[u8], content_type: Option<&str>) -> Result<Self, XmlError> {
        let text = decode_feed(bytes, content_type)?;
        Self::parse(&text)
    }

    /// Parses `text` as a well-formed XML document.
    ///
    /// # Arguments
    ///
    /// * `text` - Decoded document text. Any `encoding` in the XML
    ///   declaration is ignored at this point.
    ///
    /// # Returns
    ///
    /// The document tree. Comments, processing instructions, the declaration
    /// and DOCTYPE are not kept.
    ///
    /// # Errors
    ///
    /// - [`XmlError::Syntax`] - Malformed markup, mismatched tags or bad escapes
    /// - [`XmlError::MissingRoot`] / [`XmlError::MultipleRoots`] - Not exactly one root element
    /// - [`XmlError::TextOutsideRoot`] - Non-whitespace text before or after the root
    /// - [`XmlError::Unclosed`] - Input ends inside an element
    /// - [`XmlError::MaxDepthExceeded`] - Nesting deeper than [`MAX_XML_DEPTH`]
    ///
    /// Entity declarations in a DOCTYPE are never expanded (quick-xml only
    /// resolves the five predefined entities and character references), so
    /// external-entity payloads fail with [`XmlError::Syntax`].
    pub fn parse(text: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(text);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    if stack.len() >= MAX_XML_DEPTH {
                        return Err(XmlError::MaxDepthExceeded(MAX_XML_DEPTH));
                    }
                    stack.push(element_from_start(&e, &reader)?);
                }
                Ok(Event::Empty(e)) => {
                    let el = element_from_start(&e, &reader)?;
                    attach(&mut stack, &mut root, el)?;
                }
                Ok(Event::End(_)) => {
                    // quick-xml has already matched the end tag against the open one
                    let el = stack
                        .pop()
                        .ok_or_else(|| syntax_error(&reader, "unexpected closing tag"))?;
                    attach(&mut stack, &mut root, el)?;
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().map_err(|err| syntax_error(&reader, err))?;
                    push_text(&mut stack, XmlNode::Text(text.into_owned()))?;
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(&e).into_owned();
                    push_text(&mut stack, XmlNode::CData(text))?;
                }
                Ok(Event::Eof) => break,
                // Declarations, comments, processing instructions and DOCTYPE
                Ok(_) => {}
                Err(err) => return Err(syntax_error(&reader, err)),
            }
        }

        if let Some(open) = stack.last() {
            return Err(XmlError::Unclosed(open.name.clone()));
        }

        root.map(|root| XmlDocument { root })
            .ok_or(XmlError::MissingRoot)
    }

    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    /// First element named `name` anywhere in the document.
    pub fn find_first(&self, name: &str) -> Option<&XmlElement> {
        self.root.find_first(name)
    }
}

fn syntax_error(reader: &Reader<&[u8]>, err: impl std::fmt::Display) -> XmlError {
    XmlError::Syntax(format!("{err} (at byte {})", reader.buffer_position()))
}

fn element_from_start(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<XmlElement, XmlError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();

    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| syntax_error(reader, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|err| syntax_error(reader, err))?;
        attributes.push((key, value.into_owned()));
    }

    Ok(XmlElement {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    el: XmlElement,
) -> Result<(), XmlError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlNode::Element(el));
        return Ok(());
    }
    if root.is_some() {
        return Err(XmlError::MultipleRoots(el.name));
    }
    *root = Some(el);
    Ok(())
}

fn push_text(stack: &mut [XmlElement], node: XmlNode) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None => match node {
            // Whitespace between the prolog and the root is fine
            XmlNode::Text(text) if text.trim().is_empty() => Ok(()),
            _ => Err(XmlError::TextOutsideRoot),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builds_tree() {
        let doc = XmlDocument::parse(
            r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>News</title><item/></channel></rss>"#,
        )
        .unwrap();

        let root = doc.root();
        assert_eq!(root.name(), "rss");
        assert_eq!(root.attribute("version"), Some("2.0"));
        let channel = root.child_elements().next().unwrap();
        assert_eq!(channel.name(), "channel");
        let names: Vec<_> = channel.child_elements().map(XmlElement::name).collect();
        assert_eq!(names, vec!["title", "item"]);
    }

    #[test]
    fn test_qualified_names_are_kept() {
        let doc = XmlDocument::parse(
            r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><channel/></rdf:RDF>"#,
        )
        .unwrap();
        assert_eq!(doc.root().name(), "rdf:RDF");
        assert_eq!(
            doc.root().attributes().collect::<Vec<_>>(),
            vec![("xmlns:rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#")]
        );
        assert!(doc.find_first("rdf:RDF").is_some());
        assert!(doc.find_first("RDF").is_none());
    }

    #[test]
    fn test_from_bytes_honors_declared_encoding() {
        let body = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<title a=\"\xE9t\xE9\">Caf\xE9</title>";
        let doc = XmlDocument::from_bytes(body, None).unwrap();
        assert_eq!(doc.root().inner_text(), "Café");
        assert_eq!(doc.root().attribute("a"), Some("été"));
    }

    #[test]
    fn test_from_bytes_rejects_undecodable_body() {
        assert_eq!(
            XmlDocument::from_bytes(b"<t>\xC3\x28</t>", None).unwrap_err(),
            XmlError::Decode("UTF-8".to_string())
        );
    }

    #[test]
    fn test_inner_text_unescapes_and_joins_cdata() {
        let doc =
            XmlDocument::parse("<t>A &amp; B <b>bold</b><![CDATA[ <raw> ]]></t>").unwrap();
        assert_eq!(doc.root().inner_text(), "A & B bold <raw> ");
    }

    #[test]
    fn test_inner_xml_reserializes_children() {
        let doc = XmlDocument::parse(
            r#"<t>Tom &amp; Jerry <a href="x?a=1&amp;b=2">link</a><br/><![CDATA[<i>]]></t>"#,
        )
        .unwrap();
        assert_eq!(
            doc.root().inner_xml(),
            r#"Tom &amp; Jerry <a href="x?a=1&amp;b=2">link</a><br/><![CDATA[<i>]]>"#
        );
    }

    #[test]
    fn test_find_first_is_document_order() {
        let doc =
            XmlDocument::parse("<a><b><target id=\"1\"/></b><target id=\"2\"/></a>").unwrap();
        let found = doc.find_first("target").unwrap();
        assert_eq!(found.attribute("id"), Some("1"));
    }

    #[test]
    fn test_comments_and_doctype_are_dropped() {
        let doc = XmlDocument::parse(
            "<!DOCTYPE rss><!-- generated --><rss><!-- inside -->text</rss>",
        )
        .unwrap();
        assert_eq!(doc.root().children(), &[XmlNode::Text("text".to_string())]);
    }

    #[test]
    fn test_unclosed_tag_is_error() {
        assert!(XmlDocument::parse("<not valid xml").is_err());
    }

    #[test]
    fn test_unclosed_element_at_eof() {
        let err = XmlDocument::parse("<rss><channel>").unwrap_err();
        assert!(matches!(
            err,
            XmlError::Unclosed(_) | XmlError::Syntax(_)
        ));
    }

    #[test]
    fn test_mismatched_end_tag_is_error() {
        let err = XmlDocument::parse("<rss><channel></rss>").unwrap_err();
        assert!(matches!(err, XmlError::Syntax(_)));
    }

    #[test]
    fn test_empty_and_text_only_documents() {
        assert_eq!(XmlDocument::parse("").unwrap_err(), XmlError::MissingRoot);
        assert_eq!(
            XmlDocument::parse("just some words").unwrap_err(),
            XmlError::TextOutsideRoot
        );
    }

    #[test]
    fn test_second_root_is_error() {
        let err = XmlDocument::parse("<rss/><feed/>").unwrap_err();
        assert_eq!(err, XmlError::MultipleRoots("feed".to_string()));
    }

    #[test]
    fn test_unknown_entity_is_error() {
        let xml = r#"<!DOCTYPE r [<!ENTITY xxe SYSTEM "file:///etc/passwd">]><r>&xxe;</r>"#;
        assert!(matches!(
            XmlDocument::parse(xml).unwrap_err(),
            XmlError::Syntax(_)
        ));
    }

    #[test]
    fn test_depth_limit() {
        let deep = "<a>".repeat(MAX_XML_DEPTH + 1) + &"</a>".repeat(MAX_XML_DEPTH + 1);
        assert_eq!(
            XmlDocument::parse(&deep).unwrap_err(),
            XmlError::MaxDepthExceeded(MAX_XML_DEPTH)
        );

        let ok = "<a>".repeat(MAX_XML_DEPTH) + &"</a>".repeat(MAX_XML_DEPTH);
        assert!(XmlDocument::parse(&ok).is_ok());
    }
}
