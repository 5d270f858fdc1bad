//! Minimal namespace-aware XML element tree.
//!
//! Parsing goes through `quick_xml::NsReader`, which resolves prefixes, and
//! serialization through `quick_xml::Writer`. Namespace declarations
//! are kept as ordinary `xmlns`/`xmlns:*` attributes so a subtree copied out
//! of one document serializes with the declarations it carried; each element
//! and prefixed attribute also records its resolved namespace URI for
//! matching.

use std::io::Write;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Writer};

pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(String),
    #[error("XML document has no root element")]
    NoRoot,
    #[error("XML write error: {0}")]
    Write(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Qualified name as written (`xsi:schemaLocation`).
    pub name: String,
    /// Resolved namespace for prefixed, non-`xmlns` attributes.
    pub namespace: Option<String>,
    pub value: String,
}

impl Attribute {
    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    namespace: Option<String>,
    attributes: Vec<Attribute>,
    children: Vec<Node>,
}

impl Element {
    /// New element with a qualified `name` in `namespace`.
    pub fn new(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.map(str::to_string),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder form of [`push_attribute`](Self::push_attribute).
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.push_attribute(name, value);
        self
    }

    /// Builder form of [`push_child`](Self::push_child).
    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    /// Builder form of [`push_text`](Self::push_text).
    pub fn with_text(mut self, text: &str) -> Self {
        self.push_text(text);
        self
    }

    /// Appends an attribute, resolving its prefix against this element's
    /// own declarations.
    pub fn push_attribute(&mut self, name: &str, value: &str) {
        let namespace = match split_qname(name) {
            (Some("xmlns"), _) | (None, _) => None,
            (Some("xml"), _) => Some(XML_NS.to_string()),
            (Some(prefix), _) => self.declared_namespace(Some(prefix)),
        };
        self.attributes.push(Attribute {
            name: name.to_string(),
            namespace,
            value: value.to_string(),
        });
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn push_text(&mut self, text: &str) {
        self.children.push(Node::Text(text.to_string()));
    }

    /// Qualified name as written.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> Option<&str> {
        split_qname(&self.name).0
    }

    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Clark notation `{namespace}local`, or just `local` without a namespace.
    pub fn tag(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{{{}}}{}", ns, self.local_name()),
            None => self.local_name().to_string(),
        }
    }

    /// Namespace URI concatenated with the local name, as RDF predicates are written.
    pub fn expanded_name(&self) -> String {
        format!("{}{}", self.namespace().unwrap_or_default(), self.local_name())
    }

    /// Looks up an attribute by namespace and local name.
    pub fn attribute(&self, namespace: Option<&str>, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.as_deref() == namespace && a.local_name() == local_name)
            .map(|a| a.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// All text below this element, concatenated in document order.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Visits this element and all descendants in document order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Element)) {
        visit(self);
        for child in self.child_elements() {
            child.walk(visit);
        }
    }

    fn declared_namespace(&self, prefix: Option<&str>) -> Option<String> {
        let key = match prefix {
            Some(p) => format!("xmlns:{}", p),
            None => "xmlns".to_string(),
        };
        self.attributes
            .iter()
            .find(|a| a.name == key)
            .map(|a| a.value.clone())
    }

    /// Parses a document and returns its root element.
    ///
    /// Text is kept as written. Whitespace-only text is dropped from
    /// elements that hold only child elements.
    pub fn parse(input: &str) -> Result<Element, XmlError> {
        let mut reader = NsReader::from_str(input);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let (namespace, event) = match reader.read_resolved_event() {
                Ok((ns, event)) => (bound_namespace(ns), event),
                Err(e) => {
                    return Err(XmlError::Parse(format!(
                        "{} at byte {}",
                        e,
                        reader.buffer_position()
                    )))
                }
            };
            match event {
                Event::Start(e) => stack.push(open(&reader, &e, namespace)?),
                Event::Empty(e) => {
                    let element = open(&reader, &e, namespace)?;
                    attach(&mut stack, &mut root, element);
                }
                Event::End(_) => {
                    let mut element = stack
                        .pop()
                        .ok_or_else(|| XmlError::Parse("unexpected closing tag".to_string()))?;
                    element.drop_indentation();
                    attach(&mut stack, &mut root, element);
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(|e| XmlError::Parse(e.to_string()))?;
                    if let Some(parent) = stack.last_mut() {
                        if !text.is_empty() {
                            parent.push_text(&text);
                        }
                    }
                }
                Event::CData(c) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.push_text(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(XmlError::Parse(format!("unclosed element <{}>", open.name)));
        }
        root.ok_or(XmlError::NoRoot)
    }

    /// Removes whitespace-only text when every other child is an element.
    fn drop_indentation(&mut self) {
        let is_blank = |n: &Node| matches!(n, Node::Text(t) if t.trim().is_empty());
        let has_elements = self.children.iter().any(|n| matches!(n, Node::Element(_)));
        let mixed = self
            .children
            .iter()
            .any(|n| matches!(n, Node::Text(_)) && !is_blank(n));
        if has_elements && !mixed {
            self.children.retain(|n| !is_blank(n));
        }
    }

    /// Writes this element and its subtree.
    pub fn write_to<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), XmlError> {
        let mut start = BytesStart::new(self.name.as_str());
        for attr in &self.attributes {
            start.push_attribute((attr.name.as_str(), attr.value.as_str()));
        }

        if self.children.is_empty() {
            return write_event(writer, Event::Empty(start));
        }

        write_event(writer, Event::Start(start))?;
        for child in &self.children {
            match child {
                Node::Element(e) => e.write_to(writer)?,
                Node::Text(t) => write_event(writer, Event::Text(BytesText::new(t)))?,
            }
        }
        write_event(writer, Event::End(BytesEnd::new(self.name.as_str())))
    }

    /// Serializes the subtree without an XML declaration.
    pub fn to_xml_string(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|e| XmlError::Write(e.to_string()))
    }

    /// Serializes as a standalone document with a UTF-8 declaration.
    pub fn to_document_string(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new(Vec::new());
        write_event(
            &mut writer,
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;
        writer
            .get_mut()
            .write_all(b"\n")
            .map_err(|e| XmlError::Write(e.to_string()))?;
        self.write_to(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|e| XmlError::Write(e.to_string()))
    }
}

fn write_event<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<(), XmlError> {
    writer
        .write_event(event)
        .map_err(|e| XmlError::Write(e.to_string()))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.push_child(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Splits `prefix:local` into its parts.
pub fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

fn bound_namespace(ns: ResolveResult<'_>) -> Option<String> {
    match ns {
        ResolveResult::Bound(Namespace(uri)) if !uri.is_empty() => {
            Some(String::from_utf8_lossy(uri).into_owned())
        }
        _ => None,
    }
}

/// Builds an element from a start tag. `namespace` is the tag's resolved
/// namespace; attribute prefixes are resolved against the reader's scope.
fn open(
    reader: &NsReader<&[u8]>,
    start: &BytesStart<'_>,
    namespace: Option<String>,
) -> Result<Element, XmlError> {
    let name = decode(start.name().as_ref())?;
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Parse(e.to_string()))?;
        let key = decode(attr.key.as_ref())?;
        let attr_namespace = match split_qname(&key).0 {
            Some("xmlns") | None => None,
            Some("xml") => Some(XML_NS.to_string()),
            Some(_) => bound_namespace(reader.resolve_attribute(attr.key).0),
        };
        let value = attr
            .unescape_value()
            .map_err(|e| XmlError::Parse(e.to_string()))?
            .into_owned();
        attributes.push(Attribute {
            name: key,
            namespace: attr_namespace,
            value,
        });
    }
    Ok(Element {
        name,
        namespace,
        attributes,
        children: Vec::new(),
    })
}

fn decode(bytes: &[u8]) -> Result<String, XmlError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| XmlError::Parse(e.to_string()))
}
