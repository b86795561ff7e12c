//! In-memory XML infoset: node stream, writer, replay buffer and reader.
//!
//! The infoset is the contract between message bodies and encoders. Writers
//! append [`XmlNode`]s with namespace scope tracking; encoders turn the node
//! stream into wire bytes and back.

use std::sync::Arc;

use crate::error::{MessageError, Result};

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// One node of an XML infoset stream.
///
/// `Xmlns` and `Attribute` nodes always directly follow the `StartElement`
/// they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    StartElement { prefix: String, local_name: String },
    Xmlns { prefix: String, namespace: String },
    Attribute { prefix: String, local_name: String, value: String },
    Text(String),
    Bytes(Vec<u8>),
    EndElement,
}

impl XmlNode {
    /// Approximate serialized size, used for buffer quotas.
    pub fn size(&self) -> usize {
        match self {
            XmlNode::StartElement { prefix, local_name } => 2 + prefix.len() + local_name.len(),
            XmlNode::Xmlns { prefix, namespace } => 2 + prefix.len() + namespace.len(),
            XmlNode::Attribute {
                prefix,
                local_name,
                value,
            } => 2 + prefix.len() + local_name.len() + value.len(),
            XmlNode::Text(text) => 1 + text.len(),
            XmlNode::Bytes(bytes) => 1 + bytes.len(),
            XmlNode::EndElement => 1,
        }
    }
}

/// Limits applied while decoding untrusted XML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderQuotas {
    /// Maximum element nesting depth.
    pub max_depth: usize,
    /// Maximum length, in characters, of a single text or attribute value.
    pub max_string_content_length: usize,
    /// Maximum length of a single byte array.
    pub max_array_length: usize,
    /// Maximum bytes consumed by one start tag including its attributes.
    pub max_bytes_per_read: usize,
    /// Maximum total characters of distinct literal names.
    pub max_name_table_char_count: usize,
}

impl Default for ReaderQuotas {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_string_content_length: 8192,
            max_array_length: 16384,
            max_bytes_per_read: 4096,
            max_name_table_char_count: 16384,
        }
    }
}

impl ReaderQuotas {
    /// Quotas with every limit at its maximum.
    pub fn max() -> Self {
        Self {
            max_depth: usize::MAX,
            max_string_content_length: usize::MAX,
            max_array_length: usize::MAX,
            max_bytes_per_read: usize::MAX,
            max_name_table_char_count: usize::MAX,
        }
    }
}

/// Appends infoset nodes, tracking namespace scopes and an optional size cap.
#[derive(Debug, Default)]
pub struct InfosetWriter {
    nodes: Vec<XmlNode>,
    scopes: Vec<Vec<(String, String)>>,
    in_start_tag: bool,
    size: usize,
    max_size: Option<usize>,
}

impl InfosetWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer that fails with `QuotaExceeded` once `max_size` bytes are written.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size: Some(max_size),
            ..Self::default()
        }
    }

    /// Start an element, declaring `namespace` for `prefix` if it is not
    /// already bound to it.
    pub fn write_start_element(
        &mut self,
        prefix: &str,
        local_name: &str,
        namespace: &str,
    ) -> Result<()> {
        if local_name.is_empty() {
            return Err(MessageError::invalid_argument(
                "local_name",
                "element name must not be empty",
            ));
        }
        self.push(XmlNode::StartElement {
            prefix: prefix.to_owned(),
            local_name: local_name.to_owned(),
        })?;
        self.scopes.push(Vec::new());
        self.in_start_tag = true;

        let bound = self.lookup_namespace(prefix).unwrap_or("");
        if bound != namespace {
            self.write_xmlns(prefix, namespace)?;
        }
        Ok(())
    }

    pub fn write_xmlns(&mut self, prefix: &str, namespace: &str) -> Result<()> {
        self.ensure_in_start_tag("xmlns")?;
        self.push(XmlNode::Xmlns {
            prefix: prefix.to_owned(),
            namespace: namespace.to_owned(),
        })?;
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((prefix.to_owned(), namespace.to_owned()));
        }
        Ok(())
    }

    pub fn write_attribute(&mut self, prefix: &str, local_name: &str, value: &str) -> Result<()> {
        self.ensure_in_start_tag("attribute")?;
        self.push(XmlNode::Attribute {
            prefix: prefix.to_owned(),
            local_name: local_name.to_owned(),
            value: value.to_owned(),
        })
    }

    pub fn write_string(&mut self, text: &str) -> Result<()> {
        self.ensure_open("text")?;
        self.in_start_tag = false;
        self.push(XmlNode::Text(text.to_owned()))
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open("bytes")?;
        self.in_start_tag = false;
        self.push(XmlNode::Bytes(bytes.to_vec()))
    }

    pub fn write_end_element(&mut self) -> Result<()> {
        self.ensure_open("end element")?;
        self.scopes.pop();
        self.in_start_tag = false;
        self.push(XmlNode::EndElement)
    }

    /// Write `<prefix:local_name>text</prefix:local_name>`.
    pub fn write_element_string(
        &mut self,
        prefix: &str,
        local_name: &str,
        namespace: &str,
        text: &str,
    ) -> Result<()> {
        self.write_start_element(prefix, local_name, namespace)?;
        self.write_string(text)?;
        self.write_end_element()
    }

    /// Append a node as-is, keeping scope bookkeeping consistent.
    pub fn write_node(&mut self, node: &XmlNode) -> Result<()> {
        match node {
            XmlNode::StartElement { .. } => {
                self.push(node.clone())?;
                self.scopes.push(Vec::new());
                self.in_start_tag = true;
                Ok(())
            }
            XmlNode::Xmlns { prefix, namespace } => self.write_xmlns(prefix, namespace),
            XmlNode::Attribute {
                prefix,
                local_name,
                value,
            } => self.write_attribute(prefix, local_name, value),
            XmlNode::Text(text) => self.write_string(text),
            XmlNode::Bytes(bytes) => self.write_bytes(bytes),
            XmlNode::EndElement => self.write_end_element(),
        }
    }

    /// The namespace currently bound to `prefix`, innermost scope first.
    pub fn lookup_namespace(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(p, _)| p == prefix)
            .map(|(_, ns)| ns.as_str())
    }

    /// Current element nesting depth.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Bytes written so far, as counted by [`XmlNode::size`].
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn nodes(&self) -> &[XmlNode] {
        &self.nodes
    }

    /// Finish writing. Every started element must have been ended.
    pub fn finish(self) -> Result<Vec<XmlNode>> {
        if !self.scopes.is_empty() {
            return Err(MessageError::InvalidOperation(format!(
                "{} element(s) left open",
                self.scopes.len()
            )));
        }
        Ok(self.nodes)
    }

    pub fn into_buffer(self) -> Result<InfosetBuffer> {
        let size = self.size;
        let nodes = self.finish()?;
        Ok(InfosetBuffer {
            nodes: nodes.into(),
            size,
        })
    }

    fn push(&mut self, node: XmlNode) -> Result<()> {
        let size = self.size + node.size();
        if let Some(max) = self.max_size {
            if size > max {
                return Err(MessageError::QuotaExceeded {
                    quota: "max_buffer_size",
                    limit: max,
                });
            }
        }
        self.size = size;
        self.nodes.push(node);
        Ok(())
    }

    fn ensure_in_start_tag(&self, what: &str) -> Result<()> {
        if !self.in_start_tag {
            return Err(MessageError::InvalidOperation(format!(
                "{what} must directly follow a start element"
            )));
        }
        Ok(())
    }

    fn ensure_open(&self, what: &str) -> Result<()> {
        if self.scopes.is_empty() {
            return Err(MessageError::InvalidOperation(format!(
                "{what} written outside of any element"
            )));
        }
        Ok(())
    }
}

/// Immutable, cheaply clonable capture of an infoset fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfosetBuffer {
    nodes: Arc<[XmlNode]>,
    size: usize,
}

impl InfosetBuffer {
    pub fn from_nodes(nodes: Vec<XmlNode>) -> Self {
        let size = nodes.iter().map(XmlNode::size).sum();
        Self {
            nodes: nodes.into(),
            size,
        }
    }

    pub fn nodes(&self) -> &[XmlNode] {
        &self.nodes
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Replay the captured nodes into `writer`.
    pub fn write_to(&self, writer: &mut InfosetWriter) -> Result<()> {
        self.nodes.iter().try_for_each(|node| writer.write_node(node))
    }

    /// Concatenation of every text node in the fragment.
    pub fn text_content(&self) -> String {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A start tag with its namespace resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInfo {
    pub prefix: String,
    pub local_name: String,
    pub namespace: String,
    pub attributes: Vec<(String, String, String)>,
}

impl ElementInfo {
    pub fn is(&self, local_name: &str, namespace: &str) -> bool {
        self.local_name == local_name && self.namespace == namespace
    }

    /// Value of the attribute with the given prefix and local name.
    pub fn attribute(&self, prefix: &str, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(p, l, _)| p == prefix && l == local_name)
            .map(|(_, _, v)| v.as_str())
    }
}

/// Forward-only cursor over a node stream with namespace resolution.
#[derive(Debug)]
pub struct InfosetReader<'a> {
    nodes: &'a [XmlNode],
    pos: usize,
    scopes: Vec<Vec<(&'a str, &'a str)>>,
}

impl<'a> InfosetReader<'a> {
    pub fn new(nodes: &'a [XmlNode]) -> Self {
        Self {
            nodes,
            pos: 0,
            scopes: Vec::new(),
        }
    }

    pub fn peek(&self) -> Option<&'a XmlNode> {
        self.nodes.get(self.pos)
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.nodes.len()
    }

    pub fn is_start_element(&self) -> bool {
        matches!(self.peek(), Some(XmlNode::StartElement { .. }))
    }

    pub fn is_end_element(&self) -> bool {
        matches!(self.peek(), Some(XmlNode::EndElement))
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Consume a start tag with its declarations and attributes.
    pub fn read_start_element(&mut self) -> Result<ElementInfo> {
        let (info, next, scope) = self.scan_start_element()?;
        self.pos = next;
        self.scopes.push(scope);
        Ok(info)
    }

    /// Resolve the start tag at the cursor without consuming it.
    pub fn peek_start_element(&self) -> Result<ElementInfo> {
        self.scan_start_element().map(|(info, _, _)| info)
    }

    #[allow(clippy::type_complexity)]
    fn scan_start_element(&self) -> Result<(ElementInfo, usize, Vec<(&'a str, &'a str)>)> {
        let Some(XmlNode::StartElement { prefix, local_name }) = self.peek() else {
            return Err(MessageError::protocol(format!(
                "expected a start element, found {:?}",
                self.peek()
            )));
        };
        let mut pos = self.pos + 1;

        let mut scope = Vec::new();
        let mut attributes = Vec::new();
        while let Some(node) = self.nodes.get(pos) {
            match node {
                XmlNode::Xmlns { prefix, namespace } => {
                    scope.push((prefix.as_str(), namespace.as_str()));
                }
                XmlNode::Attribute {
                    prefix,
                    local_name,
                    value,
                } => attributes.push((prefix.clone(), local_name.clone(), value.clone())),
                _ => break,
            }
            pos += 1;
        }

        let namespace = scope
            .iter()
            .rev()
            .find(|(p, _)| *p == prefix.as_str())
            .map(|(_, ns)| *ns)
            .or_else(|| self.lookup_namespace(prefix))
            .unwrap_or("")
            .to_owned();
        let info = ElementInfo {
            prefix: prefix.clone(),
            local_name: local_name.clone(),
            namespace,
            attributes,
        };
        Ok((info, pos, scope))
    }

    /// Skip the element at the cursor.
    pub fn skip_element(&mut self) -> Result<()> {
        self.read_subtree().map(|_| ())
    }

    pub fn read_end_element(&mut self) -> Result<()> {
        if !self.is_end_element() {
            return Err(MessageError::protocol(format!(
                "expected an end element, found {:?}",
                self.peek()
            )));
        }
        self.pos += 1;
        self.scopes.pop();
        Ok(())
    }

    /// Consume consecutive text nodes and return their concatenation.
    pub fn read_string(&mut self) -> String {
        let mut out = String::new();
        while let Some(XmlNode::Text(text)) = self.peek() {
            out.push_str(text);
            self.pos += 1;
        }
        out
    }

    /// Consume the element at the cursor and return all of its nodes.
    pub fn read_subtree(&mut self) -> Result<Vec<XmlNode>> {
        if !self.is_start_element() {
            return Err(MessageError::protocol("expected a start element"));
        }
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(node) = self.peek() {
            self.pos += 1;
            match node {
                XmlNode::StartElement { .. } => depth += 1,
                XmlNode::EndElement => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(self.nodes[start..self.pos].to_vec());
                    }
                }
                _ => {}
            }
        }
        Err(MessageError::protocol("unterminated element"))
    }

    /// Consume every node up to, not including, the end tag of the current
    /// element.
    pub fn read_inner_content(&mut self) -> Result<Vec<XmlNode>> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(node) = self.peek() {
            match node {
                XmlNode::StartElement { .. } => depth += 1,
                XmlNode::EndElement if depth == 0 => {
                    return Ok(self.nodes[start..self.pos].to_vec());
                }
                XmlNode::EndElement => depth -= 1,
                _ => {}
            }
            self.pos += 1;
        }
        Err(MessageError::protocol("unterminated element"))
    }

    pub fn lookup_namespace(&self, prefix: &str) -> Option<&'a str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(p, _)| *p == prefix)
            .map(|(_, ns)| *ns)
    }
}
