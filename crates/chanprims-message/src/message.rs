//! The message model: headers, properties, body and the envelope layout.

use std::collections::BTreeMap;
use std::fmt;

use crate::body::{Body, BodyWriter};
use crate::error::{MessageError, Result};
use crate::infoset::{InfosetBuffer, InfosetReader, InfosetWriter, XmlNode};
use crate::version::MessageVersion;

const ENVELOPE_PREFIX: &str = "s";
const ADDRESSING_PREFIX: &str = "a";
const HEADER_PREFIX: &str = "h";

/// Message identity used for request/reply correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueId(String);

impl UniqueId {
    /// A fresh `urn:uuid:` identifier.
    pub fn new() -> Self {
        Self(format!("urn:uuid:{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for UniqueId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for UniqueId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Created,
    Read,
    Written,
    Copied,
    Closed,
}

/// A header outside the addressing set, kept as its complete element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    local_name: String,
    namespace: String,
    content: InfosetBuffer,
}

impl MessageHeader {
    /// `<h:local_name xmlns:h="namespace">value</h:local_name>`.
    pub fn text(local_name: &str, namespace: &str, value: &str) -> Result<Self> {
        let mut writer = InfosetWriter::new();
        writer.write_element_string(HEADER_PREFIX, local_name, namespace, value)?;
        Ok(Self {
            local_name: local_name.to_owned(),
            namespace: namespace.to_owned(),
            content: writer.into_buffer()?,
        })
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The header's text content.
    pub fn value(&self) -> String {
        self.content.text_content()
    }

    pub fn content(&self) -> &InfosetBuffer {
        &self.content
    }
}

/// Addressing headers plus any custom headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub action: Option<String>,
    pub message_id: Option<UniqueId>,
    pub relates_to: Option<UniqueId>,
    pub to: Option<String>,
    pub reply_to: Option<String>,
    custom: Vec<MessageHeader>,
}

impl MessageHeaders {
    pub fn add(&mut self, header: MessageHeader) {
        self.custom.push(header);
    }

    pub fn find(&self, local_name: &str, namespace: &str) -> Option<&MessageHeader> {
        self.custom
            .iter()
            .find(|h| h.local_name == local_name && h.namespace == namespace)
    }

    pub fn custom(&self) -> &[MessageHeader] {
        &self.custom
    }

    fn has_content(&self, version: MessageVersion) -> bool {
        let addressing = version.addressing().namespace().is_some()
            && (self.action.is_some()
                || self.message_id.is_some()
                || self.relates_to.is_some()
                || self.to.is_some()
                || self.reply_to.is_some());
        addressing || !self.custom.is_empty()
    }

    fn write_to(&self, writer: &mut InfosetWriter, version: MessageVersion) -> Result<()> {
        let Some(envelope_ns) = version.envelope().namespace() else {
            return Ok(());
        };
        if !self.has_content(version) {
            return Ok(());
        }
        writer.write_start_element(ENVELOPE_PREFIX, "Header", envelope_ns)?;

        if let Some(ns) = version.addressing().namespace() {
            if let Some(action) = &self.action {
                writer.write_start_element(ADDRESSING_PREFIX, "Action", ns)?;
                writer.write_attribute(ENVELOPE_PREFIX, "mustUnderstand", "1")?;
                writer.write_string(action)?;
                writer.write_end_element()?;
            }
            if let Some(id) = &self.message_id {
                writer.write_element_string(ADDRESSING_PREFIX, "MessageID", ns, id.as_str())?;
            }
            if let Some(id) = &self.relates_to {
                writer.write_element_string(ADDRESSING_PREFIX, "RelatesTo", ns, id.as_str())?;
            }
            if let Some(reply_to) = &self.reply_to {
                writer.write_start_element(ADDRESSING_PREFIX, "ReplyTo", ns)?;
                writer.write_element_string(ADDRESSING_PREFIX, "Address", ns, reply_to)?;
                writer.write_end_element()?;
            }
            if let Some(to) = &self.to {
                writer.write_start_element(ADDRESSING_PREFIX, "To", ns)?;
                writer.write_attribute(ENVELOPE_PREFIX, "mustUnderstand", "1")?;
                writer.write_string(to)?;
                writer.write_end_element()?;
            }
        }
        for header in &self.custom {
            header.content.write_to(writer)?;
        }
        writer.write_end_element()
    }

    fn read_header(
        &mut self,
        reader: &mut InfosetReader<'_>,
        version: MessageVersion,
    ) -> Result<()> {
        let element = reader.peek_start_element()?;
        let addressing_ns = version.addressing().namespace();
        if addressing_ns != Some(element.namespace.as_str()) {
            let nodes = reader.read_subtree()?;
            self.custom.push(MessageHeader {
                local_name: element.local_name,
                namespace: element.namespace,
                content: InfosetBuffer::from_nodes(nodes),
            });
            return Ok(());
        }

        match element.local_name.as_str() {
            "Action" => self.action = Some(read_text_element(reader)?),
            "MessageID" => self.message_id = Some(read_text_element(reader)?.into()),
            "RelatesTo" => self.relates_to = Some(read_text_element(reader)?.into()),
            "To" => self.to = Some(read_text_element(reader)?),
            "ReplyTo" => {
                reader.read_start_element()?;
                while reader.is_start_element() {
                    let child = reader.peek_start_element()?;
                    if child.local_name == "Address" {
                        self.reply_to = Some(read_text_element(reader)?);
                    } else {
                        reader.skip_element()?;
                    }
                }
                reader.read_end_element()?;
            }
            _ => {
                let nodes = reader.read_subtree()?;
                self.custom.push(MessageHeader {
                    local_name: element.local_name,
                    namespace: element.namespace,
                    content: InfosetBuffer::from_nodes(nodes),
                });
            }
        }
        Ok(())
    }
}

fn read_text_element(reader: &mut InfosetReader<'_>) -> Result<String> {
    reader.read_start_element()?;
    let text = reader.read_string();
    reader.read_end_element()?;
    Ok(text)
}

/// Out-of-band values that travel with a message but not on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// The physical address the message is sent to or was received on.
    pub via: Option<String>,
    /// Content type of the encoder that produced or decoded the message.
    pub encoder: Option<String>,
    values: BTreeMap<String, String>,
}

impl MessageProperties {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }
}

/// A SOAP-style message.
#[derive(Debug)]
pub struct Message {
    version: MessageVersion,
    headers: MessageHeaders,
    properties: MessageProperties,
    body: Body,
    state: MessageState,
}

impl Message {
    pub fn new(version: MessageVersion, action: impl Into<String>, body: Body) -> Self {
        let headers = MessageHeaders {
            action: Some(action.into()),
            ..MessageHeaders::default()
        };
        Self::from_parts(version, headers, MessageProperties::default(), body)
    }

    pub fn with_body_writer(
        version: MessageVersion,
        action: impl Into<String>,
        writer: impl BodyWriter + 'static,
    ) -> Self {
        Self::new(version, action, Body::new(writer))
    }

    pub fn empty(version: MessageVersion, action: impl Into<String>) -> Self {
        Self::new(version, action, Body::empty())
    }

    pub fn from_parts(
        version: MessageVersion,
        headers: MessageHeaders,
        properties: MessageProperties,
        body: Body,
    ) -> Self {
        Self {
            version,
            headers,
            properties,
            body,
            state: MessageState::Created,
        }
    }

    pub fn version(&self) -> MessageVersion {
        self.version
    }

    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut MessageHeaders {
        &mut self.headers
    }

    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut MessageProperties {
        &mut self.properties
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Write the whole message (envelope, headers, body).
    pub fn write_message(&mut self, writer: &mut InfosetWriter) -> Result<()> {
        self.ensure_created("write")?;
        self.state = MessageState::Written;

        let Some(envelope_ns) = self.version.envelope().namespace() else {
            return self.body.write_body_contents(writer);
        };
        writer.write_start_element(ENVELOPE_PREFIX, "Envelope", envelope_ns)?;
        if let Some(ns) = self.version.addressing().namespace() {
            writer.write_xmlns(ADDRESSING_PREFIX, ns)?;
        }
        self.headers.write_to(writer, self.version)?;
        writer.write_start_element(ENVELOPE_PREFIX, "Body", envelope_ns)?;
        self.body.write_body_contents(writer)?;
        writer.write_end_element()?;
        writer.write_end_element()
    }

    /// Write only the body contents.
    pub fn write_body_contents(&mut self, writer: &mut InfosetWriter) -> Result<()> {
        self.ensure_created("write")?;
        self.state = MessageState::Written;
        self.body.write_body_contents(writer)
    }

    /// Consume the body and return its contents.
    pub fn read_body(&mut self) -> Result<InfosetBuffer> {
        self.ensure_created("read")?;
        self.state = MessageState::Read;
        let mut writer = InfosetWriter::new();
        self.body.write_body_contents(&mut writer)?;
        writer.into_buffer()
    }

    /// Text content of the body.
    pub fn read_body_text(&mut self) -> Result<String> {
        Ok(self.read_body()?.text_content())
    }

    /// Capture the message so it can be recreated any number of times.
    pub fn create_buffered_copy(&mut self, max_buffer_size: usize) -> Result<MessageBuffer> {
        self.ensure_created("copy")?;
        let body = self.body.create_buffered_copy(max_buffer_size)?;
        self.state = MessageState::Copied;
        Ok(MessageBuffer {
            version: self.version,
            headers: self.headers.clone(),
            properties: self.properties.clone(),
            body,
            max_buffer_size,
        })
    }

    pub fn close(&mut self) {
        self.state = MessageState::Closed;
    }

    /// Rebuild a message from a decoded infoset.
    pub fn from_infoset(version: MessageVersion, nodes: &[XmlNode]) -> Result<Self> {
        let Some(envelope_ns) = version.envelope().namespace() else {
            let body = Body::buffered(InfosetBuffer::from_nodes(nodes.to_vec()));
            return Ok(Self::from_parts(
                version,
                MessageHeaders::default(),
                MessageProperties::default(),
                body,
            ));
        };

        let mut reader = InfosetReader::new(nodes);
        let envelope = reader.read_start_element()?;
        if envelope.local_name != "Envelope" {
            return Err(MessageError::protocol(format!(
                "expected Envelope, found {}",
                envelope.local_name
            )));
        }
        if envelope.namespace != envelope_ns {
            return Err(MessageError::protocol(format!(
                "envelope namespace '{}' does not match {version}",
                envelope.namespace
            )));
        }

        let mut headers = MessageHeaders::default();
        let mut element = reader.read_start_element()?;
        if element.is("Header", envelope_ns) {
            while reader.is_start_element() {
                headers.read_header(&mut reader, version)?;
            }
            reader.read_end_element()?;
            element = reader.read_start_element()?;
        }
        if !element.is("Body", envelope_ns) {
            return Err(MessageError::protocol(format!(
                "expected Body, found {}",
                element.local_name
            )));
        }

        let content = reader.read_inner_content()?;
        reader.read_end_element()?;
        reader.read_end_element()?;
        if !reader.is_eof() {
            return Err(MessageError::protocol("content after the envelope"));
        }

        Ok(Self::from_parts(
            version,
            headers,
            MessageProperties::default(),
            Body::buffered(InfosetBuffer::from_nodes(content)),
        ))
    }

    fn ensure_created(&self, operation: &str) -> Result<()> {
        if self.state != MessageState::Created {
            return Err(MessageError::InvalidOperation(format!(
                "cannot {operation} a message in state {:?}",
                self.state
            )));
        }
        Ok(())
    }
}

/// A buffered message that can produce any number of identical messages.
#[derive(Debug)]
pub struct MessageBuffer {
    version: MessageVersion,
    headers: MessageHeaders,
    properties: MessageProperties,
    body: Body,
    max_buffer_size: usize,
}

impl MessageBuffer {
    pub fn create_message(&self) -> Result<Message> {
        let body = self.body.create_buffered_copy(self.max_buffer_size)?;
        Ok(Message::from_parts(
            self.version,
            self.headers.clone(),
            self.properties.clone(),
            body,
        ))
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    pub fn version(&self) -> MessageVersion {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::TextBodyWriter;

    fn request() -> Message {
        let mut message = Message::with_body_writer(
            MessageVersion::Soap12WSAddressing10,
            "urn:chanprims:echo",
            TextBodyWriter::new("echo", "urn:chanprims:test", "ping"),
        );
        let headers = message.headers_mut();
        headers.message_id = Some(UniqueId::from("urn:uuid:1"));
        headers.to = Some("test://localhost/echo".into());
        headers.reply_to = Some("http://www.w3.org/2005/08/addressing/anonymous".into());
        headers.add(MessageHeader::text("Tenant", "urn:chanprims:hdr", "blue").unwrap());
        message
    }

    fn write(message: &mut Message) -> Vec<XmlNode> {
        let mut writer = InfosetWriter::new();
        message.write_message(&mut writer).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn envelope_roundtrip_keeps_headers_and_body() {
        let mut original = request();
        let nodes = write(&mut original);
        assert_eq!(original.state(), MessageState::Written);

        let mut parsed =
            Message::from_infoset(MessageVersion::Soap12WSAddressing10, &nodes).unwrap();
        assert_eq!(parsed.headers().action.as_deref(), Some("urn:chanprims:echo"));
        assert_eq!(parsed.headers().message_id, Some(UniqueId::from("urn:uuid:1")));
        assert_eq!(parsed.headers().to.as_deref(), Some("test://localhost/echo"));
        assert_eq!(
            parsed.headers().reply_to.as_deref(),
            Some("http://www.w3.org/2005/08/addressing/anonymous")
        );
        let tenant = parsed.headers().find("Tenant", "urn:chanprims:hdr").unwrap();
        assert_eq!(tenant.value(), "blue");
        assert_eq!(parsed.read_body_text().unwrap(), "ping");
    }

    #[test]
    fn write_twice_fails() {
        let mut message = request();
        write(&mut message);
        let mut writer = InfosetWriter::new();
        assert!(matches!(
            message.write_message(&mut writer),
            Err(MessageError::InvalidOperation(_))
        ));
    }

    #[test]
    fn buffered_copy_creates_independent_messages() {
        let mut message = request();
        let buffer = message.create_buffered_copy(64 * 1024).unwrap();
        assert_eq!(message.state(), MessageState::Copied);

        let first = write(&mut buffer.create_message().unwrap());
        let second = write(&mut buffer.create_message().unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn wrong_envelope_namespace_rejected() {
        let mut message = Message::empty(MessageVersion::Soap11, "urn:a");
        let nodes = write(&mut message);
        assert!(matches!(
            Message::from_infoset(MessageVersion::Soap12WSAddressing10, &nodes),
            Err(MessageError::Protocol(_))
        ));
    }

    #[test]
    fn addressing_none_drops_addressing_headers() {
        let mut message = Message::empty(MessageVersion::Soap12, "urn:a");
        message.headers_mut().to = Some("test://x".into());
        let nodes = write(&mut message);
        assert!(!nodes.iter().any(|n| matches!(
            n,
            XmlNode::StartElement { local_name, .. } if local_name == "Header"
        )));
    }

    #[test]
    fn envelope_none_writes_body_only() {
        let mut message = Message::with_body_writer(
            MessageVersion::None,
            "urn:a",
            TextBodyWriter::new("raw", "", "x"),
        );
        let nodes = write(&mut message);
        let mut parsed = Message::from_infoset(MessageVersion::None, &nodes).unwrap();
        assert_eq!(parsed.read_body_text().unwrap(), "x");
    }

    #[test]
    fn unique_ids_are_urn_uuids() {
        let id = UniqueId::new();
        assert!(id.as_str().starts_with("urn:uuid:"));
        assert_ne!(id, UniqueId::new());
    }
}
