//! Binary XML node records.
//!
//! A compact record form of the infoset: every node is a one-byte record
//! type followed by varint-length UTF-8 strings, dictionary ids or
//! little-endian lengths. Names found in a dictionary are written as ids.
//!
//! ```text
//! 0x01        EndElement
//! 0x04..0x0B  attributes and xmlns (short, prefixed, dictionary forms)
//! 0x0C..0x3F  attributes with a single-letter prefix
//! 0x40..0x43  elements (short, prefixed, dictionary forms)
//! 0x44..0x77  elements with a single-letter prefix
//! 0x98..0xAB  text records; odd types also end the element
//! ```

use std::collections::HashSet;

use bytes::{Buf, BufMut, BytesMut};
use chanprims_frame::varint;

use crate::dictionary::{SessionDictionary, XmlDictionary};
use crate::error::{MessageError, Result};
use crate::infoset::{ReaderQuotas, XmlNode};

mod record {
    pub const END_ELEMENT: u8 = 0x01;
    pub const SHORT_ATTRIBUTE: u8 = 0x04;
    pub const ATTRIBUTE: u8 = 0x05;
    pub const SHORT_DICTIONARY_ATTRIBUTE: u8 = 0x06;
    pub const DICTIONARY_ATTRIBUTE: u8 = 0x07;
    pub const SHORT_XMLNS: u8 = 0x08;
    pub const XMLNS: u8 = 0x09;
    pub const SHORT_DICTIONARY_XMLNS: u8 = 0x0A;
    pub const DICTIONARY_XMLNS: u8 = 0x0B;
    pub const PREFIX_DICTIONARY_ATTRIBUTE_A: u8 = 0x0C;
    pub const PREFIX_ATTRIBUTE_A: u8 = 0x26;
    pub const SHORT_ELEMENT: u8 = 0x40;
    pub const ELEMENT: u8 = 0x41;
    pub const SHORT_DICTIONARY_ELEMENT: u8 = 0x42;
    pub const DICTIONARY_ELEMENT: u8 = 0x43;
    pub const PREFIX_DICTIONARY_ELEMENT_A: u8 = 0x44;
    pub const PREFIX_ELEMENT_A: u8 = 0x5E;
    pub const CHARS8_TEXT: u8 = 0x98;
    pub const CHARS16_TEXT: u8 = 0x9A;
    pub const CHARS32_TEXT: u8 = 0x9C;
    pub const BYTES8_TEXT: u8 = 0x9E;
    pub const BYTES16_TEXT: u8 = 0xA0;
    pub const BYTES32_TEXT: u8 = 0xA2;
    pub const EMPTY_TEXT: u8 = 0xA8;
    pub const DICTIONARY_TEXT: u8 = 0xAA;
}

/// Index 0..26 of a single lowercase-letter prefix.
fn letter_prefix(prefix: &str) -> Option<u8> {
    match prefix.as_bytes() {
        [c @ b'a'..=b'z'] => Some(c - b'a'),
        _ => None,
    }
}

/// Resolves dictionary ids while writing.
struct WriteDictionaries<'a> {
    session: Option<&'a mut SessionDictionary>,
}

impl WriteDictionaries<'_> {
    fn id_of(&mut self, value: &str) -> Result<Option<u32>> {
        if let Some(id) = XmlDictionary::binary().id_of(value) {
            return Ok(Some(id));
        }
        match self.session.as_deref_mut() {
            Some(session) => session.add(value).map(Some),
            None => Ok(None),
        }
    }
}

/// Serializes infoset nodes into binary records, reusing its output buffer.
#[derive(Debug, Default)]
pub struct BinaryXmlWriter {
    buf: BytesMut,
}

impl BinaryXmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `nodes`, adding unknown names to `session` when given.
    ///
    /// The returned slice stays valid until the next call.
    pub fn write(
        &mut self,
        nodes: &[XmlNode],
        session: Option<&mut SessionDictionary>,
    ) -> Result<&[u8]> {
        self.buf.clear();
        let mut dictionaries = WriteDictionaries { session };
        for node in nodes {
            self.write_node(node, &mut dictionaries)?;
        }
        Ok(&self.buf)
    }

    /// Drop the scratch buffer if it grew past `max_retained` bytes.
    pub fn reset(&mut self, max_retained: usize) {
        self.buf.clear();
        if self.buf.capacity() > max_retained {
            self.buf = BytesMut::new();
        }
    }

    fn write_node(&mut self, node: &XmlNode, dicts: &mut WriteDictionaries<'_>) -> Result<()> {
        match node {
            XmlNode::StartElement { prefix, local_name } => {
                match (dicts.id_of(local_name)?, letter_prefix(prefix)) {
                    (Some(id), _) if prefix.is_empty() => {
                        self.buf.put_u8(record::SHORT_DICTIONARY_ELEMENT);
                        self.put_varint(id)?;
                    }
                    (Some(id), Some(letter)) => {
                        self.buf.put_u8(record::PREFIX_DICTIONARY_ELEMENT_A + letter);
                        self.put_varint(id)?;
                    }
                    (Some(id), None) => {
                        self.buf.put_u8(record::DICTIONARY_ELEMENT);
                        self.put_string(prefix)?;
                        self.put_varint(id)?;
                    }
                    (None, _) if prefix.is_empty() => {
                        self.buf.put_u8(record::SHORT_ELEMENT);
                        self.put_string(local_name)?;
                    }
                    (None, Some(letter)) => {
                        self.buf.put_u8(record::PREFIX_ELEMENT_A + letter);
                        self.put_string(local_name)?;
                    }
                    (None, None) => {
                        self.buf.put_u8(record::ELEMENT);
                        self.put_string(prefix)?;
                        self.put_string(local_name)?;
                    }
                }
            }
            XmlNode::Xmlns { prefix, namespace } => match dicts.id_of(namespace)? {
                Some(id) if prefix.is_empty() => {
                    self.buf.put_u8(record::SHORT_DICTIONARY_XMLNS);
                    self.put_varint(id)?;
                }
                Some(id) => {
                    self.buf.put_u8(record::DICTIONARY_XMLNS);
                    self.put_string(prefix)?;
                    self.put_varint(id)?;
                }
                None if prefix.is_empty() => {
                    self.buf.put_u8(record::SHORT_XMLNS);
                    self.put_string(namespace)?;
                }
                None => {
                    self.buf.put_u8(record::XMLNS);
                    self.put_string(prefix)?;
                    self.put_string(namespace)?;
                }
            },
            XmlNode::Attribute {
                prefix,
                local_name,
                value,
            } => {
                match (dicts.id_of(local_name)?, letter_prefix(prefix)) {
                    (Some(id), _) if prefix.is_empty() => {
                        self.buf.put_u8(record::SHORT_DICTIONARY_ATTRIBUTE);
                        self.put_varint(id)?;
                    }
                    (Some(id), Some(letter)) => {
                        self.buf.put_u8(record::PREFIX_DICTIONARY_ATTRIBUTE_A + letter);
                        self.put_varint(id)?;
                    }
                    (Some(id), None) => {
                        self.buf.put_u8(record::DICTIONARY_ATTRIBUTE);
                        self.put_string(prefix)?;
                        self.put_varint(id)?;
                    }
                    (None, _) if prefix.is_empty() => {
                        self.buf.put_u8(record::SHORT_ATTRIBUTE);
                        self.put_string(local_name)?;
                    }
                    (None, Some(letter)) => {
                        self.buf.put_u8(record::PREFIX_ATTRIBUTE_A + letter);
                        self.put_string(local_name)?;
                    }
                    (None, None) => {
                        self.buf.put_u8(record::ATTRIBUTE);
                        self.put_string(prefix)?;
                        self.put_string(local_name)?;
                    }
                }
                self.write_text(value)?;
            }
            XmlNode::Text(text) => self.write_text(text)?,
            XmlNode::Bytes(bytes) => self.write_bytes(bytes)?,
            XmlNode::EndElement => self.buf.put_u8(record::END_ELEMENT),
        }
        Ok(())
    }

    fn write_text(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            self.buf.put_u8(record::EMPTY_TEXT);
            return Ok(());
        }
        if let Some(id) = XmlDictionary::binary().id_of(text) {
            self.buf.put_u8(record::DICTIONARY_TEXT);
            return self.put_varint(id);
        }
        let bytes = text.as_bytes();
        match bytes.len() {
            len @ 0..=0xFF => {
                self.buf.put_u8(record::CHARS8_TEXT);
                self.buf.put_u8(len as u8);
            }
            len @ 0x100..=0xFFFF => {
                self.buf.put_u8(record::CHARS16_TEXT);
                self.buf.put_u16_le(len as u16);
            }
            len => {
                self.buf.put_u8(record::CHARS32_TEXT);
                self.buf.put_i32_le(checked_len(len)?);
            }
        }
        self.buf.put_slice(bytes);
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        match bytes.len() {
            len @ 0..=0xFF => {
                self.buf.put_u8(record::BYTES8_TEXT);
                self.buf.put_u8(len as u8);
            }
            len @ 0x100..=0xFFFF => {
                self.buf.put_u8(record::BYTES16_TEXT);
                self.buf.put_u16_le(len as u16);
            }
            len => {
                self.buf.put_u8(record::BYTES32_TEXT);
                self.buf.put_i32_le(checked_len(len)?);
            }
        }
        self.buf.put_slice(bytes);
        Ok(())
    }

    fn put_string(&mut self, value: &str) -> Result<()> {
        self.put_varint(checked_len(value.len())? as u32)?;
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    fn put_varint(&mut self, value: u32) -> Result<()> {
        varint::encode(value, &mut self.buf)?;
        Ok(())
    }
}

fn checked_len(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| MessageError::QuotaExceeded {
        quota: "max_array_length",
        limit: i32::MAX as usize,
    })
}

/// Decodes binary records into infoset nodes under [`ReaderQuotas`].
#[derive(Debug)]
pub struct BinaryXmlReader {
    quotas: ReaderQuotas,
    name_table: HashSet<String>,
    name_table_chars: usize,
}

struct Cursor<'a> {
    src: &'a [u8],
    start_len: usize,
}

impl<'a> Cursor<'a> {
    fn position(&self) -> usize {
        self.start_len - self.src.len()
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.src.get_u8())
    }

    fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.src.get_u16_le())
    }

    fn i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.src.get_i32_le())
    }

    fn varint(&mut self) -> Result<u32> {
        match varint::decode_varint(self.src)? {
            Some((value, consumed)) => {
                self.src.advance(consumed);
                Ok(value)
            }
            None => Err(MessageError::protocol("truncated varint")),
        }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.need(len)?;
        let src: &'a [u8] = self.src;
        let (head, tail) = src.split_at(len);
        self.src = tail;
        Ok(head)
    }

    fn need(&self, len: usize) -> Result<()> {
        if self.src.len() < len {
            return Err(MessageError::protocol(format!(
                "truncated record at offset {}",
                self.position()
            )));
        }
        Ok(())
    }
}

impl BinaryXmlReader {
    pub fn new(quotas: ReaderQuotas) -> Self {
        Self {
            quotas,
            name_table: HashSet::new(),
            name_table_chars: 0,
        }
    }

    pub fn quotas(&self) -> &ReaderQuotas {
        &self.quotas
    }

    /// Clear per-document state so the reader can be pooled.
    pub fn reset(&mut self) {
        self.name_table.clear();
        self.name_table_chars = 0;
    }

    /// Decode a complete document.
    pub fn read(
        &mut self,
        src: &[u8],
        session: Option<&SessionDictionary>,
    ) -> Result<Vec<XmlNode>> {
        self.reset();
        let mut cursor = Cursor {
            src,
            start_len: src.len(),
        };
        let mut nodes = Vec::new();
        let mut depth = 0usize;
        // Offset where the current start tag began, while attributes may follow.
        let mut tag_start: Option<usize> = None;

        while !cursor.src.is_empty() {
            let record_start = cursor.position();
            let kind = cursor.u8()?;
            match kind {
                record::END_ELEMENT => {
                    tag_start = None;
                    depth = self.end_element(depth, &mut nodes)?;
                }
                record::SHORT_ATTRIBUTE..=record::DICTIONARY_XMLNS
                | record::PREFIX_DICTIONARY_ATTRIBUTE_A..=0x3F => {
                    let Some(start) = tag_start else {
                        return Err(MessageError::protocol(format!(
                            "attribute record {kind:#04x} outside a start tag"
                        )));
                    };
                    let node = self.read_attribute(kind, &mut cursor, session)?;
                    nodes.push(node);
                    self.check_bytes_per_read(cursor.position() - start)?;
                }
                record::SHORT_ELEMENT..=0x77 => {
                    let (prefix, local_name) = self.read_element_name(kind, &mut cursor, session)?;
                    depth += 1;
                    if depth > self.quotas.max_depth {
                        return Err(MessageError::QuotaExceeded {
                            quota: "max_depth",
                            limit: self.quotas.max_depth,
                        });
                    }
                    nodes.push(XmlNode::StartElement { prefix, local_name });
                    tag_start = Some(record_start);
                    self.check_bytes_per_read(cursor.position() - record_start)?;
                }
                record::CHARS8_TEXT..=0xA3 | record::EMPTY_TEXT..=0xAB => {
                    if depth == 0 {
                        return Err(MessageError::protocol("text outside of any element"));
                    }
                    tag_start = None;
                    let node = self.read_text(kind & !1, &mut cursor, session)?;
                    nodes.push(node);
                    if kind & 1 == 1 {
                        depth = self.end_element(depth, &mut nodes)?;
                    }
                }
                other => {
                    return Err(MessageError::protocol(format!(
                        "unsupported binary record {other:#04x}"
                    )));
                }
            }
        }

        if depth != 0 {
            return Err(MessageError::protocol(format!(
                "document ended with {depth} open element(s)"
            )));
        }
        Ok(nodes)
    }

    fn end_element(&self, depth: usize, nodes: &mut Vec<XmlNode>) -> Result<usize> {
        if depth == 0 {
            return Err(MessageError::protocol("end element without a start"));
        }
        nodes.push(XmlNode::EndElement);
        Ok(depth - 1)
    }

    fn read_element_name(
        &mut self,
        kind: u8,
        cursor: &mut Cursor<'_>,
        session: Option<&SessionDictionary>,
    ) -> Result<(String, String)> {
        Ok(match kind {
            record::SHORT_ELEMENT => (String::new(), self.read_name(cursor)?),
            record::ELEMENT => (self.read_name(cursor)?, self.read_name(cursor)?),
            record::SHORT_DICTIONARY_ELEMENT => {
                (String::new(), self.read_dictionary(cursor, session)?)
            }
            record::DICTIONARY_ELEMENT => {
                (self.read_name(cursor)?, self.read_dictionary(cursor, session)?)
            }
            k if k < record::PREFIX_ELEMENT_A => (
                letter(k - record::PREFIX_DICTIONARY_ELEMENT_A),
                self.read_dictionary(cursor, session)?,
            ),
            k => (letter(k - record::PREFIX_ELEMENT_A), self.read_name(cursor)?),
        })
    }

    fn read_attribute(
        &mut self,
        kind: u8,
        cursor: &mut Cursor<'_>,
        session: Option<&SessionDictionary>,
    ) -> Result<XmlNode> {
        let (prefix, local_name) = match kind {
            record::SHORT_XMLNS => {
                let namespace = self.read_name(cursor)?;
                return Ok(XmlNode::Xmlns {
                    prefix: String::new(),
                    namespace,
                });
            }
            record::XMLNS => {
                let prefix = self.read_name(cursor)?;
                let namespace = self.read_name(cursor)?;
                return Ok(XmlNode::Xmlns { prefix, namespace });
            }
            record::SHORT_DICTIONARY_XMLNS => {
                let namespace = self.read_dictionary(cursor, session)?;
                return Ok(XmlNode::Xmlns {
                    prefix: String::new(),
                    namespace,
                });
            }
            record::DICTIONARY_XMLNS => {
                let prefix = self.read_name(cursor)?;
                let namespace = self.read_dictionary(cursor, session)?;
                return Ok(XmlNode::Xmlns { prefix, namespace });
            }
            record::SHORT_ATTRIBUTE => (String::new(), self.read_name(cursor)?),
            record::ATTRIBUTE => (self.read_name(cursor)?, self.read_name(cursor)?),
            record::SHORT_DICTIONARY_ATTRIBUTE => {
                (String::new(), self.read_dictionary(cursor, session)?)
            }
            record::DICTIONARY_ATTRIBUTE => {
                (self.read_name(cursor)?, self.read_dictionary(cursor, session)?)
            }
            k if k < record::PREFIX_ATTRIBUTE_A => (
                letter(k - record::PREFIX_DICTIONARY_ATTRIBUTE_A),
                self.read_dictionary(cursor, session)?,
            ),
            k => (letter(k - record::PREFIX_ATTRIBUTE_A), self.read_name(cursor)?),
        };

        let value_kind = cursor.u8()?;
        let value = match self.read_text(value_kind, cursor, session)? {
            XmlNode::Text(text) => text,
            _ => {
                return Err(MessageError::protocol(format!(
                    "attribute value record {value_kind:#04x} is not text"
                )));
            }
        };
        Ok(XmlNode::Attribute {
            prefix,
            local_name,
            value,
        })
    }

    fn read_text(
        &mut self,
        kind: u8,
        cursor: &mut Cursor<'_>,
        session: Option<&SessionDictionary>,
    ) -> Result<XmlNode> {
        match kind {
            record::EMPTY_TEXT => Ok(XmlNode::Text(String::new())),
            record::DICTIONARY_TEXT => Ok(XmlNode::Text(self.read_dictionary(cursor, session)?)),
            record::CHARS8_TEXT => {
                let len = cursor.u8()? as usize;
                self.read_chars(cursor, len)
            }
            record::CHARS16_TEXT => {
                let len = cursor.u16()? as usize;
                self.read_chars(cursor, len)
            }
            record::CHARS32_TEXT => {
                let len = non_negative(cursor.i32()?)?;
                self.read_chars(cursor, len)
            }
            record::BYTES8_TEXT => {
                let len = cursor.u8()? as usize;
                self.read_byte_array(cursor, len)
            }
            record::BYTES16_TEXT => {
                let len = cursor.u16()? as usize;
                self.read_byte_array(cursor, len)
            }
            record::BYTES32_TEXT => {
                let len = non_negative(cursor.i32()?)?;
                self.read_byte_array(cursor, len)
            }
            other => Err(MessageError::protocol(format!(
                "unsupported text record {other:#04x}"
            ))),
        }
    }

    fn read_chars(&self, cursor: &mut Cursor<'_>, len: usize) -> Result<XmlNode> {
        let text = utf8(cursor.bytes(len)?)?;
        if text.chars().count() > self.quotas.max_string_content_length {
            return Err(MessageError::QuotaExceeded {
                quota: "max_string_content_length",
                limit: self.quotas.max_string_content_length,
            });
        }
        Ok(XmlNode::Text(text.to_owned()))
    }

    fn read_byte_array(&self, cursor: &mut Cursor<'_>, len: usize) -> Result<XmlNode> {
        if len > self.quotas.max_array_length {
            return Err(MessageError::QuotaExceeded {
                quota: "max_array_length",
                limit: self.quotas.max_array_length,
            });
        }
        Ok(XmlNode::Bytes(cursor.bytes(len)?.to_vec()))
    }

    /// A literal name; counts toward the name table quota once per distinct value.
    fn read_name(&mut self, cursor: &mut Cursor<'_>) -> Result<String> {
        let len = cursor.varint()? as usize;
        let name = utf8(cursor.bytes(len)?)?;
        if !self.name_table.contains(name) {
            let chars = name.chars().count();
            if self.name_table_chars + chars > self.quotas.max_name_table_char_count {
                return Err(MessageError::QuotaExceeded {
                    quota: "max_name_table_char_count",
                    limit: self.quotas.max_name_table_char_count,
                });
            }
            self.name_table_chars += chars;
            self.name_table.insert(name.to_owned());
        }
        Ok(name.to_owned())
    }

    fn read_dictionary(
        &self,
        cursor: &mut Cursor<'_>,
        session: Option<&SessionDictionary>,
    ) -> Result<String> {
        let id = cursor.varint()?;
        let value = if id % 2 == 0 {
            XmlDictionary::binary().lookup(id)
        } else {
            session.and_then(|s| s.lookup(id))
        };
        value
            .map(str::to_owned)
            .ok_or_else(|| MessageError::protocol(format!("unknown dictionary id {id}")))
    }

    fn check_bytes_per_read(&self, tag_len: usize) -> Result<()> {
        if tag_len > self.quotas.max_bytes_per_read {
            return Err(MessageError::QuotaExceeded {
                quota: "max_bytes_per_read",
                limit: self.quotas.max_bytes_per_read,
            });
        }
        Ok(())
    }
}

fn letter(index: u8) -> String {
    char::from(b'a' + index).to_string()
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| MessageError::protocol(format!("invalid UTF-8: {e}")))
}

fn non_negative(len: i32) -> Result<usize> {
    usize::try_from(len).map_err(|_| MessageError::protocol(format!("negative length {len}")))
}
