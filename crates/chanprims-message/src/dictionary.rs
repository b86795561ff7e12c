//! String tables used to tokenize names in binary XML.
//!
//! Static entries use even ids (`2 * index`); session entries use odd ids
//! (`2 * index + 1`), so one id space covers both.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{MessageError, Result};

/// Leading entries of the standard binary SOAP dictionary, so static ids
/// match other `msbin1` peers. Strings past this prefix go through the
/// session table or are written inline.
const STATIC_STRINGS: &[&str] = &[
    "mustUnderstand",
    "Envelope",
    "http://www.w3.org/2003/05/soap-envelope",
    "http://www.w3.org/2005/08/addressing",
    "Header",
    "Action",
    "To",
    "Body",
    "Algorithm",
    "RelatesTo",
    "http://www.w3.org/2005/08/addressing/anonymous",
    "URI",
    "Reference",
    "MessageID",
    "Id",
    "Identifier",
    "http://schemas.xmlsoap.org/ws/2005/02/rm",
    "Transforms",
    "Transform",
    "DigestMethod",
    "DigestValue",
    "Address",
    "ReplyTo",
    "SequenceAcknowledgement",
    "AcknowledgementRange",
    "Upper",
    "Lower",
    "BufferRemaining",
    "http://schemas.microsoft.com/ws/2006/05/rm",
    "http://schemas.xmlsoap.org/ws/2005/02/rm/SequenceAcknowledgement",
    "SecurityTokenReference",
    "Sequence",
    "MessageNumber",
    "http://www.w3.org/2000/09/xmldsig#",
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature",
    "KeyInfo",
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd",
    "http://www.w3.org/2001/04/xmlenc#",
    "http://schemas.xmlsoap.org/ws/2005/02/sc",
    "DerivedKeyToken",
    "Nonce",
    "Signature",
    "SignedInfo",
    "CanonicalizationMethod",
    "SignatureMethod",
    "SignatureValue",
    "DataReference",
    "EncryptedData",
    "EncryptionMethod",
    "CipherData",
    "CipherValue",
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd",
    "Security",
    "Timestamp",
    "Created",
    "Expires",
    "Length",
    "ReferenceList",
    "ValueType",
    "Type",
    "EncryptedHeader",
    "http://docs.oasis-open.org/wss/oasis-wss-wssecurity-secext-1.1.xsd",
    "RequestSecurityTokenResponseCollection",
    "http://schemas.xmlsoap.org/ws/2005/02/trust",
    "http://schemas.xmlsoap.org/ws/2005/02/trust#BinarySecret",
    "http://schemas.microsoft.com/ws/2006/02/transactions",
    "s",
    "Fault",
    "MustUnderstand",
    "role",
    "relay",
    "Code",
    "Reason",
    "Text",
    "Node",
    "Role",
    "Detail",
    "Value",
    "Subcode",
    "NotUnderstood",
    "qname",
    "",
    "From",
    "FaultTo",
    "EndpointReference",
    "PortType",
    "ServiceName",
    "PortName",
    "ReferenceProperties",
    "RelationshipType",
    "Reply",
    "a",
    "http://schemas.xmlsoap.org/ws/2006/02/addressingidentity",
    "Identity",
    "Spn",
    "Upn",
    "Rsa",
    "Dns",
    "X509v3Certificate",
    "http://www.w3.org/2005/08/addressing/fault",
    "ReferenceParameters",
    "IsReferenceParameter",
    "http://www.w3.org/2005/08/addressing/reply",
    "http://www.w3.org/2005/08/addressing/none",
    "Metadata",
    "http://schemas.xmlsoap.org/ws/2004/08/addressing",
    "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous",
    "http://schemas.xmlsoap.org/ws/2004/08/addressing/fault",
    "http://schemas.xmlsoap.org/ws/2004/06/addressingex",
    "RedirectTo",
    "Via",
    "http://www.w3.org/2001/10/xml-exc-c14n#",
    "PrefixList",
    "InclusiveNamespaces",
    "ec",
];

/// Fixed bidirectional string table.
#[derive(Debug)]
pub struct XmlDictionary {
    strings: &'static [&'static str],
    ids: HashMap<&'static str, u32>,
}

impl XmlDictionary {
    fn build(strings: &'static [&'static str]) -> Self {
        let ids = strings
            .iter()
            .enumerate()
            .map(|(index, s)| (*s, (index as u32) * 2))
            .collect();
        Self { strings, ids }
    }

    /// The process-wide binary dictionary.
    pub fn binary() -> &'static XmlDictionary {
        static DICTIONARY: OnceLock<XmlDictionary> = OnceLock::new();
        DICTIONARY.get_or_init(|| XmlDictionary::build(STATIC_STRINGS))
    }

    pub fn id_of(&self, value: &str) -> Option<u32> {
        self.ids.get(value).copied()
    }

    pub fn lookup(&self, id: u32) -> Option<&'static str> {
        if id % 2 != 0 {
            return None;
        }
        self.strings.get((id / 2) as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// Per-session table grown as new strings are introduced.
///
/// A writer-side table records strings it has not yet announced to the peer;
/// a reader-side table is fed the announced strings before each message.
#[derive(Debug, Clone)]
pub struct SessionDictionary {
    strings: Vec<String>,
    ids: HashMap<String, u32>,
    pending: Vec<usize>,
    byte_count: usize,
    max_size: usize,
}

impl SessionDictionary {
    /// A table whose strings may total at most `max_size` UTF-8 bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            strings: Vec::new(),
            ids: HashMap::new(),
            pending: Vec::new(),
            byte_count: 0,
            max_size,
        }
    }

    pub fn id_of(&self, value: &str) -> Option<u32> {
        self.ids.get(value).copied()
    }

    pub fn lookup(&self, id: u32) -> Option<&str> {
        if id % 2 != 1 {
            return None;
        }
        self.strings.get((id / 2) as usize).map(String::as_str)
    }

    /// Add `value` if absent and return its id.
    ///
    /// Newly added strings stay [`pending`](Self::pending) until committed.
    pub fn add(&mut self, value: &str) -> Result<u32> {
        if let Some(id) = self.id_of(value) {
            return Ok(id);
        }
        let next = self.byte_count + value.len();
        if next > self.max_size {
            return Err(MessageError::QuotaExceeded {
                quota: "max_session_size",
                limit: self.max_size,
            });
        }
        let id = (self.strings.len() as u32) * 2 + 1;
        self.pending.push(self.strings.len());
        self.strings.push(value.to_owned());
        self.ids.insert(value.to_owned(), id);
        self.byte_count = next;
        Ok(id)
    }

    /// Add a string the peer announced. Unlike [`add`](Self::add), a string
    /// already present is a protocol error, since the peer numbers every
    /// announced string.
    pub fn announce(&mut self, value: &str) -> Result<u32> {
        if self.ids.contains_key(value) {
            return Err(MessageError::protocol(format!(
                "session string '{value}' announced twice"
            )));
        }
        self.add(value)
    }

    /// Strings added since the last commit, in id order.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(|&index| self.strings[index].as_str())
    }

    /// Mark every pending string as announced to the peer.
    pub fn commit_pending(&mut self) {
        self.pending.clear();
    }

    /// Undo every addition that has not been committed.
    pub fn discard_pending(&mut self) {
        let Some(&first) = self.pending.first() else {
            return;
        };
        for removed in self.strings.drain(first..) {
            self.byte_count -= removed.len();
            self.ids.remove(&removed);
        }
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Total UTF-8 bytes held.
    pub fn byte_count(&self) -> usize {
        self.byte_count
    }
}
