//! Framing record types.
//!
//! Every record starts with a one-byte type. What follows depends on the
//! record: nothing, a fixed number of bytes, or a varint size and payload.

use crate::error::{FrameError, Result};

/// Payload layout following the record type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    /// Type byte only.
    Empty,
    /// Exactly this many payload bytes.
    Fixed(usize),
    /// Varint payload length, then the payload.
    Sized,
}

/// Record types of the message framing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    Version = 0x00,
    Mode = 0x01,
    Via = 0x02,
    KnownEncoding = 0x03,
    ExtensibleEncoding = 0x04,
    UnsizedEnvelope = 0x05,
    SizedEnvelope = 0x06,
    End = 0x07,
    Fault = 0x08,
    UpgradeRequest = 0x09,
    UpgradeResponse = 0x0A,
    PreambleAck = 0x0B,
    PreambleEnd = 0x0C,
}

impl RecordType {
    pub fn layout(self) -> RecordLayout {
        match self {
            RecordType::Version => RecordLayout::Fixed(2),
            RecordType::Mode | RecordType::KnownEncoding => RecordLayout::Fixed(1),
            RecordType::Via
            | RecordType::ExtensibleEncoding
            | RecordType::SizedEnvelope
            | RecordType::Fault
            | RecordType::UpgradeRequest => RecordLayout::Sized,
            RecordType::UnsizedEnvelope
            | RecordType::End
            | RecordType::UpgradeResponse
            | RecordType::PreambleAck
            | RecordType::PreambleEnd => RecordLayout::Empty,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordType::Version => "Version",
            RecordType::Mode => "Mode",
            RecordType::Via => "Via",
            RecordType::KnownEncoding => "KnownEncoding",
            RecordType::ExtensibleEncoding => "ExtensibleEncoding",
            RecordType::UnsizedEnvelope => "UnsizedEnvelope",
            RecordType::SizedEnvelope => "SizedEnvelope",
            RecordType::End => "End",
            RecordType::Fault => "Fault",
            RecordType::UpgradeRequest => "UpgradeRequest",
            RecordType::UpgradeResponse => "UpgradeResponse",
            RecordType::PreambleAck => "PreambleAck",
            RecordType::PreambleEnd => "PreambleEnd",
        }
    }
}

impl TryFrom<u8> for RecordType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => RecordType::Version,
            0x01 => RecordType::Mode,
            0x02 => RecordType::Via,
            0x03 => RecordType::KnownEncoding,
            0x04 => RecordType::ExtensibleEncoding,
            0x05 => RecordType::UnsizedEnvelope,
            0x06 => RecordType::SizedEnvelope,
            0x07 => RecordType::End,
            0x08 => RecordType::Fault,
            0x09 => RecordType::UpgradeRequest,
            0x0A => RecordType::UpgradeResponse,
            0x0B => RecordType::PreambleAck,
            0x0C => RecordType::PreambleEnd,
            other => return Err(FrameError::UnknownRecord(other)),
        })
    }
}

/// Values carried by a `Mode` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FramingMode {
    SingletonUnsized = 0x01,
    Duplex = 0x02,
    Simplex = 0x03,
    SingletonSized = 0x04,
}

/// Values carried by a `KnownEncoding` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KnownEncoding {
    Soap11Utf8 = 0x00,
    Soap11Utf16 = 0x01,
    Soap11UnicodeFffe = 0x02,
    Soap12Utf8 = 0x03,
    Soap12Utf16 = 0x04,
    Soap12UnicodeFffe = 0x05,
    Soap12Mtom = 0x06,
    Soap12Binary = 0x07,
    Soap12BinarySession = 0x08,
}

const KNOWN_ENCODINGS: [KnownEncoding; 9] = [
    KnownEncoding::Soap11Utf8,
    KnownEncoding::Soap11Utf16,
    KnownEncoding::Soap11UnicodeFffe,
    KnownEncoding::Soap12Utf8,
    KnownEncoding::Soap12Utf16,
    KnownEncoding::Soap12UnicodeFffe,
    KnownEncoding::Soap12Mtom,
    KnownEncoding::Soap12Binary,
    KnownEncoding::Soap12BinarySession,
];

impl KnownEncoding {
    pub fn content_type(self) -> &'static str {
        match self {
            KnownEncoding::Soap11Utf8 => "text/xml; charset=utf-8",
            KnownEncoding::Soap11Utf16 => "text/xml; charset=utf-16",
            KnownEncoding::Soap11UnicodeFffe => "text/xml; charset=unicodeFFFE",
            KnownEncoding::Soap12Utf8 => "application/soap+xml; charset=utf-8",
            KnownEncoding::Soap12Utf16 => "application/soap+xml; charset=utf-16",
            KnownEncoding::Soap12UnicodeFffe => "application/soap+xml; charset=unicodeFFFE",
            KnownEncoding::Soap12Mtom => "multipart/related",
            KnownEncoding::Soap12Binary => "application/soap+msbin1",
            KnownEncoding::Soap12BinarySession => "application/soap+msbinsession1",
        }
    }

    /// The known encoding for `content_type`, if there is one.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        KNOWN_ENCODINGS
            .into_iter()
            .find(|encoding| encoding.content_type().eq_ignore_ascii_case(content_type))
    }
}

impl TryFrom<u8> for KnownEncoding {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        KNOWN_ENCODINGS
            .get(usize::from(value))
            .copied()
            .ok_or_else(|| {
                FrameError::invalid_argument(
                    "encoding",
                    format!("unknown known encoding 0x{value:02X}"),
                )
            })
    }
}
