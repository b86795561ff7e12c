//! Envelope and addressing versions.
//!
//! [`MessageVersion`] is a closed set of the valid (envelope, addressing)
//! pairs. Each variant maps to fixed namespace constants; nothing is computed
//! lazily.

use std::fmt;

pub const SOAP11_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP12_NAMESPACE: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const ADDRESSING_AUGUST2004_NAMESPACE: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
pub const ADDRESSING10_NAMESPACE: &str = "http://www.w3.org/2005/08/addressing";

/// SOAP envelope version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeVersion {
    /// No envelope; the body is the whole message.
    None,
    Soap11,
    Soap12,
}

impl EnvelopeVersion {
    pub fn namespace(self) -> Option<&'static str> {
        match self {
            EnvelopeVersion::None => None,
            EnvelopeVersion::Soap11 => Some(SOAP11_NAMESPACE),
            EnvelopeVersion::Soap12 => Some(SOAP12_NAMESPACE),
        }
    }
}

/// WS-Addressing version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingVersion {
    None,
    August2004,
    WSAddressing10,
}

impl AddressingVersion {
    pub fn namespace(self) -> Option<&'static str> {
        match self {
            AddressingVersion::None => None,
            AddressingVersion::August2004 => Some(ADDRESSING_AUGUST2004_NAMESPACE),
            AddressingVersion::WSAddressing10 => Some(ADDRESSING10_NAMESPACE),
        }
    }

    /// The anonymous endpoint address for this version.
    pub fn anonymous(self) -> Option<&'static str> {
        match self {
            AddressingVersion::None => None,
            AddressingVersion::August2004 => {
                Some("http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous")
            }
            AddressingVersion::WSAddressing10 => {
                Some("http://www.w3.org/2005/08/addressing/anonymous")
            }
        }
    }
}

/// A valid pairing of envelope and addressing versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageVersion {
    None,
    Soap11,
    Soap11WSAddressingAugust2004,
    Soap11WSAddressing10,
    Soap12,
    Soap12WSAddressingAugust2004,
    #[default]
    Soap12WSAddressing10,
}

impl MessageVersion {
    pub const ALL: [MessageVersion; 7] = [
        MessageVersion::None,
        MessageVersion::Soap11,
        MessageVersion::Soap11WSAddressingAugust2004,
        MessageVersion::Soap11WSAddressing10,
        MessageVersion::Soap12,
        MessageVersion::Soap12WSAddressingAugust2004,
        MessageVersion::Soap12WSAddressing10,
    ];

    pub const fn envelope(self) -> EnvelopeVersion {
        match self {
            MessageVersion::None => EnvelopeVersion::None,
            MessageVersion::Soap11
            | MessageVersion::Soap11WSAddressingAugust2004
            | MessageVersion::Soap11WSAddressing10 => EnvelopeVersion::Soap11,
            MessageVersion::Soap12
            | MessageVersion::Soap12WSAddressingAugust2004
            | MessageVersion::Soap12WSAddressing10 => EnvelopeVersion::Soap12,
        }
    }

    pub const fn addressing(self) -> AddressingVersion {
        match self {
            MessageVersion::None | MessageVersion::Soap11 | MessageVersion::Soap12 => {
                AddressingVersion::None
            }
            MessageVersion::Soap11WSAddressingAugust2004
            | MessageVersion::Soap12WSAddressingAugust2004 => AddressingVersion::August2004,
            MessageVersion::Soap11WSAddressing10 | MessageVersion::Soap12WSAddressing10 => {
                AddressingVersion::WSAddressing10
            }
        }
    }

    /// Look up the version for an (envelope, addressing) pair.
    ///
    /// `EnvelopeVersion::None` only pairs with `AddressingVersion::None`.
    pub fn create(envelope: EnvelopeVersion, addressing: AddressingVersion) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.envelope() == envelope && v.addressing() == addressing)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageVersion::None => "None",
            MessageVersion::Soap11 => "Soap11",
            MessageVersion::Soap11WSAddressingAugust2004 => "Soap11WSAddressingAugust2004",
            MessageVersion::Soap11WSAddressing10 => "Soap11WSAddressing10",
            MessageVersion::Soap12 => "Soap12",
            MessageVersion::Soap12WSAddressingAugust2004 => "Soap12WSAddressingAugust2004",
            MessageVersion::Soap12WSAddressing10 => "Soap12WSAddressing10",
        }
    }
}

impl fmt::Display for MessageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for MessageVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown message version '{s}'"))
    }
}
