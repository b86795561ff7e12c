//! Message parts a security layer must sign or encrypt.
//!
//! Binding elements answer [`ChannelProtectionRequirements`] through
//! `get_property`; a security layer merges what the stack below it asks for.

use std::collections::BTreeSet;

use chanprims_channel::ChannelError;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionKind {
    Signature,
    Encryption,
}

/// Headers, by qualified name, and optionally the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePartSpecification {
    headers: BTreeSet<(String, String)>,
    body_included: bool,
}

impl MessagePartSpecification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_body_included(&self) -> bool {
        self.body_included
    }

    pub fn set_body_included(&mut self, included: bool) {
        self.body_included = included;
    }

    pub fn add_header(&mut self, local_name: impl Into<String>, namespace: impl Into<String>) {
        self.headers.insert((local_name.into(), namespace.into()));
    }

    pub fn contains_header(&self, local_name: &str, namespace: &str) -> bool {
        self.headers
            .iter()
            .any(|(local, ns)| local == local_name && ns == namespace)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(local, ns)| (local.as_str(), ns.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && !self.body_included
    }

    pub fn union_with(&mut self, other: &MessagePartSpecification) {
        self.headers.extend(other.headers.iter().cloned());
        self.body_included |= other.body_included;
    }
}

/// Parts to protect, per direction and kind of protection.
///
/// Once made read-only, every mutation fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelProtectionRequirements {
    incoming_signature: MessagePartSpecification,
    incoming_encryption: MessagePartSpecification,
    outgoing_signature: MessagePartSpecification,
    outgoing_encryption: MessagePartSpecification,
    read_only: bool,
}

impl ChannelProtectionRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parts(
        &self,
        direction: MessageDirection,
        kind: ProtectionKind,
    ) -> &MessagePartSpecification {
        match (direction, kind) {
            (MessageDirection::Incoming, ProtectionKind::Signature) => &self.incoming_signature,
            (MessageDirection::Incoming, ProtectionKind::Encryption) => &self.incoming_encryption,
            (MessageDirection::Outgoing, ProtectionKind::Signature) => &self.outgoing_signature,
            (MessageDirection::Outgoing, ProtectionKind::Encryption) => &self.outgoing_encryption,
        }
    }

    pub fn parts_mut(
        &mut self,
        direction: MessageDirection,
        kind: ProtectionKind,
    ) -> Result<&mut MessagePartSpecification> {
        self.ensure_writable()?;
        Ok(match (direction, kind) {
            (MessageDirection::Incoming, ProtectionKind::Signature) => &mut self.incoming_signature,
            (MessageDirection::Incoming, ProtectionKind::Encryption) => {
                &mut self.incoming_encryption
            }
            (MessageDirection::Outgoing, ProtectionKind::Signature) => &mut self.outgoing_signature,
            (MessageDirection::Outgoing, ProtectionKind::Encryption) => {
                &mut self.outgoing_encryption
            }
        })
    }

    /// Merge `other` into these requirements.
    pub fn add(&mut self, other: &ChannelProtectionRequirements) -> Result<()> {
        self.ensure_writable()?;
        self.incoming_signature.union_with(&other.incoming_signature);
        self.incoming_encryption.union_with(&other.incoming_encryption);
        self.outgoing_signature.union_with(&other.outgoing_signature);
        self.outgoing_encryption.union_with(&other.outgoing_encryption);
        Ok(())
    }

    pub fn make_read_only(&mut self) {
        self.read_only = true;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The same requirements seen from the other end of the channel.
    pub fn create_inverse(&self) -> Self {
        Self {
            incoming_signature: self.outgoing_signature.clone(),
            incoming_encryption: self.outgoing_encryption.clone(),
            outgoing_signature: self.incoming_signature.clone(),
            outgoing_encryption: self.incoming_encryption.clone(),
            read_only: false,
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(ChannelError::InvalidOperation(
                "channel protection requirements are read-only".into(),
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WSA: &str = "http://www.w3.org/2005/08/addressing";

    #[test]
    fn add_unions_every_part() {
        let mut a = ChannelProtectionRequirements::new();
        a.parts_mut(MessageDirection::Incoming, ProtectionKind::Signature)
            .unwrap()
            .add_header("Action", WSA);

        let mut b = ChannelProtectionRequirements::new();
        let parts = b
            .parts_mut(MessageDirection::Incoming, ProtectionKind::Signature)
            .unwrap();
        parts.add_header("To", WSA);
        parts.set_body_included(true);

        a.add(&b).unwrap();
        let merged = a.parts(MessageDirection::Incoming, ProtectionKind::Signature);
        assert!(merged.contains_header("Action", WSA));
        assert!(merged.contains_header("To", WSA));
        assert!(merged.is_body_included());
        assert!(a
            .parts(MessageDirection::Outgoing, ProtectionKind::Encryption)
            .is_empty());
    }

    #[test]
    fn read_only_rejects_changes() {
        let mut requirements = ChannelProtectionRequirements::new();
        requirements.make_read_only();
        assert!(requirements.is_read_only());
        assert!(requirements
            .parts_mut(MessageDirection::Outgoing, ProtectionKind::Signature)
            .is_err());
        assert!(requirements
            .add(&ChannelProtectionRequirements::new())
            .is_err());
    }

    #[test]
    fn inverse_swaps_directions() {
        let mut requirements = ChannelProtectionRequirements::new();
        requirements
            .parts_mut(MessageDirection::Outgoing, ProtectionKind::Encryption)
            .unwrap()
            .set_body_included(true);
        requirements.make_read_only();

        let inverse = requirements.create_inverse();
        assert!(!inverse.is_read_only());
        assert!(inverse
            .parts(MessageDirection::Incoming, ProtectionKind::Encryption)
            .is_body_included());
        assert!(inverse
            .parts(MessageDirection::Outgoing, ProtectionKind::Encryption)
            .is_empty());
        let round_trip = inverse.create_inverse();
        assert_eq!(
            round_trip.parts(MessageDirection::Outgoing, ProtectionKind::Encryption),
            requirements.parts(MessageDirection::Outgoing, ProtectionKind::Encryption)
        );
    }
}
