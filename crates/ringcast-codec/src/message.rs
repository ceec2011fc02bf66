use ringcast_core::AckMode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CodecError;

/// Payload sealed to the holder of a receiver capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBody {
    pub ephemeral_public: [u8; 32],
    pub nonce: [u8; 24],
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Not yet sealed; only ever held in a local cache.
    Plain(Vec<u8>),
    Sealed(SealedBody),
}

/// A subject message as produced by a publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub subject: String,
    /// Node id of the publishing node.
    pub from: String,
    /// Destination header, rewritten when a receiver capability is found.
    pub to: Option<String>,
    pub ack_mode: AckMode,
    /// Number of overlay hops taken so far.
    pub hops: u16,
    pub body: MessageBody,
}

impl Message {
    /// Creates an unsealed message with a fresh random id.
    pub fn new(
        subject: impl Into<String>,
        from: impl Into<String>,
        payload: Vec<u8>,
        ack_mode: AckMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            from: from.into(),
            to: None,
            ack_mode,
            hops: 0,
            body: MessageBody::Plain(payload),
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self.body, MessageBody::Sealed(_))
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        if self.subject.is_empty() {
            return Err(CodecError::InvalidMessage("subject must not be empty"));
        }
        if self.from.is_empty() {
            return Err(CodecError::InvalidMessage("sender must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, MessageBody};
    use ringcast_core::AckMode;

    #[test]
    fn new_message_is_plain_and_unaddressed() {
        let msg = Message::new("weather", "node-a", b"sunny".to_vec(), AckMode::None);
        assert!(!msg.is_sealed());
        assert!(msg.to.is_none());
        assert_eq!(msg.body, MessageBody::Plain(b"sunny".to_vec()));
        msg.validate().expect("fresh message should validate");
    }

    #[test]
    fn ids_are_unique() {
        let a = Message::new("s", "n", Vec::new(), AckMode::None);
        let b = Message::new("s", "n", Vec::new(), AckMode::None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn validate_rejects_empty_subject() {
        let msg = Message::new("", "node-a", Vec::new(), AckMode::None);
        assert!(msg.validate().is_err());
    }
}
