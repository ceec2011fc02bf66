use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CodecError;
use crate::message::Message;
use crate::token::CapabilityToken;

/// Acknowledgement for one received message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckFrame {
    pub message_id: Uuid,
    /// Node id of the acknowledging node.
    pub from: String,
}

/// Everything nodes exchange over the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Token(CapabilityToken),
    Message(Message),
    Ack(AckFrame),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Token(_) => "token",
            Frame::Message(_) => "message",
            Frame::Ack(_) => "ack",
        }
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        match self {
            Frame::Token(token) => token.validate(),
            Frame::Message(message) => {
                message.validate()?;
                if !message.is_sealed() {
                    return Err(CodecError::InvalidMessage("message on the wire must be sealed"));
                }
                Ok(())
            }
            Frame::Ack(ack) if ack.from.is_empty() => {
                Err(CodecError::InvalidMessage("ack sender must not be empty"))
            }
            Frame::Ack(_) => Ok(()),
        }
    }
}

/// Encodes a frame as CBOR after validation.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    frame.validate()?;
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(frame, &mut bytes)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes and validates a CBOR frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let frame: Frame =
        ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
    frame.validate()?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::{decode_frame, encode_frame, AckFrame, Frame};
    use crate::error::CodecError;
    use crate::message::{Message, MessageBody, SealedBody};
    use ringcast_core::AckMode;
    use uuid::Uuid;

    fn sealed_message() -> Message {
        let mut msg = Message::new("weather", "node-a", Vec::new(), AckMode::Destination);
        msg.to = Some("node-b".to_string());
        msg.body = MessageBody::Sealed(SealedBody {
            ephemeral_public: [1_u8; 32],
            nonce: [2_u8; 24],
            ciphertext: vec![3_u8; 40],
        });
        msg
    }

    #[test]
    fn message_frame_round_trip() {
        let frame = Frame::Message(sealed_message());
        let bytes = encode_frame(&frame).expect("encode should succeed");
        assert_eq!(decode_frame(&bytes).expect("decode should succeed"), frame);
    }

    #[test]
    fn ack_frame_round_trip() {
        let frame = Frame::Ack(AckFrame {
            message_id: Uuid::from_bytes([8_u8; 16]),
            from: "node-b".to_string(),
        });
        let bytes = encode_frame(&frame).expect("encode should succeed");
        let decoded = decode_frame(&bytes).expect("decode should succeed");
        assert_eq!(decoded.kind(), "ack");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn plain_message_is_not_wire_encodable() {
        let frame = Frame::Message(Message::new("weather", "node-a", b"x".to_vec(), AckMode::None));
        assert!(matches!(
            encode_frame(&frame),
            Err(CodecError::InvalidMessage(_))
        ));
    }

    #[test]
    fn truncated_bytes_fail_to_decode() {
        let frame = Frame::Message(sealed_message());
        let bytes = encode_frame(&frame).expect("encode should succeed");
        assert!(matches!(
            decode_frame(&bytes[..bytes.len() / 2]),
            Err(CodecError::Decode(_))
        ));
    }
}
