use std::collections::BTreeMap;

use ringcast_core::hash::FieldHasher;
use ringcast_core::{AckMode, MepType, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CodecError;

/// Upper bound for `realm`, `issuer`, `subject` and `audience`.
pub const MAX_CLAIM_LEN: usize = 255;

pub const EXT_ROLE: &str = "role";
pub const EXT_MEP_TYPE: &str = "mep_type";
pub const EXT_ACK_MODE: &str = "ack_mode";
pub const EXT_MAX_THRESHOLD: &str = "max_threshold";
pub const EXT_MSG_THRESHOLD: &str = "msg_threshold";
pub const EXT_TARGET_NODE: &str = "target_node";
pub const EXT_SIGNATURE: &str = "signature";

const TOKEN_DIGEST_DOMAIN: &[u8] = b"ringcast/token/v1";

/// One attribute value in a token's extension map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtValue {
    U64(u64),
    Str(String),
    Bytes(Vec<u8>),
}

impl ExtValue {
    fn digest_into(&self, hasher: &mut FieldHasher) {
        match self {
            ExtValue::U64(v) => hasher.field(&[0]).field_u64(*v),
            ExtValue::Str(s) => hasher.field(&[1]).field(s.as_bytes()),
            ExtValue::Bytes(b) => hasher.field(&[2]).field(b),
        };
    }
}

/// Ordered, string-keyed token attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extensions(BTreeMap<String, ExtValue>);

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ExtValue) -> Option<ExtValue> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&ExtValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ExtValue> {
        self.0.remove(key)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key) {
            Some(ExtValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(ExtValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.0.get(key) {
            Some(ExtValue::Bytes(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Signed, time-bounded assertion of one principal's interest in a subject.
///
/// Every field except the `msg_threshold` and `signature` extensions is
/// covered by [`CapabilityToken::signing_digest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub realm: String,
    /// Node id of the principal that minted the token.
    pub issuer: String,
    pub subject: String,
    pub audience: String,
    /// Unix millis.
    pub issued_at: u64,
    /// Unix millis, inclusive.
    pub not_before: u64,
    /// Unix millis, exclusive.
    pub expiration: u64,
    /// Issuer's Ed25519 public key.
    pub public_key: [u8; 32],
    pub uuid: Uuid,
    pub extensions: Extensions,
}

impl CapabilityToken {
    /// Validates field bounds and the presence of mandatory extensions.
    ///
    /// This is schema validation only; signature, time window and threshold
    /// checks happen on the ledger side.
    pub fn validate(&self) -> Result<(), CodecError> {
        for claim in [&self.realm, &self.issuer, &self.subject, &self.audience] {
            if claim.len() > MAX_CLAIM_LEN {
                return Err(CodecError::InvalidToken("claim exceeds 255 bytes"));
            }
        }
        if self.subject.is_empty() {
            return Err(CodecError::InvalidToken("subject must not be empty"));
        }
        if self.issuer.is_empty() {
            return Err(CodecError::InvalidToken("issuer must not be empty"));
        }
        if self.not_before > self.expiration {
            return Err(CodecError::InvalidToken("not_before is after expiration"));
        }
        self.role()?;
        self.mep_type()?;
        self.ack_mode()?;
        for key in [EXT_MAX_THRESHOLD, EXT_MSG_THRESHOLD] {
            match self.extensions.get_u64(key) {
                Some(v) if v <= u64::from(u16::MAX) => {}
                Some(_) => return Err(CodecError::InvalidToken("threshold exceeds u16 range")),
                None => return Err(CodecError::InvalidToken("missing threshold extension")),
            }
        }
        if let Some(sig) = self.extensions.get(EXT_SIGNATURE) {
            match sig {
                ExtValue::Bytes(b) if b.len() == 64 => {}
                _ => return Err(CodecError::InvalidToken("signature must be 64 bytes")),
            }
        }
        Ok(())
    }

    /// Whether the issuer advertises itself as a sender or a receiver.
    pub fn role(&self) -> Result<Role, CodecError> {
        self.extensions
            .get_str(EXT_ROLE)
            .and_then(Role::parse)
            .ok_or(CodecError::InvalidToken("missing or unknown role extension"))
    }

    pub fn mep_type(&self) -> Result<MepType, CodecError> {
        let raw = self
            .extensions
            .get_u64(EXT_MEP_TYPE)
            .ok_or(CodecError::InvalidToken("missing mep_type extension"))?;
        let bits =
            u16::try_from(raw).map_err(|_| CodecError::InvalidToken("mep_type out of range"))?;
        Ok(MepType::from_bits(bits)?)
    }

    pub fn ack_mode(&self) -> Result<AckMode, CodecError> {
        let raw = self.extensions.get_u64(EXT_ACK_MODE).unwrap_or(0);
        let value =
            u8::try_from(raw).map_err(|_| CodecError::InvalidToken("ack_mode out of range"))?;
        Ok(AckMode::from_u8(value)?)
    }

    pub fn max_threshold(&self) -> u16 {
        self.threshold(EXT_MAX_THRESHOLD)
    }

    pub fn msg_threshold(&self) -> u16 {
        self.threshold(EXT_MSG_THRESHOLD)
    }

    pub fn set_msg_threshold(&mut self, value: u16) {
        self.extensions
            .insert(EXT_MSG_THRESHOLD, ExtValue::U64(u64::from(value)));
    }

    fn threshold(&self, key: &str) -> u16 {
        self.extensions
            .get_u64(key)
            .map(|v| u16::try_from(v).unwrap_or(u16::MAX))
            .unwrap_or(0)
    }

    /// Routing hint naming the node that should receive deliveries.
    pub fn target_node(&self) -> Option<&str> {
        self.extensions.get_str(EXT_TARGET_NODE)
    }

    /// Where deliveries for this capability go: `target_node`, else the issuer.
    pub fn destination(&self) -> &str {
        self.target_node().unwrap_or(&self.issuer)
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.extensions.get_bytes(EXT_SIGNATURE)
    }

    pub fn set_signature(&mut self, signature: [u8; 64]) {
        self.extensions
            .insert(EXT_SIGNATURE, ExtValue::Bytes(signature.to_vec()));
    }

    /// Digest signed by the issuer.
    ///
    /// Field order: realm, issuer, subject, audience, uuid, public_key,
    /// issued_at, not_before, expiration, then every extension except
    /// `msg_threshold` and `signature` in key order. Each field is
    /// length-prefixed.
    pub fn signing_digest(&self) -> [u8; 32] {
        let mut hasher = FieldHasher::new(TOKEN_DIGEST_DOMAIN);
        hasher
            .field(self.realm.as_bytes())
            .field(self.issuer.as_bytes())
            .field(self.subject.as_bytes())
            .field(self.audience.as_bytes())
            .field(self.uuid.as_bytes())
            .field(&self.public_key)
            .field_u64(self.issued_at)
            .field_u64(self.not_before)
            .field_u64(self.expiration);
        for (key, value) in self.extensions.iter() {
            if key == EXT_MSG_THRESHOLD || key == EXT_SIGNATURE {
                continue;
            }
            hasher.field(key.as_bytes());
            value.digest_into(&mut hasher);
        }
        hasher.finish()
    }
}

/// Encodes a token as CBOR after validation.
pub fn encode_token_cbor(token: &CapabilityToken) -> Result<Vec<u8>, CodecError> {
    token.validate()?;
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(token, &mut bytes)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes and validates a CBOR token.
pub fn decode_token_cbor(bytes: &[u8]) -> Result<CapabilityToken, CodecError> {
    let token: CapabilityToken =
        ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
    token.validate()?;
    Ok(token)
}
