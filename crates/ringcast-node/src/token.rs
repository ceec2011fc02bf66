use std::sync::atomic::{AtomicU16, Ordering};

use ringcast_codec::token::{
    CapabilityToken, ExtValue, Extensions, EXT_ACK_MODE, EXT_MAX_THRESHOLD, EXT_MEP_TYPE,
    EXT_MSG_THRESHOLD, EXT_ROLE, EXT_TARGET_NODE,
};
use ringcast_core::hash::blake3_32;
use ringcast_core::{AckMode, KeyPoint, MepType, Role};
use ringcast_crypto::signing::{Signer, SigningError, Verifier};
use tracing::warn;
use uuid::Uuid;

use crate::error::NodeError;

/// Node id bound to an Ed25519 public key: the hex key point of its hash.
pub fn node_id_for(public_key: &[u8; 32]) -> String {
    KeyPoint::from_bytes(blake3_32(public_key)).to_hex()
}

/// Deterministic token id, so re-minting for the same interest reuses it.
pub fn token_uuid(subject: &str, role: Role, ttl_ms: u64) -> Uuid {
    let name = format!("urn:ringcast:msg:{subject}:{}:{ttl_ms}", role.as_str());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

/// Everything a principal asserts in a fresh capability token.
#[derive(Debug, Clone)]
pub struct TokenClaims {
    pub realm: String,
    pub subject: String,
    pub audience: String,
    pub role: Role,
    pub mep_type: MepType,
    pub ack_mode: AckMode,
    pub max_threshold: u16,
    pub ttl_ms: u64,
    pub target_node: Option<String>,
}

/// Mints and signs a token; the signature is computed last.
pub fn create_token(
    signer: &dyn Signer,
    claims: &TokenClaims,
    now_ms: u64,
) -> Result<CapabilityToken, NodeError> {
    let public_key = signer.public_key();
    let mut extensions = Extensions::new();
    extensions.insert(EXT_ROLE, ExtValue::Str(claims.role.as_str().to_string()));
    extensions.insert(
        EXT_MEP_TYPE,
        ExtValue::U64(u64::from(claims.mep_type.bits())),
    );
    extensions.insert(
        EXT_ACK_MODE,
        ExtValue::U64(u64::from(claims.ack_mode.to_u8())),
    );
    extensions.insert(
        EXT_MAX_THRESHOLD,
        ExtValue::U64(u64::from(claims.max_threshold)),
    );
    extensions.insert(EXT_MSG_THRESHOLD, ExtValue::U64(0));
    if let Some(target) = &claims.target_node {
        extensions.insert(EXT_TARGET_NODE, ExtValue::Str(target.clone()));
    }

    let mut token = CapabilityToken {
        realm: claims.realm.clone(),
        issuer: node_id_for(&public_key),
        subject: claims.subject.clone(),
        audience: claims.audience.clone(),
        issued_at: now_ms,
        not_before: now_ms,
        expiration: now_ms.saturating_add(claims.ttl_ms),
        public_key,
        uuid: token_uuid(&claims.subject, claims.role, claims.ttl_ms),
        extensions,
    };
    token.validate()?;
    let signature = signer.sign_digest(&token.signing_digest());
    token.set_signature(signature);
    Ok(token)
}

/// Checks the signature and that the issuer is the key's node id.
pub fn verify_signature(token: &CapabilityToken, verifier: &dyn Verifier) -> bool {
    let Some(signature) = token.signature() else {
        warn!(issuer = %token.issuer, subject = %token.subject, "token carries no signature");
        return false;
    };
    if token.issuer != node_id_for(&token.public_key) {
        warn!(issuer = %token.issuer, subject = %token.subject, "token issuer does not match its key");
        return false;
    }
    match verifier.verify_digest(&token.public_key, &token.signing_digest(), signature) {
        Ok(()) => true,
        Err(SigningError::Mismatch) => {
            warn!(issuer = %token.issuer, subject = %token.subject, "token signature mismatch");
            false
        }
        Err(err) => {
            warn!(issuer = %token.issuer, subject = %token.subject, %err, "token signature unreadable");
            false
        }
    }
}

fn within_window(token: &CapabilityToken, now_ms: u64) -> bool {
    token.not_before <= now_ms && now_ms < token.expiration
}

/// Valid iff the signature verifies, `not_before <= now < expiration` and
/// `msg_threshold < max_threshold`.
pub fn is_valid(token: &CapabilityToken, verifier: &dyn Verifier, now_ms: u64) -> bool {
    within_window(token, now_ms)
        && token.msg_threshold() < token.max_threshold()
        && verify_signature(token, verifier)
}

/// A token as held by a subject ledger.
///
/// The wire token is immutable; consumption is tracked separately so the
/// same `Arc` can be shared with in-flight jobs while the ledger updates it.
#[derive(Debug)]
pub struct LedgerToken {
    token: CapabilityToken,
    signature_ok: bool,
    msg_threshold: AtomicU16,
}

impl LedgerToken {
    /// Verifies the signature once; later validity checks reuse the result.
    pub fn new(token: CapabilityToken, verifier: &dyn Verifier) -> Self {
        let signature_ok = verify_signature(&token, verifier);
        let consumed = token.msg_threshold();
        Self {
            token,
            signature_ok,
            msg_threshold: AtomicU16::new(consumed),
        }
    }

    pub fn token(&self) -> &CapabilityToken {
        &self.token
    }

    pub fn issuer(&self) -> &str {
        &self.token.issuer
    }

    pub fn signature_ok(&self) -> bool {
        self.signature_ok
    }

    pub fn max_threshold(&self) -> u16 {
        self.token.max_threshold()
    }

    pub fn msg_threshold(&self) -> u16 {
        self.msg_threshold.load(Ordering::Acquire)
    }

    pub fn is_valid(&self, now_ms: u64) -> bool {
        self.signature_ok
            && within_window(&self.token, now_ms)
            && self.msg_threshold() < self.max_threshold()
    }

    /// Counts one consumed unit. Callers hold the owning list's lock.
    pub fn consume(&self) -> u16 {
        let previous = self
            .msg_threshold
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_add(1))
            })
            .unwrap_or(u16::MAX);
        previous.saturating_add(1)
    }

    /// Wire copy carrying the current consumption count.
    pub fn snapshot(&self) -> CapabilityToken {
        let mut token = self.token.clone();
        token.set_msg_threshold(self.msg_threshold());
        token
    }
}
