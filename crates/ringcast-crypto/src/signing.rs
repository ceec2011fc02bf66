//! Node identity keys and capability token signatures.
//!
//! Tokens are signed over a fixed 32-byte digest computed by the codec, so
//! the traits here deal in digests rather than arbitrary messages.
//! Verification uses the strict Ed25519 rules: small-order keys and
//! non-canonical signatures never authorize anything.

use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use thiserror::Error;

/// Length of a token signing digest.
pub const DIGEST_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("public key is not a valid ed25519 point")]
    InvalidPublicKey,
    #[error("signature must be 64 bytes, got {0}")]
    SignatureLength(usize),
    #[error("signature does not match digest and key")]
    Mismatch,
}

/// Holder of a node identity that can sign token digests.
pub trait Signer: Send + Sync {
    fn public_key(&self) -> [u8; 32];
    fn sign_digest(&self, digest: &[u8; DIGEST_LEN]) -> [u8; 64];
}

/// Checks a token digest signature against the issuer's public key.
pub trait Verifier: Send + Sync {
    fn verify_digest(
        &self,
        public_key: &[u8; 32],
        digest: &[u8; DIGEST_LEN],
        signature: &[u8],
    ) -> Result<(), SigningError>;
}

/// Parses an issuer key, rejecting bytes that do not decode to a point.
pub fn verifying_key(public_key: &[u8; 32]) -> Result<VerifyingKey, SigningError> {
    VerifyingKey::from_bytes(public_key).map_err(|_| SigningError::InvalidPublicKey)
}

/// A node's Ed25519 identity.
#[derive(Debug, Clone)]
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&secret),
        }
    }

    /// Unclamped X25519 scalar for opening payloads sealed to this identity.
    pub(crate) fn x25519_scalar_bytes(&self) -> [u8; 32] {
        self.signing_key.to_scalar_bytes()
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn sign_digest(&self, digest: &[u8; DIGEST_LEN]) -> [u8; 64] {
        self.signing_key.sign(digest).to_bytes()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl Verifier for Ed25519Verifier {
    fn verify_digest(
        &self,
        public_key: &[u8; 32],
        digest: &[u8; DIGEST_LEN],
        signature: &[u8],
    ) -> Result<(), SigningError> {
        let key = verifying_key(public_key)?;
        let bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| SigningError::SignatureLength(signature.len()))?;
        key.verify_strict(digest, &Signature::from_bytes(&bytes))
            .map_err(|_| SigningError::Mismatch)
    }
}
