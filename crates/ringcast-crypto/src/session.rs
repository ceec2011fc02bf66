//! Per-recipient payload sealing.
//!
//! A capability token carries its issuer's Ed25519 public key. The sender
//! maps it to its X25519 form, agrees on a shared secret with a fresh
//! ephemeral scalar and encrypts with XChaCha20-Poly1305 under a key derived
//! from that secret. The recipient repeats the agreement with its own
//! identity scalar.
//!
//! The associated data binds each payload to its subject point and message
//! id, so a ciphertext lifted into another subject or message fails to open.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use curve25519_dalek::montgomery::MontgomeryPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use ringcast_core::hash::FieldHasher;
use ringcast_core::KeyPoint;
use thiserror::Error;

use crate::signing::{verifying_key, Ed25519Signer, Signer, SigningError};

const SESSION_KEY_DOMAIN: &[u8] = b"ringcast/session-key/v1";

/// Associated data length: subject point then message id.
pub const MESSAGE_AAD_LEN: usize = 48;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("recipient key: {0}")]
    RecipientKey(#[from] SigningError),
    #[error("key agreement produced a low-order shared secret")]
    WeakSharedSecret,
    #[error("payload encryption failed")]
    Seal,
    #[error("payload failed authentication")]
    Open,
}

/// Ciphertext plus the material a recipient needs to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub ephemeral_public: [u8; 32],
    pub nonce: [u8; 24],
    pub ciphertext: Vec<u8>,
}

/// Associated data for a message of the subject at `subject`.
pub fn message_aad(subject: &KeyPoint, message_id: &[u8; 16]) -> [u8; MESSAGE_AAD_LEN] {
    let mut aad = [0_u8; MESSAGE_AAD_LEN];
    aad[..32].copy_from_slice(&subject.to_bytes());
    aad[32..].copy_from_slice(message_id);
    aad
}

fn session_cipher(
    shared: &MontgomeryPoint,
    ephemeral_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> Result<XChaCha20Poly1305, SessionError> {
    if shared.to_bytes() == [0_u8; 32] {
        return Err(SessionError::WeakSharedSecret);
    }
    let mut hasher = FieldHasher::new(SESSION_KEY_DOMAIN);
    hasher
        .field(shared.as_bytes())
        .field(ephemeral_public)
        .field(recipient_public);
    let key = hasher.finish();
    Ok(XChaCha20Poly1305::new(Key::from_slice(&key)))
}

/// Seals `plaintext` for the holder of `recipient_public`.
pub fn seal(
    recipient_public: &[u8; 32],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<SealedPayload, SessionError> {
    let recipient = verifying_key(recipient_public)?.to_montgomery();

    let mut ephemeral_secret = [0_u8; 32];
    OsRng.fill_bytes(&mut ephemeral_secret);
    let mut nonce = [0_u8; 24];
    OsRng.fill_bytes(&mut nonce);

    let ephemeral_public = MontgomeryPoint::mul_base_clamped(ephemeral_secret).to_bytes();
    let shared = recipient.mul_clamped(ephemeral_secret);
    let cipher = session_cipher(&shared, &ephemeral_public, recipient_public)?;
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| SessionError::Seal)?;
    Ok(SealedPayload {
        ephemeral_public,
        nonce,
        ciphertext,
    })
}

/// Opens a payload sealed for `identity`.
pub fn open(
    identity: &Ed25519Signer,
    sealed: &SealedPayload,
    aad: &[u8],
) -> Result<Vec<u8>, SessionError> {
    let ephemeral = MontgomeryPoint(sealed.ephemeral_public);
    let shared = ephemeral.mul_clamped(identity.x25519_scalar_bytes());
    let cipher = session_cipher(&shared, &sealed.ephemeral_public, &identity.public_key())?;
    cipher
        .decrypt(
            XNonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad,
            },
        )
        .map_err(|_| SessionError::Open)
}

#[cfg(test)]
mod tests {
    use ringcast_core::KeyPoint;

    use super::{message_aad, open, seal, SessionError};
    use crate::signing::{Ed25519Signer, Signer};

    const MESSAGE_ID: [u8; 16] = [0x5A; 16];

    fn weather_aad() -> [u8; 48] {
        message_aad(&KeyPoint::from_string("weather"), &MESSAGE_ID)
    }

    #[test]
    fn aad_is_subject_point_then_message_id() {
        let subject = KeyPoint::from_string("weather");
        let aad = message_aad(&subject, &MESSAGE_ID);
        assert_eq!(&aad[..32], &subject.to_bytes());
        assert_eq!(&aad[32..], &MESSAGE_ID);
    }

    #[test]
    fn capability_holder_opens_the_payload() {
        let receiver = Ed25519Signer::from_secret([0x31_u8; 32]);
        let sealed = seal(&receiver.public_key(), &weather_aad(), b"sunny").expect("seal");
        assert_eq!(open(&receiver, &sealed, &weather_aad()).expect("open"), b"sunny");
    }

    #[test]
    fn payload_moved_to_another_subject_fails() {
        let receiver = Ed25519Signer::from_secret([0x31_u8; 32]);
        let sealed = seal(&receiver.public_key(), &weather_aad(), b"sunny").expect("seal");
        let swapped = message_aad(&KeyPoint::from_string("alerts"), &MESSAGE_ID);
        assert_eq!(open(&receiver, &sealed, &swapped), Err(SessionError::Open));
    }

    #[test]
    fn payload_replayed_under_another_message_id_fails() {
        let receiver = Ed25519Signer::from_secret([0x31_u8; 32]);
        let sealed = seal(&receiver.public_key(), &weather_aad(), b"sunny").expect("seal");
        let replayed = message_aad(&KeyPoint::from_string("weather"), &[0x01; 16]);
        assert_eq!(open(&receiver, &sealed, &replayed), Err(SessionError::Open));
    }

    #[test]
    fn other_node_cannot_open() {
        let receiver = Ed25519Signer::from_secret([0x31_u8; 32]);
        let bystander = Ed25519Signer::from_secret([0x32_u8; 32]);
        let sealed = seal(&receiver.public_key(), &weather_aad(), b"secret").expect("seal");
        assert_eq!(open(&bystander, &sealed, &weather_aad()), Err(SessionError::Open));
    }

    #[test]
    fn each_seal_uses_a_fresh_ephemeral_key() {
        let receiver = Ed25519Signer::from_secret([0x07_u8; 32]);
        let a = seal(&receiver.public_key(), &weather_aad(), b"m").expect("seal");
        let b = seal(&receiver.public_key(), &weather_aad(), b"m").expect("seal");
        assert_ne!(a.ephemeral_public, b.ephemeral_public);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
