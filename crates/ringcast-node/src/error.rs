use ringcast_codec::CodecError;
use ringcast_crypto::session::SessionError;
use ringcast_transport::TransportError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by node entry points.
///
/// Invalid tokens and full caches are not errors; they show up as `false`
/// and [`crate::PublishOutcome::Rejected`] respectively.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A ledger, property or table lock was not acquired within the
    /// configured bound. Retryable.
    #[error("timed out acquiring {what} lock")]
    LockTimeout { what: &'static str },
    #[error("no rendezvous node known for subject {0}")]
    NoRendezvous(String),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl NodeError {
    /// Whether repeating the call may succeed without other changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NodeError::LockTimeout { .. } | NodeError::NoRendezvous(_) | NodeError::Transport(_)
        )
    }
}
