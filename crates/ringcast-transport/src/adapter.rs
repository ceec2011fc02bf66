use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Errors returned by transport sends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    #[error("payload of {size} bytes exceeds limit {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Coarse per-endpoint transport health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHealthSnapshot {
    pub outbound_send_ok: u64,
    pub outbound_send_err: u64,
    pub inbound_received: u64,
    pub inbound_dropped: u64,
}

/// Byte-oriented transport contract used by a ringcast node.
///
/// Sends are best effort and may be issued from any worker thread.
pub trait Transport: Send + Sync {
    /// Attempts delivery of a complete frame to `peer`.
    fn send(&self, peer: &str, bytes: &[u8]) -> Result<(), TransportError>;

    /// Optional maximum payload hint.
    fn max_payload_hint(&self) -> Option<usize> {
        None
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot::default()
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    inboxes: HashMap<String, VecDeque<(String, Vec<u8>)>>,
    partitioned: HashSet<String>,
    health: HashMap<String, TransportHealthSnapshot>,
    max_payload: Option<usize>,
}

/// Shared in-process switch connecting any number of endpoints.
///
/// Used by tests and the simulator in place of socket I/O.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a network that rejects frames larger than `max_payload`.
    pub fn with_max_payload(max_payload: usize) -> Self {
        let network = Self::default();
        network.state.lock().max_payload = Some(max_payload);
        network
    }

    /// Registers `id` and returns its sending endpoint.
    pub fn endpoint(&self, id: impl Into<String>) -> InMemoryEndpoint {
        let id = id.into();
        let mut state = self.state.lock();
        state.inboxes.entry(id.clone()).or_default();
        state.health.entry(id.clone()).or_default();
        InMemoryEndpoint {
            id,
            network: self.clone(),
        }
    }

    /// Cuts `id` off: frames to or from it are dropped until healed.
    pub fn set_partitioned(&self, id: &str, partitioned: bool) {
        let mut state = self.state.lock();
        if partitioned {
            state.partitioned.insert(id.to_string());
        } else {
            state.partitioned.remove(id);
        }
    }

    /// Pops the next inbound frame for `id` together with its sender.
    pub fn recv(&self, id: &str) -> Option<(String, Vec<u8>)> {
        let mut state = self.state.lock();
        let frame = state.inboxes.get_mut(id)?.pop_front();
        if frame.is_some() {
            state.health.entry(id.to_string()).or_default().inbound_received += 1;
        }
        frame
    }

    /// Number of frames waiting across all inboxes.
    pub fn pending(&self) -> usize {
        self.state.lock().inboxes.values().map(VecDeque::len).sum()
    }

    fn deliver(&self, from: &str, to: &str, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Some(max) = state.max_payload {
            if bytes.len() > max {
                state.health.entry(from.to_string()).or_default().outbound_send_err += 1;
                return Err(TransportError::PayloadTooLarge {
                    size: bytes.len(),
                    max,
                });
            }
        }
        if !state.inboxes.contains_key(to) {
            state.health.entry(from.to_string()).or_default().outbound_send_err += 1;
            return Err(TransportError::UnknownPeer(to.to_string()));
        }
        if state.partitioned.contains(from) || state.partitioned.contains(to) {
            state.health.entry(to.to_string()).or_default().inbound_dropped += 1;
            debug!(from, to, "dropping frame across partition");
            return Err(TransportError::Unreachable(to.to_string()));
        }
        if let Some(inbox) = state.inboxes.get_mut(to) {
            inbox.push_back((from.to_string(), bytes.to_vec()));
        }
        state.health.entry(from.to_string()).or_default().outbound_send_ok += 1;
        Ok(())
    }

    fn health(&self, id: &str) -> TransportHealthSnapshot {
        self.state.lock().health.get(id).cloned().unwrap_or_default()
    }
}

/// One node's handle onto an [`InMemoryNetwork`].
#[derive(Debug, Clone)]
pub struct InMemoryEndpoint {
    id: String,
    network: InMemoryNetwork,
}

impl InMemoryEndpoint {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Pops the next frame addressed to this endpoint.
    pub fn recv(&self) -> Option<(String, Vec<u8>)> {
        self.network.recv(&self.id)
    }
}

impl Transport for InMemoryEndpoint {
    fn send(&self, peer: &str, bytes: &[u8]) -> Result<(), TransportError> {
        self.network.deliver(&self.id, peer, bytes)
    }

    fn max_payload_hint(&self) -> Option<usize> {
        self.network.state.lock().max_payload
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        self.network.health(&self.id)
    }
}
