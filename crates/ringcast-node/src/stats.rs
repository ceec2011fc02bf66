use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`NodeStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatsSnapshot {
    /// `publish` calls that reached the delivery path.
    pub published: u64,
    /// Messages sealed and handed to the transport, including drains.
    pub delivered: u64,
    pub buffered: u64,
    pub rejected: u64,
    /// Cached messages evicted by an overflow purge or their ttl.
    pub purged: u64,
    pub tokens_accepted: u64,
    /// Inbound tokens dropped for a bad signature, expiry or exhaustion.
    pub tokens_rejected: u64,
    pub acks_matched: u64,
    pub acks_expired: u64,
    pub inbound_delivered: u64,
    pub duplicates: u64,
    /// Inbound messages without a matching sender capability.
    pub unauthorized: u64,
}

/// Lock-free counters shared by all entry points of a node.
#[derive(Debug, Default)]
pub struct NodeStats {
    pub(crate) published: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) buffered: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) purged: AtomicU64,
    pub(crate) tokens_accepted: AtomicU64,
    pub(crate) tokens_rejected: AtomicU64,
    pub(crate) acks_matched: AtomicU64,
    pub(crate) acks_expired: AtomicU64,
    pub(crate) inbound_delivered: AtomicU64,
    pub(crate) duplicates: AtomicU64,
    pub(crate) unauthorized: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl NodeStats {
    pub fn snapshot(&self) -> NodeStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        NodeStatsSnapshot {
            published: load(&self.published),
            delivered: load(&self.delivered),
            buffered: load(&self.buffered),
            rejected: load(&self.rejected),
            purged: load(&self.purged),
            tokens_accepted: load(&self.tokens_accepted),
            tokens_rejected: load(&self.tokens_rejected),
            acks_matched: load(&self.acks_matched),
            acks_expired: load(&self.acks_expired),
            inbound_delivered: load(&self.inbound_delivered),
            duplicates: load(&self.duplicates),
            unauthorized: load(&self.unauthorized),
        }
    }
}
