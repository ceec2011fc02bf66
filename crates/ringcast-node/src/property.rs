use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ringcast_codec::Message;
use ringcast_core::{AckMode, CacheOrder, CachePolicy, MepType};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::NodeError;
use crate::sync::lock_within;

/// Per-subject delivery settings supplied when interest is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageProperty {
    pub subject: String,
    pub mep_type: MepType,
    pub ack_mode: AckMode,
    pub cache_policy: CachePolicy,
    /// Capacity advertised in tokens and bound of the pending cache.
    pub max_threshold: u16,
    /// Resubmission budget available to callers after a failed delivery.
    pub retry: u8,
    /// Lifetime of a cached message before it is discarded.
    pub ttl_ms: u64,
    pub priority: u8,
}

impl Default for MessageProperty {
    fn default() -> Self {
        Self {
            subject: String::new(),
            mep_type: MepType::default(),
            ack_mode: AckMode::None,
            cache_policy: CachePolicy::fifo_purge(),
            max_threshold: 5,
            retry: 5,
            ttl_ms: 20_000,
            priority: 5,
        }
    }
}

impl MessageProperty {
    pub fn for_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }
}

/// A message waiting in the pending cache.
#[derive(Debug, Clone)]
pub struct CachedMessage {
    pub message: Arc<Message>,
    pub cached_at_ms: u64,
}

/// Mutable half of a delivery property; only touched under its lock.
#[derive(Debug)]
pub struct DeliveryState {
    pub settings: MessageProperty,
    /// Outstanding reservations plus cached messages.
    pub msg_threshold: u16,
    /// Head is the newest entry, tail the oldest.
    pub cache: VecDeque<CachedMessage>,
    pub last_update_ms: u64,
}

/// Result of the caching branch of the delivery path.
#[derive(Debug, Clone)]
pub enum CacheOutcome {
    Buffered { evicted: Option<Arc<Message>> },
    Rejected,
}

/// Read-only view used by tests and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySnapshot {
    pub msg_threshold: u16,
    pub max_threshold: u16,
    pub cached: Vec<Uuid>,
    pub last_update_ms: u64,
}

/// Inbound or outbound policy of one subject, with its own lock.
#[derive(Debug)]
pub struct DeliveryProperty {
    what: &'static str,
    lock_timeout: Duration,
    state: Mutex<DeliveryState>,
}

impl DeliveryProperty {
    pub fn new(what: &'static str, settings: MessageProperty, lock_timeout: Duration) -> Self {
        Self {
            what,
            lock_timeout,
            state: Mutex::new(DeliveryState {
                settings,
                msg_threshold: 0,
                cache: VecDeque::new(),
                last_update_ms: 0,
            }),
        }
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, DeliveryState>, NodeError> {
        lock_within(&self.state, self.lock_timeout, self.what)
    }

    pub fn settings(&self) -> Result<MessageProperty, NodeError> {
        Ok(self.lock()?.settings.clone())
    }

    /// Replaces the settings; counters and cached messages are kept.
    pub fn configure(&self, settings: MessageProperty, now_ms: u64) -> Result<(), NodeError> {
        let mut state = self.lock()?;
        state.settings = settings;
        state.last_update_ms = now_ms;
        Ok(())
    }

    /// Tentatively reserves one unit of capacity.
    pub fn reserve(&self, now_ms: u64) -> Result<(), NodeError> {
        let mut state = self.lock()?;
        state.msg_threshold = state.msg_threshold.saturating_add(1);
        state.last_update_ms = now_ms;
        Ok(())
    }

    /// Releases one unit previously taken by [`Self::reserve`].
    pub fn release(&self, now_ms: u64) -> Result<(), NodeError> {
        let mut state = self.lock()?;
        state.msg_threshold = state.msg_threshold.saturating_sub(1);
        state.last_update_ms = now_ms;
        Ok(())
    }

    /// Overwrites the unit counter; used when it is re-derived from the
    /// tokens a ledger still holds.
    pub fn set_msg_threshold(&self, value: u16, now_ms: u64) -> Result<(), NodeError> {
        let mut state = self.lock()?;
        state.msg_threshold = value;
        state.last_update_ms = now_ms;
        Ok(())
    }

    /// Caching branch: runs entirely under the property lock.
    ///
    /// Expects the caller to already hold one reservation for `message`.
    /// On `Buffered` the reservation stays with the cached entry; on
    /// `Rejected` it has been released.
    pub fn cache_or_reject(
        &self,
        message: Arc<Message>,
        now_ms: u64,
    ) -> Result<CacheOutcome, NodeError> {
        let mut state = self.lock()?;
        state.last_update_ms = now_ms;
        let max = state.settings.max_threshold;
        let policy = state.settings.cache_policy;

        let mut evicted = None;
        if Self::is_full(&state, max) && policy.purge {
            let victim = match policy.order {
                CacheOrder::Fifo => state.cache.pop_back(),
                CacheOrder::Filo => state.cache.pop_front(),
            };
            if let Some(victim) = victim {
                state.msg_threshold = state.msg_threshold.saturating_sub(1);
                debug!(
                    subject = %message.subject,
                    evicted = %victim.message.id,
                    "pending cache full, purged one entry"
                );
                evicted = Some(victim.message);
            }
        }
        if Self::is_full(&state, max) {
            state.msg_threshold = state.msg_threshold.saturating_sub(1);
            debug!(subject = %message.subject, max, "pending cache full, rejecting message");
            return Ok(CacheOutcome::Rejected);
        }

        state.cache.push_front(CachedMessage {
            message,
            cached_at_ms: now_ms,
        });
        Ok(CacheOutcome::Buffered { evicted })
    }

    /// The caller's own reservation is not counted against the bound.
    fn is_full(state: &DeliveryState, max: u16) -> bool {
        state.msg_threshold.saturating_sub(1) >= max
    }

    /// Removes the oldest cached message, releasing its unit of capacity.
    pub fn pop_oldest(&self, now_ms: u64) -> Result<Option<CachedMessage>, NodeError> {
        let mut state = self.lock()?;
        let entry = state.cache.pop_back();
        if entry.is_some() {
            state.msg_threshold = state.msg_threshold.saturating_sub(1);
            state.last_update_ms = now_ms;
        }
        Ok(entry)
    }

    /// Puts back an entry taken by [`Self::pop_oldest`] that could not be
    /// delivered.
    pub fn restore_oldest(&self, entry: CachedMessage) -> Result<(), NodeError> {
        let mut state = self.lock()?;
        state.msg_threshold = state.msg_threshold.saturating_add(1);
        state.cache.push_back(entry);
        Ok(())
    }

    /// Drops cached messages older than the configured message ttl.
    pub fn expire_cached(&self, now_ms: u64) -> Result<usize, NodeError> {
        let mut state = self.lock()?;
        let ttl = state.settings.ttl_ms;
        let before = state.cache.len();
        state
            .cache
            .retain(|entry| entry.cached_at_ms.saturating_add(ttl) > now_ms);
        let expired = before - state.cache.len();
        if expired > 0 {
            let remaining = state.msg_threshold.saturating_sub(expired as u16);
            state.msg_threshold = remaining;
            state.last_update_ms = now_ms;
        }
        Ok(expired)
    }

    pub fn cached_len(&self) -> Result<usize, NodeError> {
        Ok(self.lock()?.cache.len())
    }

    pub fn last_update_ms(&self) -> Result<u64, NodeError> {
        Ok(self.lock()?.last_update_ms)
    }

    pub fn snapshot(&self) -> Result<PropertySnapshot, NodeError> {
        let state = self.lock()?;
        Ok(PropertySnapshot {
            msg_threshold: state.msg_threshold,
            max_threshold: state.settings.max_threshold,
            cached: state.cache.iter().map(|entry| entry.message.id).collect(),
            last_update_ms: state.last_update_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ringcast_codec::Message;
    use ringcast_core::{AckMode, CacheOrder, CachePolicy};

    use super::{CacheOutcome, DeliveryProperty, MessageProperty};

    fn property(max: u16, policy: CachePolicy) -> DeliveryProperty {
        DeliveryProperty::new(
            "send_property",
            MessageProperty {
                max_threshold: max,
                cache_policy: policy,
                ..MessageProperty::for_subject("weather")
            },
            Duration::from_millis(50),
        )
    }

    fn message() -> Arc<Message> {
        Arc::new(Message::new("weather", "node-a", b"x".to_vec(), AckMode::None))
    }

    fn cache(prop: &DeliveryProperty, now: u64) -> CacheOutcome {
        let msg = message();
        prop.reserve(now).expect("reserve");
        prop.cache_or_reject(msg, now).expect("cache branch")
    }

    #[test]
    fn defaults_match_documented_values() {
        let p = MessageProperty::default();
        assert_eq!(p.max_threshold, 5);
        assert_eq!(p.cache_policy.bits(), CachePolicy::FIFO | CachePolicy::OVERFLOW_PURGE);
        assert_eq!(p.ack_mode, AckMode::None);
        assert_eq!(p.ttl_ms, 20_000);
    }

    #[test]
    fn new_entries_enter_at_the_head() {
        let prop = property(3, CachePolicy::fifo_purge());
        for now in 0..3 {
            assert!(matches!(cache(&prop, now), CacheOutcome::Buffered { evicted: None }));
        }
        let snap = prop.snapshot().expect("snapshot");
        assert_eq!(snap.cached.len(), 3);
        assert_eq!(snap.msg_threshold, 3);
        let oldest = prop.pop_oldest(9).expect("pop").expect("entry");
        assert_eq!(oldest.cached_at_ms, 0);
        assert_eq!(prop.snapshot().expect("snapshot").msg_threshold, 2);
    }

    #[test]
    fn reject_policy_refuses_once_full() {
        let prop = property(2, CachePolicy::reject(CacheOrder::Fifo));
        assert!(matches!(cache(&prop, 1), CacheOutcome::Buffered { .. }));
        assert!(matches!(cache(&prop, 2), CacheOutcome::Buffered { .. }));
        assert!(matches!(cache(&prop, 3), CacheOutcome::Rejected));
        let snap = prop.snapshot().expect("snapshot");
        assert_eq!(snap.cached.len(), 2);
        assert_eq!(snap.msg_threshold, 2);
    }

    #[test]
    fn filo_purge_evicts_the_newest() {
        let prop = property(2, CachePolicy::filo_purge());
        cache(&prop, 1);
        cache(&prop, 2);
        let newest = prop.snapshot().expect("snapshot").cached[0];
        match cache(&prop, 3) {
            CacheOutcome::Buffered { evicted: Some(victim) } => assert_eq!(victim.id, newest),
            other => panic!("expected purge, got {other:?}"),
        }
        assert_eq!(prop.cached_len().expect("len"), 2);
    }

    #[test]
    fn zero_capacity_always_rejects() {
        let prop = property(0, CachePolicy::fifo_purge());
        assert!(matches!(cache(&prop, 1), CacheOutcome::Rejected));
        assert_eq!(prop.snapshot().expect("snapshot").msg_threshold, 0);
    }

    #[test]
    fn expired_entries_release_capacity() {
        let prop = property(5, CachePolicy::fifo_purge());
        cache(&prop, 0);
        cache(&prop, 15_000);
        assert_eq!(prop.expire_cached(20_000).expect("expire"), 1);
        let snap = prop.snapshot().expect("snapshot");
        assert_eq!(snap.cached.len(), 1);
        assert_eq!(snap.msg_threshold, 1);
    }

    #[test]
    fn restore_puts_entry_back_at_the_tail() {
        let prop = property(5, CachePolicy::fifo_purge());
        cache(&prop, 1);
        cache(&prop, 2);
        let oldest = prop.pop_oldest(3).expect("pop").expect("entry");
        let id = oldest.message.id;
        prop.restore_oldest(oldest).expect("restore");
        let snap = prop.snapshot().expect("snapshot");
        assert_eq!(snap.cached.last(), Some(&id));
        assert_eq!(snap.msg_threshold, 2);
    }
}
