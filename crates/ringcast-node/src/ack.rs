use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use ringcast_core::AckMode;
use tracing::debug;
use uuid::Uuid;

use crate::error::NodeError;
use crate::link::LinkTable;
use crate::sync::lock_within;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Sent,
    Acked,
    Expired,
}

/// Expectation for one transmitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEntry {
    pub destination: String,
    pub ack_mode: AckMode,
    pub expected_acks: u16,
    pub received_acks: u16,
    pub send_time_ms: u64,
    pub expiration_ms: u64,
    pub acked_at_ms: Option<u64>,
    pub state: AckState,
}

/// Outcome counts of one [`AckTracker::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckSweep {
    pub acked: usize,
    pub expired: usize,
}

/// In-flight acknowledgement expectations of one node.
///
/// Bookkeeping only: expiry feeds link statistics but never resends.
#[derive(Debug)]
pub struct AckTracker {
    entries: Mutex<HashMap<Uuid, AckEntry>>,
    lock_timeout: Duration,
}

impl AckTracker {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, HashMap<Uuid, AckEntry>>, NodeError> {
        lock_within(&self.entries, self.lock_timeout, "ack_table")
    }

    /// Registers a transmission; returns `false` when the mode expects no acks.
    pub fn track(
        &self,
        message_id: Uuid,
        destination: &str,
        ack_mode: AckMode,
        hops: u16,
        now_ms: u64,
        timeout_ms: u64,
    ) -> Result<bool, NodeError> {
        let expected_acks = ack_mode.expected_acks(hops);
        if expected_acks == 0 {
            return Ok(false);
        }
        self.lock()?.insert(
            message_id,
            AckEntry {
                destination: destination.to_string(),
                ack_mode,
                expected_acks,
                received_acks: 0,
                send_time_ms: now_ms,
                expiration_ms: now_ms.saturating_add(timeout_ms),
                acked_at_ms: None,
                state: AckState::Sent,
            },
        );
        Ok(true)
    }

    /// Counts one ack; returns the entry's state, or `None` if it did not match.
    ///
    /// For `Destination` acks the source must be the destination itself.
    pub fn on_ack(
        &self,
        message_id: Uuid,
        source: &str,
        now_ms: u64,
    ) -> Result<Option<AckState>, NodeError> {
        let mut entries = self.lock()?;
        let Some(entry) = entries.get_mut(&message_id) else {
            debug!(%message_id, source, "ack for unknown message");
            return Ok(None);
        };
        if entry.state != AckState::Sent {
            return Ok(Some(entry.state));
        }
        if entry.ack_mode == AckMode::Destination && entry.destination != source {
            debug!(%message_id, source, destination = %entry.destination, "ack from unexpected source");
            return Ok(None);
        }
        entry.received_acks = entry.received_acks.saturating_add(1);
        if entry.received_acks >= entry.expected_acks {
            entry.state = AckState::Acked;
            entry.acked_at_ms = Some(now_ms);
        }
        Ok(Some(entry.state))
    }

    /// Expires overdue entries, then removes every settled entry after
    /// feeding its outcome into `links`.
    pub fn sweep(&self, now_ms: u64, links: &LinkTable) -> Result<AckSweep, NodeError> {
        let settled: Vec<(Uuid, AckEntry)> = {
            let mut entries = self.lock()?;
            for entry in entries.values_mut() {
                if entry.state == AckState::Sent && now_ms >= entry.expiration_ms {
                    entry.state = AckState::Expired;
                }
            }
            let ids: Vec<Uuid> = entries
                .iter()
                .filter(|(_, e)| e.state != AckState::Sent)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let mut report = AckSweep::default();
        for (id, entry) in settled {
            match entry.state {
                AckState::Acked => {
                    let latency = entry
                        .acked_at_ms
                        .map(|at| at.saturating_sub(entry.send_time_ms));
                    links.record(&entry.destination, true, latency, now_ms)?;
                    report.acked += 1;
                }
                AckState::Expired => {
                    debug!(message_id = %id, destination = %entry.destination, "ack expired");
                    links.record(&entry.destination, false, None, now_ms)?;
                    report.expired += 1;
                }
                AckState::Sent => {}
            }
        }
        Ok(report)
    }

    pub fn state(&self, message_id: &Uuid) -> Result<Option<AckState>, NodeError> {
        Ok(self.lock()?.get(message_id).map(|entry| entry.state))
    }

    pub fn len(&self) -> Result<usize, NodeError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, NodeError> {
        Ok(self.len()? == 0)
    }
}
