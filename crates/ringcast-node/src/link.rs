use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::error::NodeError;
use crate::sync::lock_within;

/// Samples kept in the success and latency windows.
pub const SUCCESS_WINDOW: usize = 10;

/// Delivery quality observed towards one destination node.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStats {
    success_window: [u8; SUCCESS_WINDOW],
    success_index: usize,
    latency_window: [u64; SUCCESS_WINDOW],
    latency_samples: usize,
    /// Mean of the success window, in `[0.0, 1.0]`.
    pub success_avg: f32,
    /// Mean of the recorded latency samples, in millis.
    pub latency_ms: u64,
    pub last_success_ms: Option<u64>,
}

impl Default for LinkStats {
    /// Half failures, half successes: an unknown link starts at 0.5.
    fn default() -> Self {
        let mut success_window = [0_u8; SUCCESS_WINDOW];
        for slot in success_window.iter_mut().skip(SUCCESS_WINDOW / 2) {
            *slot = 1;
        }
        Self {
            success_window,
            success_index: 0,
            latency_window: [0; SUCCESS_WINDOW],
            latency_samples: 0,
            success_avg: 0.5,
            latency_ms: 0,
            last_success_ms: None,
        }
    }
}

impl LinkStats {
    pub fn record_outcome(&mut self, success: bool, now_ms: u64) {
        self.success_window[self.success_index % SUCCESS_WINDOW] = u8::from(success);
        self.success_index = self.success_index.wrapping_add(1);
        let total: u32 = self.success_window.iter().map(|v| u32::from(*v)).sum();
        self.success_avg = total as f32 / SUCCESS_WINDOW as f32;
        if success {
            self.last_success_ms = Some(now_ms);
        }
    }

    /// Adds a latency sample; zero samples carry no information.
    pub fn record_latency(&mut self, latency_ms: u64) {
        if latency_ms == 0 {
            return;
        }
        self.latency_window[self.latency_samples % SUCCESS_WINDOW] = latency_ms;
        self.latency_samples = self.latency_samples.saturating_add(1);
        let filled = self.latency_samples.min(SUCCESS_WINDOW);
        let total: u64 = self.latency_window[..filled].iter().sum();
        self.latency_ms = total / filled as u64;
    }
}

/// Per-destination link statistics of one node.
#[derive(Debug)]
pub struct LinkTable {
    links: Mutex<HashMap<String, LinkStats>>,
    lock_timeout: Duration,
}

impl LinkTable {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Records one transmission outcome and, when acked, its latency.
    pub fn record(
        &self,
        destination: &str,
        success: bool,
        latency_ms: Option<u64>,
        now_ms: u64,
    ) -> Result<(), NodeError> {
        let mut links = lock_within(&self.links, self.lock_timeout, "links")?;
        let stats = links.entry(destination.to_string()).or_default();
        stats.record_outcome(success, now_ms);
        if let Some(latency) = latency_ms {
            stats.record_latency(latency);
        }
        info!(
            destination,
            success_avg = stats.success_avg,
            latency_ms = stats.latency_ms,
            "link statistics updated"
        );
        Ok(())
    }

    pub fn get(&self, destination: &str) -> Result<Option<LinkStats>, NodeError> {
        let links = lock_within(&self.links, self.lock_timeout, "links")?;
        Ok(links.get(destination).cloned())
    }
}
