use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::error::NodeError;
use crate::node::Node;
use crate::sync::lock_within;

/// Callback run by the queue with the tick's `now_ms`.
pub type JobFn = Box<dyn FnMut(u64) -> Result<(), NodeError> + Send>;

/// Priority of the maintenance job; lower values run first within a tick.
pub const MAINTENANCE_PRIORITY: u8 = 1;
pub const ADVERTISE_PRIORITY: u8 = 2;

struct Job {
    id: u64,
    name: &'static str,
    due_ms: u64,
    priority: u8,
    period_ms: Option<u64>,
    callback: JobFn,
}

impl Job {
    fn key(&self) -> (u64, u8, u64) {
        (self.due_ms, self.priority, self.id)
    }
}

// Min-heap on (due, priority, id).
impl Ord for Job {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Job {}

/// Delayed and periodic callbacks driven by an explicit clock.
///
/// Callbacks never run under the queue lock, so a job may schedule more
/// jobs. Several threads may call [`JobQueue::run_due`] concurrently; each
/// due job is taken by exactly one of them.
pub struct JobQueue {
    jobs: Mutex<BinaryHeap<Job>>,
    next_id: AtomicU64,
    lock_timeout: Duration,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            jobs: Mutex::new(BinaryHeap::new()),
            next_id: AtomicU64::new(1),
            lock_timeout,
        }
    }

    /// Queues `callback` to run `delay_ms` after `now_ms`.
    ///
    /// A periodic job is re-queued `delay_ms` after each run, whether the
    /// run failed or not.
    pub fn schedule(
        &self,
        name: &'static str,
        delay_ms: u64,
        priority: u8,
        periodic: bool,
        now_ms: u64,
        callback: JobFn,
    ) -> Result<u64, NodeError> {
        if periodic && delay_ms == 0 {
            return Err(ConfigError::Invalid("periodic job needs a non-zero period").into());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            id,
            name,
            due_ms: now_ms.saturating_add(delay_ms),
            priority,
            period_ms: periodic.then_some(delay_ms),
            callback,
        };
        self.lock()?.push(job);
        Ok(id)
    }

    /// Drops a queued job. Returns `false` if it was not queued, which
    /// includes a job that is running right now.
    pub fn cancel(&self, id: u64) -> Result<bool, NodeError> {
        let mut jobs = self.lock()?;
        let before = jobs.len();
        jobs.retain(|job| job.id != id);
        Ok(jobs.len() != before)
    }

    /// Runs every job due at `now_ms`, lowest priority value first.
    /// Returns how many ran.
    pub fn run_due(&self, now_ms: u64) -> Result<usize, NodeError> {
        let mut due = Vec::new();
        {
            let mut jobs = self.lock()?;
            while jobs.peek().is_some_and(|job| job.due_ms <= now_ms) {
                if let Some(job) = jobs.pop() {
                    due.push(job);
                }
            }
        }
        due.sort_by_key(|job| (job.priority, job.due_ms, job.id));

        let ran = due.len();
        let mut requeue = Vec::new();
        for mut job in due {
            if let Err(err) = (job.callback)(now_ms) {
                warn!(job = job.name, %err, retryable = err.is_retryable(), "scheduled job failed");
            }
            if let Some(period) = job.period_ms {
                job.due_ms = now_ms.saturating_add(period);
                requeue.push(job);
            }
        }
        if !requeue.is_empty() {
            self.lock()?.extend(requeue);
        }
        if ran > 0 {
            debug!(ran, now_ms, "ran due jobs");
        }
        Ok(ran)
    }

    /// Due time of the earliest queued job.
    pub fn next_due_ms(&self) -> Result<Option<u64>, NodeError> {
        Ok(self.lock()?.peek().map(|job| job.due_ms))
    }

    pub fn len(&self) -> Result<usize, NodeError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, NodeError> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, BinaryHeap<Job>>, NodeError> {
        lock_within(&self.jobs, self.lock_timeout, "job_queue")
    }
}

/// Registers the node's periodic maintenance and advertisement jobs.
pub fn install_node_jobs(queue: &JobQueue, node: Arc<Node>, now_ms: u64) -> Result<(), NodeError> {
    let config = node.config();
    let maintenance_ms = config.maintenance_interval_ms;
    let refresh_ms = config.token_refresh_ms;

    let maintained = Arc::clone(&node);
    queue.schedule(
        "maintenance",
        maintenance_ms,
        MAINTENANCE_PRIORITY,
        true,
        now_ms,
        Box::new(move |now| maintained.tick_maintenance(now).map(|_| ())),
    )?;
    queue.schedule(
        "advertise",
        refresh_ms,
        ADVERTISE_PRIORITY,
        true,
        now_ms,
        Box::new(move |now| node.tick_advertise(now).map(|_| ())),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use ringcast_core::{KeyPoint, Role};
    use ringcast_crypto::signing::{Ed25519Signer, Signer};
    use ringcast_transport::{InMemoryNetwork, Rendezvous};

    use super::{install_node_jobs, JobFn, JobQueue};
    use crate::config::NodeConfig;
    use crate::error::NodeError;
    use crate::node::Node;
    use crate::property::MessageProperty;
    use crate::token::node_id_for;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn recording(log: &Arc<Mutex<Vec<(&'static str, u64)>>>, name: &'static str) -> JobFn {
        let log = Arc::clone(log);
        Box::new(move |now| {
            log.lock().push((name, now));
            Ok(())
        })
    }

    #[test]
    fn one_shot_job_runs_once_when_due() {
        let queue = JobQueue::new(TIMEOUT);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue
            .schedule("once", 100, 5, false, 0, recording(&log, "once"))
            .expect("schedule");

        assert_eq!(queue.run_due(99).expect("run"), 0);
        assert_eq!(queue.run_due(100).expect("run"), 1);
        assert_eq!(queue.run_due(500).expect("run"), 0);
        assert_eq!(*log.lock(), vec![("once", 100)]);
        assert!(queue.is_empty().expect("len"));
    }

    #[test]
    fn due_jobs_run_in_priority_order() {
        let queue = JobQueue::new(TIMEOUT);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue
            .schedule("low", 10, 9, false, 0, recording(&log, "low"))
            .expect("schedule");
        queue
            .schedule("high", 20, 0, false, 0, recording(&log, "high"))
            .expect("schedule");
        queue
            .schedule("mid", 10, 5, false, 0, recording(&log, "mid"))
            .expect("schedule");

        assert_eq!(queue.run_due(20).expect("run"), 3);
        let names: Vec<_> = log.lock().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["high", "mid", "low"]);
    }

    #[test]
    fn periodic_job_requeues_after_failure() {
        let queue = JobQueue::new(TIMEOUT);
        let runs = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&runs);
        queue
            .schedule(
                "flaky",
                314,
                1,
                true,
                0,
                Box::new(move |_| {
                    *counter.lock() += 1;
                    Err(NodeError::LockTimeout { what: "test" })
                }),
            )
            .expect("schedule");

        assert_eq!(queue.run_due(314).expect("run"), 1);
        assert_eq!(queue.next_due_ms().expect("next"), Some(628));
        assert_eq!(queue.run_due(628).expect("run"), 1);
        assert_eq!(*runs.lock(), 2);
        assert_eq!(queue.len().expect("len"), 1);
    }

    #[test]
    fn zero_period_is_rejected() {
        let queue = JobQueue::new(TIMEOUT);
        let err = queue
            .schedule("spin", 0, 1, true, 0, Box::new(|_| Ok(())))
            .expect_err("zero period");
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn cancelled_job_never_runs() {
        let queue = JobQueue::new(TIMEOUT);
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = queue
            .schedule("gone", 10, 1, true, 0, recording(&log, "gone"))
            .expect("schedule");
        assert!(queue.cancel(id).expect("cancel"));
        assert!(!queue.cancel(id).expect("cancel"));
        assert_eq!(queue.run_due(1_000).expect("run"), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn jobs_may_schedule_follow_ups() {
        let queue = Arc::new(JobQueue::new(TIMEOUT));
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_queue = Arc::clone(&queue);
        let inner_log = Arc::clone(&log);
        queue
            .schedule(
                "parent",
                0,
                1,
                false,
                0,
                Box::new(move |now| {
                    inner_queue
                        .schedule("child", 5, 1, false, now, recording(&inner_log, "child"))
                        .map(|_| ())
                }),
            )
            .expect("schedule");

        assert_eq!(queue.run_due(0).expect("run"), 1);
        assert_eq!(queue.run_due(5).expect("run"), 1);
        assert_eq!(*log.lock(), vec![("child", 5)]);
    }

    struct SelfRendezvous(String);

    impl Rendezvous for SelfRendezvous {
        fn resolve_rendezvous(&self, _point: &KeyPoint) -> Option<String> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn node_jobs_refresh_interests_on_schedule() {
        let network = InMemoryNetwork::new();
        let secret = [7_u8; 32];
        let id = node_id_for(&Ed25519Signer::from_secret(secret).public_key());
        let node = Arc::new(
            Node::new(
                NodeConfig::default(),
                secret,
                Arc::new(network.endpoint(id.clone())),
                Arc::new(SelfRendezvous(id)),
            )
            .expect("node"),
        );
        node.advertise_interest("weather", Role::Receiver, MessageProperty::default(), None, 0)
            .expect("advertise");
        assert_eq!(node.stats().tokens_accepted, 1);

        let queue = JobQueue::new(TIMEOUT);
        install_node_jobs(&queue, Arc::clone(&node), 0).expect("install");
        assert_eq!(queue.len().expect("len"), 2);

        let config = node.config().clone();
        assert_eq!(queue.run_due(config.maintenance_interval_ms).expect("run"), 1);
        assert_eq!(node.stats().tokens_accepted, 1);
        let mut now = config.maintenance_interval_ms;
        while now < config.token_refresh_ms {
            now += config.maintenance_interval_ms;
            queue.run_due(now).expect("run");
        }
        assert_eq!(node.stats().tokens_accepted, 2);
        assert_eq!(queue.len().expect("len"), 2);
    }
}
