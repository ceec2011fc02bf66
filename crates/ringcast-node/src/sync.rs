use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::warn;

use crate::error::NodeError;

/// Acquires `mutex` within `timeout`, naming the lock on failure.
pub(crate) fn lock_within<'a, T>(
    mutex: &'a Mutex<T>,
    timeout: Duration,
    what: &'static str,
) -> Result<MutexGuard<'a, T>, NodeError> {
    mutex.try_lock_for(timeout).ok_or_else(|| {
        warn!(lock = what, ?timeout, "lock acquisition timed out");
        NodeError::LockTimeout { what }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::lock_within;
    use crate::error::NodeError;

    #[test]
    fn held_lock_times_out_with_name() {
        let mutex = Mutex::new(0_u32);
        let _held = mutex.lock();
        let err = lock_within(&mutex, Duration::from_millis(5), "table")
            .expect_err("held lock must time out");
        assert!(matches!(err, NodeError::LockTimeout { what: "table" }));
    }

    #[test]
    fn free_lock_is_acquired() {
        let mutex = Mutex::new(7_u32);
        let guard = lock_within(&mutex, Duration::from_millis(5), "table").expect("free lock");
        assert_eq!(*guard, 7);
    }
}
