use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Key = (String, NaiveDate);

/// Per-user, per-day critical sections for attendance settlement.
///
/// The eligibility guard reads "entries so far today" and the store writes the
/// new entry; both must happen under one lock for the same person and day, or
/// two concurrent attempts can both observe zero entries and both be accepted.
/// Different users and different days never contend.
///
/// Idle keys are pruned on every acquire, so the map only holds keys that are
/// currently locked or waited on.
#[derive(Clone, Default)]
pub struct EntryLocks {
    locks: Arc<Mutex<HashMap<Key, Arc<AsyncMutex<()>>>>>,
}

impl EntryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `(user, day)`. Released when the guard drops.
    pub async fn acquire(&self, user: &str, day: NaiveDate) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((user.to_string(), day))
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        if lock.try_lock().is_err() {
            tracing::debug!(user, %day, "entry lock contended, waiting");
        }
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .map(|locks| locks.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }
}
