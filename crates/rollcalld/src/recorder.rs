use chrono::{DateTime, Local, Utc};
use rollcall_core::{evaluate, AttendanceDecision, VerificationOutcome};

use crate::entry_lock::EntryLocks;
use crate::store::{AttendanceStore, StoreError};

/// Turns terminal verification outcomes into persisted attendance decisions.
#[derive(Clone)]
pub struct Recorder {
    store: AttendanceStore,
    locks: EntryLocks,
    max_daily_entries: u32,
}

impl Recorder {
    pub fn new(store: AttendanceStore, max_daily_entries: u32) -> Self {
        Self {
            store,
            locks: EntryLocks::new(),
            max_daily_entries,
        }
    }

    pub fn store(&self) -> &AttendanceStore {
        &self.store
    }

    /// Count today's entries, apply the eligibility policy and persist the
    /// result, all under the candidate's per-day lock.
    ///
    /// The attendance day is the local calendar date of `now`.
    pub async fn settle(
        &self,
        outcome: &VerificationOutcome,
        now: DateTime<Utc>,
    ) -> Result<AttendanceDecision, StoreError> {
        let day = now.with_timezone(&Local).date_naive();

        let (_guard, prior_entries) = match outcome.candidate_id.as_deref() {
            Some(user) => {
                let guard = self.locks.acquire(user, day).await;
                let prior = self.store.count_accepted(user, day).await?;
                (Some(guard), prior)
            }
            None => (None, 0),
        };

        let decision = evaluate(outcome, prior_entries, self.max_daily_entries, day, now);
        self.store.record(&decision).await?;

        tracing::info!(
            attempt_id = %decision.attempt_id,
            user = ?decision.user_id,
            %day,
            prior_entries,
            outcome = decision.outcome.as_str(),
            reason = ?decision.reason,
            "attendance decision recorded"
        );
        Ok(decision)
    }
}
