//! Daily attendance policy.
//!
//! [`evaluate`] is a pure function of its arguments. It does not serialise
//! concurrent submissions for the same person; callers must read
//! `prior_entries_today`, evaluate and persist under one per-user, per-day
//! critical section, otherwise two attempts can both observe zero entries.
//!
//! Rule order:
//!
//! 1. A recognised candidate who already has `max_daily_entries` entries is
//!    rejected as a duplicate, whatever the verification verdict. The
//!    duplicate check is deterministic and the easiest rejection to explain,
//!    so it wins ties against a biometric failure.
//! 2. An unverified attempt is rejected with its reason mapped onto
//!    low-confidence or liveness-failed.
//! 3. Everything else is accepted.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::{Verdict, VerificationOutcome};
use crate::reason::ReasonCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceOutcome {
    Accepted,
    RejectedDuplicate,
    RejectedLowConfidence,
    RejectedLivenessFailed,
}

impl AttendanceOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::RejectedDuplicate => "rejected_duplicate",
            Self::RejectedLowConfidence => "rejected_low_confidence",
            Self::RejectedLivenessFailed => "rejected_liveness_failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::Accepted,
            Self::RejectedDuplicate,
            Self::RejectedLowConfidence,
            Self::RejectedLivenessFailed,
        ]
        .into_iter()
        .find(|outcome| outcome.as_str() == value)
    }

    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

/// The record handed to persistence. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceDecision {
    pub attempt_id: Uuid,
    pub user_id: Option<String>,
    pub date: NaiveDate,
    pub outcome: AttendanceOutcome,
    /// Precise reason behind a rejection; `None` when accepted.
    pub reason: Option<ReasonCode>,
    pub confidence: f32,
    pub blink_count: u32,
    pub decided_at: DateTime<Utc>,
}

/// Decide whether `outcome` earns an attendance entry on `date`.
pub fn evaluate(
    outcome: &VerificationOutcome,
    prior_entries_today: u32,
    max_daily_entries: u32,
    date: NaiveDate,
    decided_at: DateTime<Utc>,
) -> AttendanceDecision {
    let (result, reason) = classify(outcome, prior_entries_today, max_daily_entries);

    AttendanceDecision {
        attempt_id: outcome.attempt_id,
        user_id: outcome.candidate_id.clone(),
        date,
        outcome: result,
        reason,
        confidence: outcome.confidence,
        blink_count: outcome.blink_count,
        decided_at,
    }
}

fn classify(
    outcome: &VerificationOutcome,
    prior_entries_today: u32,
    max_daily_entries: u32,
) -> (AttendanceOutcome, Option<ReasonCode>) {
    if outcome.candidate_id.is_some() && prior_entries_today >= max_daily_entries {
        return (
            AttendanceOutcome::RejectedDuplicate,
            Some(ReasonCode::RejectedDuplicate),
        );
    }

    match outcome.verdict {
        Verdict::Verified => (AttendanceOutcome::Accepted, None),
        Verdict::Unverified(reason @ ReasonCode::LowIdentityConfidence) => {
            (AttendanceOutcome::RejectedLowConfidence, Some(reason))
        }
        Verdict::Unverified(reason) => (AttendanceOutcome::RejectedLivenessFailed, Some(reason)),
    }
}
