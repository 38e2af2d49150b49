use std::fmt;

use serde::{Deserialize, Serialize};

/// Why an attempt did not end in an accepted attendance entry.
///
/// These are expected business outcomes, not faults; they travel as values
/// all the way to the stored [`crate::AttendanceDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// No candidate, or candidate below the identity threshold.
    LowIdentityConfidence,
    /// Not enough blinks within the liveness budget.
    LivenessTimeout,
    /// Face missing for longer than the grace period.
    FaceLost,
    /// Cancelled from outside before a verdict.
    UserCancelled,
    /// The attempt's overall wall-clock budget ran out.
    AttemptTimeout,
    /// Daily entry limit already reached.
    RejectedDuplicate,
}

impl ReasonCode {
    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            Self::LowIdentityConfidence => "low_identity_confidence",
            Self::LivenessTimeout => "liveness_timeout",
            Self::FaceLost => "face_lost",
            Self::UserCancelled => "user_cancelled",
            Self::AttemptTimeout => "attempt_timeout",
            Self::RejectedDuplicate => "rejected_duplicate",
        }
    }

    /// Human-readable category for the presentation layer.
    pub fn category(self) -> &'static str {
        match self {
            Self::LowIdentityConfidence => "Face not recognised",
            Self::LivenessTimeout => "Blink not detected in time",
            Self::FaceLost => "Face left the frame",
            Self::UserCancelled => "Cancelled",
            Self::AttemptTimeout => "Verification took too long",
            Self::RejectedDuplicate => "Already checked in today",
        }
    }

    /// Whether the user should be prompted to try again straight away.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::LivenessTimeout | Self::FaceLost)
    }

    pub fn parse(code: &str) -> Option<Self> {
        [
            Self::LowIdentityConfidence,
            Self::LivenessTimeout,
            Self::FaceLost,
            Self::UserCancelled,
            Self::AttemptTimeout,
            Self::RejectedDuplicate,
        ]
        .into_iter()
        .find(|reason| reason.code() == code)
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
