//! Engine tunables.
//!
//! Every threshold the engine uses is a named field here. The defaults are a
//! calibration starting point for a 30 fps webcam and a 68/478-point landmark
//! model; they should be re-tuned against representative recordings (see
//! `rollcall ear`) rather than treated as fixed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("close_threshold must be a finite value in (0, 1], got {0}")]
    CloseThreshold(f32),
    #[error("min_closed_frames must be at least 1")]
    MinClosedFrames,
    #[error("liveness duration budget must be non-zero")]
    LivenessBudget,
    #[error("min_identity_confidence must be in [0, 1], got {0}")]
    IdentityConfidence(f32),
    #[error("attempt budget ({attempt_ms} ms) is shorter than one liveness session ({liveness_ms} ms)")]
    AttemptBudget { attempt_ms: u128, liveness_ms: u128 },
    #[error("max_daily_entries must be at least 1")]
    MaxDailyEntries,
}

/// Debounce parameters for [`crate::blink::BlinkDetector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    /// Combined openness ratio below which the eyes count as shut.
    pub close_threshold: f32,
    /// Consecutive below-threshold frames before a closure is accepted.
    pub min_closed_frames: u32,
    /// Minimum spacing between two counted blinks.
    #[serde(with = "millis", rename = "cooldown_ms")]
    pub cooldown: Duration,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            close_threshold: 0.21,
            min_closed_frames: 2,
            cooldown: Duration::from_millis(300),
        }
    }
}

/// Budget for one blink challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub min_blinks_required: u32,
    #[serde(with = "millis", rename = "duration_budget_ms")]
    pub duration_budget: Duration,
    /// How long the face may be missing before the session fails.
    #[serde(with = "millis", rename = "face_lost_grace_ms")]
    pub face_lost_grace: Duration,
    pub blink: BlinkConfig,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            min_blinks_required: 2,
            duration_budget: Duration::from_secs(10),
            face_lost_grace: Duration::from_millis(1500),
            blink: BlinkConfig::default(),
        }
    }
}

/// Identity thresholds and retry policy for one verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub min_identity_confidence: f32,
    pub max_verification_retries: u32,
    /// Absolute budget for the whole attempt, retries included.
    #[serde(with = "millis", rename = "attempt_wall_clock_budget_ms")]
    pub attempt_wall_clock_budget: Duration,
    pub liveness: LivenessConfig,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            min_identity_confidence: 0.6,
            max_verification_retries: 1,
            attempt_wall_clock_budget: Duration::from_secs(30),
            liveness: LivenessConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityConfig {
    pub max_daily_entries: u32,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            max_daily_entries: 1,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub verification: VerificationConfig,
    pub eligibility: EligibilityConfig,
}

impl EngineConfig {
    /// Reject combinations that would make every attempt fail or never finish.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let verification = &self.verification;
        let liveness = &verification.liveness;
        let blink = &liveness.blink;

        if !blink.close_threshold.is_finite()
            || blink.close_threshold <= 0.0
            || blink.close_threshold > 1.0
        {
            return Err(ConfigError::CloseThreshold(blink.close_threshold));
        }
        if blink.min_closed_frames == 0 {
            return Err(ConfigError::MinClosedFrames);
        }
        if liveness.duration_budget.is_zero() {
            return Err(ConfigError::LivenessBudget);
        }
        if !(0.0..=1.0).contains(&verification.min_identity_confidence) {
            return Err(ConfigError::IdentityConfidence(
                verification.min_identity_confidence,
            ));
        }
        if verification.attempt_wall_clock_budget < liveness.duration_budget {
            return Err(ConfigError::AttemptBudget {
                attempt_ms: verification.attempt_wall_clock_budget.as_millis(),
                liveness_ms: liveness.duration_budget.as_millis(),
            });
        }
        if self.eligibility.max_daily_entries == 0 {
            return Err(ConfigError::MaxDailyEntries);
        }
        Ok(())
    }
}

/// Durations are written as integer milliseconds in config files.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
