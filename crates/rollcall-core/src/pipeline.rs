//! Identity + liveness verification state machine.
//!
//! ```text
//! AwaitingIdentity ──low confidence──────────────────▶ Decided(Unverified)
//!        │                                                   ▲
//!        └─recognised─▶ AwaitingLiveness ──passed──▶ Decided(Verified)
//!                ▲            │
//!                └──retry─────┤ timeout / face lost
//!                             └──retries exhausted─▶ Decided(Unverified)
//!
//! any non-terminal stage ──wall clock / cancel──▶ Expired
//! ```
//!
//! Only liveness failures are retried, each retry starting over at the
//! identity stage with a brand-new liveness session. A face that is not
//! recognised is never given a blink challenge. The attempt's absolute
//! wall-clock budget bounds the total time across all retries and is checked
//! before every event, so a slow identity call surfaces as `Expired` on the
//! next event rather than blocking the attempt open.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::blink::BlinkPhase;
use crate::config::VerificationConfig;
use crate::geometry::openness_sample;
use crate::liveness::{LivenessSession, LivenessSessionState, LivenessStatus};
use crate::reason::ReasonCode;
use crate::types::{Frame, IdentityMatch};

/// Why an attempt ended without a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    AttemptTimeout,
    UserCancelled,
}

impl ExpiryReason {
    pub fn reason(self) -> ReasonCode {
        match self {
            Self::AttemptTimeout => ReasonCode::AttemptTimeout,
            Self::UserCancelled => ReasonCode::UserCancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Verified,
    Unverified(ReasonCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "detail", rename_all = "snake_case")]
pub enum VerificationStage {
    AwaitingIdentity,
    AwaitingLiveness,
    Decided(Verdict),
    Expired(ExpiryReason),
}

impl VerificationStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Decided(_) | Self::Expired(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AwaitingIdentity => "awaiting_identity",
            Self::AwaitingLiveness => "awaiting_liveness",
            Self::Decided(Verdict::Verified) => "verified",
            Self::Decided(Verdict::Unverified(_)) => "unverified",
            Self::Expired(_) => "expired",
        }
    }
}

/// Terminal result of an attempt, consumed by the eligibility guard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome {
    pub attempt_id: Uuid,
    /// Recognised candidate; `None` when the face was never recognised.
    pub candidate_id: Option<String>,
    pub confidence: f32,
    pub blink_count: u32,
    pub retries_used: u32,
    pub verdict: Verdict,
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        self.verdict == Verdict::Verified
    }
}

/// Progress snapshot for presentation feedback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptProgress {
    pub attempt_id: Uuid,
    pub stage: VerificationStage,
    pub candidate_id: Option<String>,
    pub blink_count: u32,
    pub blinks_required: u32,
    pub blink_phase: Option<BlinkPhase>,
    pub retries_used: u32,
    pub max_retries: u32,
    pub liveness_remaining_ms: Option<u64>,
    pub attempt_remaining_ms: u64,
}

impl AttemptProgress {
    /// Short prompt for the person in front of the camera.
    pub fn message(&self) -> String {
        match self.stage {
            VerificationStage::AwaitingIdentity => "Look at the camera".to_string(),
            VerificationStage::AwaitingLiveness => {
                format!("Blink {} of {}", self.blink_count, self.blinks_required)
            }
            VerificationStage::Decided(Verdict::Verified) => "Verified".to_string(),
            VerificationStage::Decided(Verdict::Unverified(reason)) => {
                reason.category().to_string()
            }
            VerificationStage::Expired(reason) => reason.reason().category().to_string(),
        }
    }
}

/// Factory for verification attempts sharing one configuration.
#[derive(Debug, Clone)]
pub struct VerificationPipeline {
    config: VerificationConfig,
}

impl VerificationPipeline {
    pub fn new(config: VerificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Open a new attempt at `now`. Nothing is carried over from earlier attempts.
    pub fn begin(&self, now: DateTime<Utc>) -> VerificationAttempt {
        VerificationAttempt::new(self.config.clone(), now)
    }
}

/// One end-to-end identity + liveness evaluation, retries included.
#[derive(Debug, Clone)]
pub struct VerificationAttempt {
    attempt_id: Uuid,
    user_candidate_id: Option<String>,
    identity_confidence: f32,
    liveness: Option<LivenessSession>,
    stage: VerificationStage,
    retries_used: u32,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    config: VerificationConfig,
}

impl VerificationAttempt {
    fn new(config: VerificationConfig, now: DateTime<Utc>) -> Self {
        let expires_at = chrono::Duration::from_std(config.attempt_wall_clock_budget)
            .ok()
            .and_then(|budget| now.checked_add_signed(budget))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let attempt_id = Uuid::new_v4();

        tracing::info!(
            attempt_id = %attempt_id,
            expires_at = %expires_at,
            max_retries = config.max_verification_retries,
            "verification attempt started"
        );

        Self {
            attempt_id,
            user_candidate_id: None,
            identity_confidence: 0.0,
            liveness: None,
            stage: VerificationStage::AwaitingIdentity,
            retries_used: 0,
            created_at: now,
            expires_at,
            config,
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn stage(&self) -> &VerificationStage {
        &self.stage
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn user_candidate_id(&self) -> Option<&str> {
        self.user_candidate_id.as_deref()
    }

    pub fn identity_confidence(&self) -> f32 {
        self.identity_confidence
    }

    pub fn retries_used(&self) -> u32 {
        self.retries_used
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// State of the current (or last settled) liveness session, if one was started.
    pub fn liveness_state(&self) -> Option<&LivenessSessionState> {
        self.liveness.as_ref().map(LivenessSession::state)
    }

    /// Apply the external identity match for the face in front of the camera.
    pub fn submit_identity(
        &mut self,
        identity: IdentityMatch,
        now: DateTime<Utc>,
    ) -> &VerificationStage {
        if !self.accepts_events(now) {
            return &self.stage;
        }
        if self.stage != VerificationStage::AwaitingIdentity {
            tracing::debug!(
                attempt_id = %self.attempt_id,
                stage = self.stage.label(),
                "identity ignored outside identity stage"
            );
            return &self.stage;
        }

        let confidence = if identity.confidence.is_finite() {
            identity.confidence
        } else {
            0.0
        };
        self.identity_confidence = confidence;

        match identity.candidate_id {
            Some(candidate) if confidence >= self.config.min_identity_confidence => {
                tracing::info!(
                    attempt_id = %self.attempt_id,
                    candidate = %candidate,
                    confidence,
                    "identity accepted, starting liveness"
                );
                self.user_candidate_id = Some(candidate);
                self.liveness = Some(LivenessSession::start(&self.config.liveness, now));
                self.stage = VerificationStage::AwaitingLiveness;
            }
            candidate => {
                tracing::info!(
                    attempt_id = %self.attempt_id,
                    candidate = ?candidate,
                    confidence,
                    min = self.config.min_identity_confidence,
                    "identity below threshold"
                );
                self.user_candidate_id = None;
                self.decide(Verdict::Unverified(ReasonCode::LowIdentityConfidence));
            }
        }
        &self.stage
    }

    /// Feed one provider frame to the liveness stage.
    pub fn observe_frame(&mut self, frame: &Frame) -> &VerificationStage {
        let now = frame.captured_at;
        match &frame.landmarks {
            Some(face) => {
                let sample = openness_sample(face, now);
                self.drive(now, |session| session.feed_sample(&sample))
            }
            None => self.drive(now, |session| session.face_absent(now)),
        }
    }

    /// Feed a precomputed combined openness ratio.
    pub fn feed_ratio(&mut self, ratio: f32, now: DateTime<Utc>) -> &VerificationStage {
        self.drive(now, |session| session.feed(ratio, now))
    }

    /// Re-check both time budgets without new input.
    pub fn tick(&mut self, now: DateTime<Utc>) -> &VerificationStage {
        self.drive(now, |session| session.poll(now))
    }

    /// Abandon the attempt. Any liveness progress is discarded.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> &VerificationStage {
        if self.accepts_events(now) {
            self.expire(ExpiryReason::UserCancelled);
        }
        &self.stage
    }

    /// Terminal outcome, or `None` while the attempt is still open.
    pub fn outcome(&self) -> Option<VerificationOutcome> {
        let verdict = match self.stage {
            VerificationStage::Decided(verdict) => verdict,
            VerificationStage::Expired(reason) => Verdict::Unverified(reason.reason()),
            _ => return None,
        };

        Some(VerificationOutcome {
            attempt_id: self.attempt_id,
            candidate_id: self.user_candidate_id.clone(),
            confidence: self.identity_confidence,
            blink_count: self.liveness_state().map_or(0, |state| state.blink_count),
            retries_used: self.retries_used,
            verdict,
        })
    }

    pub fn progress(&self, now: DateTime<Utc>) -> AttemptProgress {
        let session = self.liveness.as_ref();
        let live = session.filter(|_| self.stage == VerificationStage::AwaitingLiveness);

        AttemptProgress {
            attempt_id: self.attempt_id,
            stage: self.stage,
            candidate_id: self.user_candidate_id.clone(),
            blink_count: session.map_or(0, |s| s.state().blink_count),
            blinks_required: self.config.liveness.min_blinks_required,
            blink_phase: live.map(|s| s.phase(now)),
            retries_used: self.retries_used,
            max_retries: self.config.max_verification_retries,
            liveness_remaining_ms: live.map(|s| millis(s.remaining(now))),
            attempt_remaining_ms: millis(
                (self.expires_at - now).to_std().unwrap_or(Duration::ZERO),
            ),
        }
    }

    /// Returns false for terminal attempts and expires attempts past their budget.
    fn accepts_events(&mut self, now: DateTime<Utc>) -> bool {
        if self.stage.is_terminal() {
            tracing::trace!(attempt_id = %self.attempt_id, "event after terminal stage ignored");
            return false;
        }
        if now >= self.expires_at {
            self.expire(ExpiryReason::AttemptTimeout);
            return false;
        }
        true
    }

    fn drive<F>(&mut self, now: DateTime<Utc>, step: F) -> &VerificationStage
    where
        F: FnOnce(&mut LivenessSession) -> LivenessSessionState,
    {
        if !self.accepts_events(now) {
            return &self.stage;
        }
        if self.stage != VerificationStage::AwaitingLiveness {
            return &self.stage;
        }
        let Some(session) = self.liveness.as_mut() else {
            return &self.stage;
        };

        match step(session).status {
            LivenessStatus::Running => {}
            LivenessStatus::Passed => self.decide(Verdict::Verified),
            LivenessStatus::Expired => self.liveness_failed(ReasonCode::LivenessTimeout),
            LivenessStatus::Failed => self.liveness_failed(ReasonCode::FaceLost),
        }
        &self.stage
    }

    fn liveness_failed(&mut self, reason: ReasonCode) {
        if self.retries_used >= self.config.max_verification_retries {
            self.decide(Verdict::Unverified(reason));
            return;
        }

        self.retries_used += 1;
        self.liveness = None;
        self.user_candidate_id = None;
        self.identity_confidence = 0.0;
        self.stage = VerificationStage::AwaitingIdentity;
        tracing::info!(
            attempt_id = %self.attempt_id,
            reason = %reason,
            retries_used = self.retries_used,
            max_retries = self.config.max_verification_retries,
            "liveness failed, retrying"
        );
    }

    fn decide(&mut self, verdict: Verdict) {
        self.stage = VerificationStage::Decided(verdict);
        tracing::info!(
            attempt_id = %self.attempt_id,
            verdict = ?verdict,
            retries_used = self.retries_used,
            "verification decided"
        );
    }

    fn expire(&mut self, reason: ExpiryReason) {
        self.liveness = None;
        self.stage = VerificationStage::Expired(reason);
        tracing::warn!(
            attempt_id = %self.attempt_id,
            reason = ?reason,
            retries_used = self.retries_used,
            "verification attempt expired"
        );
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlinkConfig, LivenessConfig};
    use crate::types::{EyeLandmarks, FaceLandmarks, LandmarkPoint};
    use chrono::Duration as TimeDelta;

    const OPEN: f32 = 0.30;
    const SHUT: f32 = 0.10;

    fn config(max_retries: u32, attempt_secs: u64) -> VerificationConfig {
        VerificationConfig {
            min_identity_confidence: 0.6,
            max_verification_retries: max_retries,
            attempt_wall_clock_budget: Duration::from_secs(attempt_secs),
            liveness: LivenessConfig {
                min_blinks_required: 2,
                duration_budget: Duration::from_secs(10),
                face_lost_grace: Duration::from_millis(500),
                blink: BlinkConfig {
                    close_threshold: 0.21,
                    min_closed_frames: 2,
                    cooldown: Duration::from_millis(300),
                },
            },
        }
    }

    /// Eye 30 px wide with the given openness ratio.
    fn eye(ratio: f32) -> EyeLandmarks {
        let half = ratio * 30.0 / 2.0;
        EyeLandmarks(vec![
            LandmarkPoint::new(0.0, 0.0),
            LandmarkPoint::new(10.0, -half),
            LandmarkPoint::new(20.0, -half),
            LandmarkPoint::new(30.0, 0.0),
            LandmarkPoint::new(20.0, half),
            LandmarkPoint::new(10.0, half),
        ])
    }

    fn frame(ratio: f32, at: DateTime<Utc>) -> Frame {
        Frame::with_face(
            at,
            FaceLandmarks {
                left: eye(ratio),
                right: eye(ratio),
            },
        )
    }

    fn ms(t0: DateTime<Utc>, offset: i64) -> DateTime<Utc> {
        t0 + TimeDelta::milliseconds(offset)
    }

    /// Two clean blinks starting at `start_ms`, 100 ms per frame.
    fn two_blinks(attempt: &mut VerificationAttempt, t0: DateTime<Utc>, start_ms: i64) {
        let ratios = [SHUT, SHUT, OPEN, OPEN, OPEN, OPEN, SHUT, SHUT, OPEN];
        for (i, r) in ratios.iter().enumerate() {
            attempt.observe_frame(&frame(*r, ms(t0, start_ms + 100 * i as i64)));
        }
    }

    #[test]
    fn test_low_confidence_skips_liveness() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(1, 30)).begin(t0);

        let stage = *attempt.submit_identity(IdentityMatch::new("alice", 0.59), t0);
        assert_eq!(
            stage,
            VerificationStage::Decided(Verdict::Unverified(ReasonCode::LowIdentityConfidence))
        );
        assert!(attempt.liveness_state().is_none());
        assert_eq!(attempt.user_candidate_id(), None);
        assert_eq!(attempt.retries_used(), 0);

        let outcome = attempt.outcome().unwrap();
        assert_eq!(outcome.blink_count, 0);
        assert!(!outcome.is_verified());
    }

    #[test]
    fn test_missing_candidate_is_low_confidence() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(1, 30)).begin(t0);
        let identity = IdentityMatch {
            candidate_id: None,
            confidence: 0.99,
        };
        attempt.submit_identity(identity, t0);
        assert_eq!(
            attempt.outcome().unwrap().verdict,
            Verdict::Unverified(ReasonCode::LowIdentityConfidence)
        );
        assert!(attempt.liveness_state().is_none());
    }

    #[test]
    fn test_nan_confidence_is_low_confidence() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(1, 30)).begin(t0);
        attempt.submit_identity(IdentityMatch::new("alice", f32::NAN), t0);
        assert_eq!(
            attempt.outcome().unwrap().verdict,
            Verdict::Unverified(ReasonCode::LowIdentityConfidence)
        );
    }

    #[test]
    fn test_recognised_and_blinking_is_verified() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(1, 30)).begin(t0);

        attempt.submit_identity(IdentityMatch::new("alice", 0.95), t0);
        assert_eq!(*attempt.stage(), VerificationStage::AwaitingLiveness);
        two_blinks(&mut attempt, t0, 100);

        assert_eq!(*attempt.stage(), VerificationStage::Decided(Verdict::Verified));
        let outcome = attempt.outcome().unwrap();
        assert!(outcome.is_verified());
        assert_eq!(outcome.candidate_id.as_deref(), Some("alice"));
        assert_eq!(outcome.blink_count, 2);
        assert_eq!(outcome.confidence, 0.95);
    }

    #[test]
    fn test_frames_before_identity_are_ignored() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(1, 30)).begin(t0);
        two_blinks(&mut attempt, t0, 0);
        assert_eq!(*attempt.stage(), VerificationStage::AwaitingIdentity);
        assert!(attempt.outcome().is_none());
    }

    #[test]
    fn test_liveness_timeout_retries_then_fails() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(1, 30)).begin(t0);

        attempt.submit_identity(IdentityMatch::new("alice", 0.9), t0);
        attempt.feed_ratio(OPEN, ms(t0, 10_000));
        assert_eq!(*attempt.stage(), VerificationStage::AwaitingIdentity);
        assert_eq!(attempt.retries_used(), 1);
        assert!(attempt.liveness_state().is_none());
        assert_eq!(attempt.user_candidate_id(), None);

        attempt.submit_identity(IdentityMatch::new("alice", 0.9), ms(t0, 10_100));
        assert_eq!(*attempt.stage(), VerificationStage::AwaitingLiveness);
        attempt.feed_ratio(OPEN, ms(t0, 20_100));

        assert_eq!(
            *attempt.stage(),
            VerificationStage::Decided(Verdict::Unverified(ReasonCode::LivenessTimeout))
        );
        let outcome = attempt.outcome().unwrap();
        assert_eq!(outcome.retries_used, 1);
        assert_eq!(outcome.candidate_id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_retry_then_pass() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(2, 30)).begin(t0);

        attempt.submit_identity(IdentityMatch::new("bob", 0.8), t0);
        attempt.tick(ms(t0, 10_000));
        assert_eq!(attempt.retries_used(), 1);

        attempt.submit_identity(IdentityMatch::new("bob", 0.8), ms(t0, 10_500));
        two_blinks(&mut attempt, t0, 10_600);
        assert_eq!(*attempt.stage(), VerificationStage::Decided(Verdict::Verified));
        assert_eq!(attempt.outcome().unwrap().retries_used, 1);
    }

    #[test]
    fn test_face_lost_without_retries() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(0, 30)).begin(t0);

        attempt.submit_identity(IdentityMatch::new("alice", 0.9), t0);
        attempt.observe_frame(&Frame::without_face(ms(t0, 100)));
        attempt.observe_frame(&Frame::without_face(ms(t0, 700)));

        assert_eq!(
            *attempt.stage(),
            VerificationStage::Decided(Verdict::Unverified(ReasonCode::FaceLost))
        );
    }

    #[test]
    fn test_low_confidence_on_retry_is_terminal() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(3, 60)).begin(t0);

        attempt.submit_identity(IdentityMatch::new("alice", 0.9), t0);
        attempt.tick(ms(t0, 10_000));
        attempt.submit_identity(IdentityMatch::new("alice", 0.2), ms(t0, 10_100));

        assert_eq!(
            attempt.outcome().unwrap().verdict,
            Verdict::Unverified(ReasonCode::LowIdentityConfidence)
        );
        assert_eq!(attempt.retries_used(), 1);
    }

    #[test]
    fn test_wall_clock_budget_bounds_retries() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(5, 12)).begin(t0);

        attempt.submit_identity(IdentityMatch::new("alice", 0.9), t0);
        attempt.tick(ms(t0, 10_000));
        attempt.submit_identity(IdentityMatch::new("alice", 0.9), ms(t0, 10_500));
        attempt.feed_ratio(OPEN, ms(t0, 11_900));
        assert_eq!(*attempt.stage(), VerificationStage::AwaitingLiveness);

        attempt.feed_ratio(OPEN, ms(t0, 12_000));
        assert_eq!(
            *attempt.stage(),
            VerificationStage::Expired(ExpiryReason::AttemptTimeout)
        );
        assert!(attempt.liveness_state().is_none());
        assert_eq!(
            attempt.outcome().unwrap().verdict,
            Verdict::Unverified(ReasonCode::AttemptTimeout)
        );
    }

    #[test]
    fn test_slow_identity_expires_attempt() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(1, 30)).begin(t0);
        // The matcher answered only after the whole budget was used.
        attempt.submit_identity(IdentityMatch::new("alice", 0.99), ms(t0, 31_000));
        assert_eq!(
            *attempt.stage(),
            VerificationStage::Expired(ExpiryReason::AttemptTimeout)
        );
    }

    #[test]
    fn test_cancel_discards_liveness() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(1, 30)).begin(t0);

        attempt.submit_identity(IdentityMatch::new("alice", 0.9), t0);
        attempt.feed_ratio(SHUT, ms(t0, 100));
        attempt.feed_ratio(SHUT, ms(t0, 200));
        attempt.feed_ratio(OPEN, ms(t0, 300));
        assert_eq!(attempt.liveness_state().unwrap().blink_count, 1);

        attempt.cancel(ms(t0, 400));
        assert_eq!(
            *attempt.stage(),
            VerificationStage::Expired(ExpiryReason::UserCancelled)
        );
        assert!(attempt.liveness_state().is_none());

        let outcome = attempt.outcome().unwrap();
        assert_eq!(outcome.verdict, Verdict::Unverified(ReasonCode::UserCancelled));
        assert_eq!(outcome.blink_count, 0);
    }

    #[test]
    fn test_terminal_attempt_ignores_events() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(1, 30)).begin(t0);
        attempt.submit_identity(IdentityMatch::new("alice", 0.9), t0);
        two_blinks(&mut attempt, t0, 100);
        let verified = *attempt.stage();

        attempt.cancel(ms(t0, 2_000));
        attempt.submit_identity(IdentityMatch::new("mallory", 0.99), ms(t0, 2_100));
        attempt.tick(ms(t0, 60_000));

        assert_eq!(*attempt.stage(), verified);
        assert_eq!(attempt.user_candidate_id(), Some("alice"));
    }

    #[test]
    fn test_progress_reports_blinks() {
        let t0 = Utc::now();
        let mut attempt = VerificationPipeline::new(config(1, 30)).begin(t0);

        let progress = attempt.progress(t0);
        assert_eq!(progress.stage, VerificationStage::AwaitingIdentity);
        assert_eq!(progress.message(), "Look at the camera");
        assert_eq!(progress.attempt_remaining_ms, 30_000);
        assert_eq!(progress.liveness_remaining_ms, None);

        attempt.submit_identity(IdentityMatch::new("alice", 0.9), t0);
        attempt.feed_ratio(SHUT, ms(t0, 100));
        attempt.feed_ratio(SHUT, ms(t0, 200));
        attempt.feed_ratio(OPEN, ms(t0, 300));

        let progress = attempt.progress(ms(t0, 1_000));
        assert_eq!(progress.blink_count, 1);
        assert_eq!(progress.blinks_required, 2);
        assert_eq!(progress.message(), "Blink 1 of 2");
        assert_eq!(progress.liveness_remaining_ms, Some(9_000));
        assert_eq!(progress.attempt_remaining_ms, 29_000);
        assert_eq!(progress.blink_phase, Some(BlinkPhase::Open));
    }

    #[test]
    fn test_stage_serializes_with_tag() {
        let stage = VerificationStage::Decided(Verdict::Unverified(ReasonCode::FaceLost));
        let json = serde_json::to_value(stage).unwrap();
        assert_eq!(json["stage"], "decided");
        assert_eq!(json["detail"]["verdict"], "unverified");
        assert_eq!(json["detail"]["reason"], "face_lost");
    }
}
