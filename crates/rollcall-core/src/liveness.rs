//! Active liveness challenge via natural blinking.
//!
//! A printed photograph or a face frozen on a phone screen cannot close and
//! reopen its eyes. A live person blinks several times within a few seconds
//! without being asked to, and reliably when prompted. A session gives the
//! subject a fixed time budget to produce `min_blinks_required` complete
//! blinks, counted by the debounced [`BlinkDetector`].
//!
//! The session reacts to three inputs: openness ratios ([`LivenessSession::feed`]),
//! frames without a face ([`LivenessSession::face_absent`]) and the passage of
//! time ([`LivenessSession::poll`]). It settles exactly once:
//!
//! - **Passed** as soon as the blink requirement is met, without waiting out
//!   the budget;
//! - **Expired** once the budget is used up with the requirement unmet;
//! - **Failed** when the face stays missing for longer than the grace period.
//!
//! Terminal sessions are frozen. Later calls are accepted and return the
//! frozen state, so a frame loop never has to special-case a finished session.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs, static images on a screen.
//! - **Does not block:** Video replay of a blinking face, masks with cut-out
//!   eyes, or adversarial displays. Depth and texture analysis are out of
//!   scope for this engine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::blink::{BlinkDetector, BlinkDetectorState, BlinkPhase, BlinkSignal};
use crate::config::{millis, LivenessConfig};
use crate::geometry::OpennessSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessStatus {
    Running,
    Passed,
    /// The face was missing for longer than the grace period.
    Failed,
    Expired,
}

impl LivenessStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

/// Observable state of one liveness session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessSessionState {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "millis::serialize", rename = "duration_budget_ms")]
    pub duration_budget: Duration,
    pub min_blinks_required: u32,
    pub blink_count: u32,
    pub status: LivenessStatus,
}

/// One time-boxed blink challenge. Owns its detector state exclusively.
#[derive(Debug, Clone)]
pub struct LivenessSession {
    state: LivenessSessionState,
    detector: BlinkDetector,
    detector_state: BlinkDetectorState,
    face_lost_grace: Duration,
    face_missing_since: Option<DateTime<Utc>>,
}

impl LivenessSession {
    /// Start a session at `now` with a fresh detector.
    pub fn start(config: &LivenessConfig, now: DateTime<Utc>) -> Self {
        let state = LivenessSessionState {
            session_id: Uuid::new_v4(),
            started_at: now,
            duration_budget: config.duration_budget,
            min_blinks_required: config.min_blinks_required,
            blink_count: 0,
            status: LivenessStatus::Running,
        };
        tracing::debug!(
            session_id = %state.session_id,
            min_blinks = state.min_blinks_required,
            budget_ms = state.duration_budget.as_millis() as u64,
            "liveness session started"
        );

        Self {
            state,
            detector: BlinkDetector::new(config.blink.clone()),
            detector_state: BlinkDetectorState::new(),
            face_lost_grace: config.face_lost_grace,
            face_missing_since: None,
        }
    }

    pub fn state(&self) -> &LivenessSessionState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.status.is_terminal()
    }

    /// Current blink-detector phase, for progress feedback.
    pub fn phase(&self, now: DateTime<Utc>) -> BlinkPhase {
        self.detector.phase(&self.detector_state, now)
    }

    /// Time left in the budget as seen at `now`.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.state.duration_budget.saturating_sub(self.elapsed(now))
    }

    /// Feed the combined openness ratio of a frame with a face.
    pub fn feed(&mut self, ratio: f32, now: DateTime<Utc>) -> LivenessSessionState {
        if self.is_terminal() {
            return self.state.clone();
        }

        self.face_missing_since = None;
        let signal = self.detector.process(ratio, now, &mut self.detector_state);
        self.state.blink_count = self.detector_state.blink_count();

        if signal == BlinkSignal::BlinkCompleted {
            tracing::debug!(
                session_id = %self.state.session_id,
                blink_count = self.state.blink_count,
                required = self.state.min_blinks_required,
                "liveness: blink counted"
            );
        }

        self.evaluate(now);
        self.state.clone()
    }

    pub fn feed_sample(&mut self, sample: &OpennessSample) -> LivenessSessionState {
        self.feed(sample.combined_ratio, sample.timestamp)
    }

    /// Record a frame in which the provider found no face.
    pub fn face_absent(&mut self, now: DateTime<Utc>) -> LivenessSessionState {
        if self.is_terminal() {
            return self.state.clone();
        }

        let since = *self.face_missing_since.get_or_insert(now);
        let gone_for = (now - since).to_std().unwrap_or(Duration::ZERO);
        if gone_for > self.face_lost_grace {
            tracing::warn!(
                session_id = %self.state.session_id,
                gone_ms = gone_for.as_millis() as u64,
                "liveness: face lost"
            );
            self.settle(LivenessStatus::Failed);
        } else {
            self.evaluate(now);
        }
        self.state.clone()
    }

    /// Re-evaluate the time budget without a new frame.
    pub fn poll(&mut self, now: DateTime<Utc>) -> LivenessSessionState {
        if !self.is_terminal() {
            self.evaluate(now);
        }
        self.state.clone()
    }

    /// Settle a running session immediately: Passed if the requirement is met,
    /// Expired otherwise. A closure still in progress does not count.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> LivenessSessionState {
        if !self.is_terminal() {
            self.evaluate(now);
        }
        if !self.is_terminal() {
            self.settle(LivenessStatus::Expired);
        }
        self.state.clone()
    }

    fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.state.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    fn evaluate(&mut self, now: DateTime<Utc>) {
        if self.state.blink_count >= self.state.min_blinks_required {
            self.settle(LivenessStatus::Passed);
        } else if self.elapsed(now) >= self.state.duration_budget {
            self.settle(LivenessStatus::Expired);
        }
    }

    fn settle(&mut self, status: LivenessStatus) {
        self.state.status = status;
        tracing::info!(
            session_id = %self.state.session_id,
            status = ?status,
            blink_count = self.state.blink_count,
            required = self.state.min_blinks_required,
            "liveness session settled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlinkConfig;
    use chrono::Duration as TimeDelta;

    const OPEN: f32 = 0.30;
    const SHUT: f32 = 0.12;

    fn config(min_blinks: u32, budget_secs: u64) -> LivenessConfig {
        LivenessConfig {
            min_blinks_required: min_blinks,
            duration_budget: Duration::from_secs(budget_secs),
            face_lost_grace: Duration::from_millis(500),
            blink: BlinkConfig {
                close_threshold: 0.21,
                min_closed_frames: 3,
                cooldown: Duration::from_millis(600),
            },
        }
    }

    /// Frames at 100 ms spacing: each blink is three shut frames then
    /// enough open frames to clear the cooldown.
    fn blink_stream(blinks: usize, open_between: usize) -> Vec<f32> {
        let mut ratios = Vec::new();
        for _ in 0..blinks {
            ratios.extend_from_slice(&[SHUT, SHUT, SHUT]);
            ratios.extend(std::iter::repeat(OPEN).take(open_between));
        }
        ratios
    }

    #[test]
    fn test_passes_on_final_required_blink() {
        let t0 = Utc::now();
        let mut session = LivenessSession::start(&config(3, 10), t0);
        let ratios = blink_stream(3, 7);
        assert_eq!(ratios.len(), 30);

        let mut passed_at = None;
        for (i, r) in ratios.iter().enumerate() {
            let state = session.feed(*r, t0 + TimeDelta::milliseconds(100 * i as i64));
            if state.status == LivenessStatus::Passed {
                passed_at = Some(i);
                break;
            }
        }

        let passed_at = passed_at.expect("session never passed");
        assert!(passed_at < 29);
        assert_eq!(session.state().blink_count, 3);
    }

    #[test]
    fn test_expires_without_blinks() {
        let t0 = Utc::now();
        let mut session = LivenessSession::start(&config(2, 10), t0);

        let mut last = session.state().clone();
        for i in 0..=100 {
            last = session.feed(OPEN, t0 + TimeDelta::milliseconds(100 * i));
        }

        assert_eq!(last.status, LivenessStatus::Expired);
        assert_eq!(last.blink_count, 0);
    }

    #[test]
    fn test_still_running_just_before_budget() {
        let t0 = Utc::now();
        let mut session = LivenessSession::start(&config(1, 10), t0);
        let state = session.feed(OPEN, t0 + TimeDelta::milliseconds(9_999));
        assert_eq!(state.status, LivenessStatus::Running);
        let state = session.feed(OPEN, t0 + TimeDelta::seconds(10));
        assert_eq!(state.status, LivenessStatus::Expired);
    }

    #[test]
    fn test_blink_on_last_frame_still_passes() {
        let t0 = Utc::now();
        let mut session = LivenessSession::start(&config(1, 1), t0);
        session.feed(SHUT, t0 + TimeDelta::milliseconds(700));
        session.feed(SHUT, t0 + TimeDelta::milliseconds(800));
        session.feed(SHUT, t0 + TimeDelta::milliseconds(900));
        let state = session.feed(OPEN, t0 + TimeDelta::milliseconds(1_000));
        assert_eq!(state.status, LivenessStatus::Passed);
    }

    #[test]
    fn test_terminal_state_is_frozen() {
        let t0 = Utc::now();
        let mut session = LivenessSession::start(&config(1, 10), t0);
        for (i, r) in blink_stream(1, 1).iter().enumerate() {
            session.feed(*r, t0 + TimeDelta::milliseconds(100 * i as i64));
        }
        let frozen = session.state().clone();
        assert_eq!(frozen.status, LivenessStatus::Passed);

        // More blinks, absence and a late poll change nothing.
        for (i, r) in blink_stream(2, 7).iter().enumerate() {
            let state = session.feed(*r, t0 + TimeDelta::seconds(1 + i as i64));
            assert_eq!(state, frozen);
        }
        assert_eq!(session.face_absent(t0 + TimeDelta::seconds(60)), frozen);
        assert_eq!(session.poll(t0 + TimeDelta::seconds(60)), frozen);
        assert_eq!(session.finalize(t0 + TimeDelta::seconds(60)), frozen);
    }

    #[test]
    fn test_face_lost_after_grace() {
        let t0 = Utc::now();
        let mut session = LivenessSession::start(&config(2, 10), t0);
        session.feed(OPEN, t0);

        let state = session.face_absent(t0 + TimeDelta::milliseconds(100));
        assert_eq!(state.status, LivenessStatus::Running);
        let state = session.face_absent(t0 + TimeDelta::milliseconds(600));
        assert_eq!(state.status, LivenessStatus::Running);
        let state = session.face_absent(t0 + TimeDelta::milliseconds(700));
        assert_eq!(state.status, LivenessStatus::Failed);
    }

    #[test]
    fn test_face_reappearing_resets_grace() {
        let t0 = Utc::now();
        let mut session = LivenessSession::start(&config(2, 10), t0);

        session.face_absent(t0 + TimeDelta::milliseconds(100));
        session.face_absent(t0 + TimeDelta::milliseconds(500));
        session.feed(OPEN, t0 + TimeDelta::milliseconds(550));
        let state = session.face_absent(t0 + TimeDelta::milliseconds(900));
        assert_eq!(state.status, LivenessStatus::Running);
    }

    #[test]
    fn test_poll_expires_idle_session() {
        let t0 = Utc::now();
        let mut session = LivenessSession::start(&config(2, 5), t0);
        assert_eq!(
            session.poll(t0 + TimeDelta::seconds(4)).status,
            LivenessStatus::Running
        );
        assert_eq!(
            session.poll(t0 + TimeDelta::seconds(5)).status,
            LivenessStatus::Expired
        );
    }

    #[test]
    fn test_finalize_mid_closure_does_not_count() {
        let t0 = Utc::now();
        let mut session = LivenessSession::start(&config(1, 10), t0);
        for i in 0..5 {
            session.feed(SHUT, t0 + TimeDelta::milliseconds(100 * i));
        }
        let state = session.finalize(t0 + TimeDelta::seconds(1));
        assert_eq!(state.status, LivenessStatus::Expired);
        assert_eq!(state.blink_count, 0);
    }

    #[test]
    fn test_zero_required_passes_immediately() {
        let t0 = Utc::now();
        let mut session = LivenessSession::start(&config(0, 10), t0);
        assert_eq!(session.feed(OPEN, t0).status, LivenessStatus::Passed);
    }

    #[test]
    fn test_remaining_counts_down() {
        let t0 = Utc::now();
        let session = LivenessSession::start(&config(2, 10), t0);
        assert_eq!(session.remaining(t0), Duration::from_secs(10));
        assert_eq!(
            session.remaining(t0 + TimeDelta::seconds(4)),
            Duration::from_secs(6)
        );
        assert_eq!(session.remaining(t0 + TimeDelta::seconds(40)), Duration::ZERO);
    }

    #[test]
    fn test_sessions_do_not_share_blinks() {
        let t0 = Utc::now();
        let mut first = LivenessSession::start(&config(5, 10), t0);
        for (i, r) in blink_stream(2, 7).iter().enumerate() {
            first.feed(*r, t0 + TimeDelta::milliseconds(100 * i as i64));
        }
        assert_eq!(first.state().blink_count, 2);

        let second = LivenessSession::start(&config(5, 10), t0);
        assert_eq!(second.state().blink_count, 0);
        assert_ne!(first.state().session_id, second.state().session_id);
    }
}
