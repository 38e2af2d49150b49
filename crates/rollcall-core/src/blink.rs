//! Debounced blink detection over a stream of openness ratios.
//!
//! A blink is one complete close → open cycle of the combined openness ratio:
//!
//! - the ratio must stay below `close_threshold` for at least
//!   `min_closed_frames` consecutive frames before the eye counts as shut, so
//!   a single jittery landmark frame is never read as a blink;
//! - the blink is counted on the first frame back at or above the threshold,
//!   unless the previous counted blink is still inside `cooldown`, in which
//!   case the cycle is absorbed (a noisy mid-blink frame must not split one
//!   blink into two).
//!
//! There is a single threshold. Chatter around it is suppressed by the
//! run-length counter rather than a second, higher re-open threshold.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::BlinkConfig;

/// What a single sample did to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlinkSignal {
    NoChange,
    /// The closure debounce was satisfied on this sample.
    EyeClosed,
    /// A full blink was counted on this sample.
    BlinkCompleted,
}

/// Logical detector phase, derived from [`BlinkDetectorState`] for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlinkPhase {
    Open,
    /// Below threshold, debounce not yet satisfied.
    Closing,
    Closed,
    /// Open, but a blink was counted less than `cooldown` ago.
    Cooldown,
}

/// Per-session detector state.
///
/// Owned by exactly one liveness session and only mutated through
/// [`BlinkDetector::process`]; a fresh state is created for every session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlinkDetectorState {
    below_threshold_run_length: u32,
    blink_count: u32,
    last_blink_at: Option<DateTime<Utc>>,
    is_currently_closed: bool,
    last_sample_at: Option<DateTime<Utc>>,
}

impl BlinkDetectorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blink_count(&self) -> u32 {
        self.blink_count
    }

    pub fn below_threshold_run_length(&self) -> u32 {
        self.below_threshold_run_length
    }

    pub fn is_currently_closed(&self) -> bool {
        self.is_currently_closed
    }

    pub fn last_blink_at(&self) -> Option<DateTime<Utc>> {
        self.last_blink_at
    }
}

/// Stateless blink detector; all mutable data lives in [`BlinkDetectorState`].
#[derive(Debug, Clone)]
pub struct BlinkDetector {
    config: BlinkConfig,
}

impl BlinkDetector {
    pub fn new(config: BlinkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BlinkConfig {
        &self.config
    }

    /// Feed one combined openness ratio captured at `now`.
    ///
    /// Samples older than the previous one are dropped as `NoChange` without
    /// touching any counter. Non-finite ratios are read as `0.0`.
    pub fn process(
        &self,
        ratio: f32,
        now: DateTime<Utc>,
        state: &mut BlinkDetectorState,
    ) -> BlinkSignal {
        if let Some(previous) = state.last_sample_at {
            if now < previous {
                tracing::trace!(%now, %previous, "blink: out-of-order sample dropped");
                return BlinkSignal::NoChange;
            }
        }
        state.last_sample_at = Some(now);

        let ratio = if ratio.is_finite() { ratio } else { 0.0 };

        if ratio < self.config.close_threshold {
            state.below_threshold_run_length = state.below_threshold_run_length.saturating_add(1);
            if !state.is_currently_closed
                && state.below_threshold_run_length >= self.config.min_closed_frames
            {
                state.is_currently_closed = true;
                return BlinkSignal::EyeClosed;
            }
            return BlinkSignal::NoChange;
        }

        if !state.is_currently_closed {
            state.below_threshold_run_length = 0;
            return BlinkSignal::NoChange;
        }

        let outside_cooldown = match state.last_blink_at {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map_or(false, |elapsed| elapsed > self.config.cooldown),
        };

        state.is_currently_closed = false;
        state.below_threshold_run_length = 0;

        if outside_cooldown {
            state.blink_count += 1;
            state.last_blink_at = Some(now);
            tracing::debug!(blink_count = state.blink_count, "blink completed");
            BlinkSignal::BlinkCompleted
        } else {
            tracing::debug!(
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "blink: reopen inside cooldown, not counted"
            );
            BlinkSignal::NoChange
        }
    }

    /// Current logical phase of `state` as seen at `now`.
    pub fn phase(&self, state: &BlinkDetectorState, now: DateTime<Utc>) -> BlinkPhase {
        if state.is_currently_closed {
            return BlinkPhase::Closed;
        }
        if state.below_threshold_run_length > 0 {
            return BlinkPhase::Closing;
        }
        let cooling = state.last_blink_at.is_some_and(|last| {
            (now - last)
                .to_std()
                .map_or(true, |elapsed| elapsed <= self.config.cooldown)
        });
        if cooling {
            BlinkPhase::Cooldown
        } else {
            BlinkPhase::Open
        }
    }
}
