use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as TimeDelta, NaiveDate, Utc};
use rollcall_core::{
    evaluate, openness_sample, run_attempt, AttemptProgress, AttendanceDecision, BlinkConfig,
    BlinkDetector, BlinkDetectorState, BlinkPhase, BlinkSignal, EngineConfig,
    VerificationOutcome, VerificationPipeline,
};
use serde::Serialize;

use crate::trace::Trace;

/// Load engine tunables from a TOML file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    config.validate().context("invalid tunables")?;
    Ok(config)
}

/// Everything one replayed attempt produced.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub message: String,
    pub progress: AttemptProgress,
    pub outcome: VerificationOutcome,
    pub decision: AttendanceDecision,
}

/// Run a recorded trace through one verification attempt and the eligibility
/// guard, as if it had been captured starting at `base`.
pub fn replay(
    trace: &Trace,
    config: &EngineConfig,
    prior_entries: u32,
    date: NaiveDate,
    base: DateTime<Utc>,
) -> Result<ReplayReport> {
    let pipeline = VerificationPipeline::new(config.verification.clone());
    let mut frames = trace.frames_from(base).into_iter();
    let mut matcher = trace.matcher();

    let attempt = run_attempt(&pipeline, &mut frames, &mut matcher, base);

    let ended_at = trace
        .frames
        .last()
        .map_or(base, |frame| base + TimeDelta::milliseconds(frame.t_ms as i64));
    let outcome = attempt
        .outcome()
        .ok_or_else(|| anyhow!("attempt {} ended without a verdict", attempt.attempt_id()))?;
    let progress = attempt.progress(ended_at);
    let decision = evaluate(
        &outcome,
        prior_entries,
        config.eligibility.max_daily_entries,
        date,
        ended_at,
    );

    tracing::info!(
        attempt_id = %outcome.attempt_id,
        frames = trace.frames.len(),
        verdict = ?outcome.verdict,
        outcome = decision.outcome.as_str(),
        "replay finished"
    );

    Ok(ReplayReport {
        message: progress.message(),
        progress,
        outcome,
        decision,
    })
}

/// One row of blink calibration output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EarRow {
    pub t_ms: u64,
    pub face: bool,
    pub left_ratio: Option<f32>,
    pub right_ratio: Option<f32>,
    pub combined_ratio: Option<f32>,
    pub signal: BlinkSignal,
    pub phase: BlinkPhase,
    pub blink_count: u32,
}

/// Per-frame openness ratios and detector reaction, for tuning
/// `close_threshold` and the debounce against real recordings.
///
/// Runs the detector alone: no session budget, no identity step.
pub fn ear_rows(trace: &Trace, blink: &BlinkConfig, base: DateTime<Utc>) -> Vec<EarRow> {
    let detector = BlinkDetector::new(blink.clone());
    let mut state = BlinkDetectorState::new();

    trace
        .frames
        .iter()
        .map(|recorded| {
            let frame = recorded.at(base);
            let sample = frame
                .landmarks
                .as_ref()
                .map(|face| openness_sample(face, frame.captured_at));
            let signal = match &sample {
                Some(sample) => {
                    detector.process(sample.combined_ratio, sample.timestamp, &mut state)
                }
                None => BlinkSignal::NoChange,
            };
            EarRow {
                t_ms: recorded.t_ms,
                face: sample.is_some(),
                left_ratio: sample.map(|s| s.left_ratio),
                right_ratio: sample.map(|s| s.right_ratio),
                combined_ratio: sample.map(|s| s.combined_ratio),
                signal,
                phase: detector.phase(&state, frame.captured_at),
                blink_count: state.blink_count(),
            }
        })
        .collect()
}
