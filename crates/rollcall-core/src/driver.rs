use std::time::Instant;

use chrono::{DateTime, Duration as TimeDelta, Utc};

use crate::collab::{FrameSource, IdentityMatcher};
use crate::pipeline::{VerificationAttempt, VerificationPipeline, VerificationStage};
use crate::types::IdentityMatch;

/// Drive one attempt to completion from a frame source and an identity matcher.
///
/// Single-threaded: frames are pulled one at a time in capture order. While
/// the attempt waits for an identity, each frame with a face is sent to the
/// matcher; once liveness starts, frames go to the blink challenge. The match
/// is applied at the frame's capture time plus the matcher's latency, so a
/// slow matcher is charged to the attempt rather than the blink challenge. A
/// matcher error is treated as "nobody recognised". If the source runs dry
/// before a verdict, the attempt is re-checked against its budgets at the last
/// frame time and cancelled if still open.
pub fn run_attempt<S, M>(
    pipeline: &VerificationPipeline,
    source: &mut S,
    matcher: &mut M,
    started_at: DateTime<Utc>,
) -> VerificationAttempt
where
    S: FrameSource + ?Sized,
    M: IdentityMatcher + ?Sized,
{
    let mut attempt = pipeline.begin(started_at);
    let mut last_seen = started_at;
    let mut frames = 0usize;

    while !attempt.is_terminal() {
        let Some(frame) = source.next_frame() else {
            break;
        };
        frames += 1;
        last_seen = last_seen.max(frame.captured_at);

        match attempt.stage() {
            VerificationStage::AwaitingIdentity => {
                if !frame.face_present() {
                    attempt.tick(frame.captured_at);
                    continue;
                }
                let asked = Instant::now();
                let identity = matcher.identify(&frame).unwrap_or_else(|e| {
                    tracing::warn!(
                        attempt_id = %attempt.attempt_id(),
                        error = %e,
                        "identity matcher failed, treating face as unrecognised"
                    );
                    IdentityMatch::unknown()
                });
                let latency = TimeDelta::from_std(asked.elapsed()).unwrap_or(TimeDelta::zero());
                let answered_at = frame.captured_at + latency;
                last_seen = last_seen.max(answered_at);
                attempt.submit_identity(identity, answered_at);
            }
            VerificationStage::AwaitingLiveness => {
                attempt.observe_frame(&frame);
            }
            VerificationStage::Decided(_) | VerificationStage::Expired(_) => break,
        }
    }

    if !attempt.is_terminal() {
        attempt.tick(last_seen);
    }
    if !attempt.is_terminal() {
        tracing::info!(
            attempt_id = %attempt.attempt_id(),
            frames,
            "frame source exhausted before a verdict"
        );
        attempt.cancel(last_seen);
    }

    tracing::debug!(
        attempt_id = %attempt.attempt_id(),
        frames,
        stage = attempt.stage().label(),
        "attempt driven to completion"
    );
    attempt
}
