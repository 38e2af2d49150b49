use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use rollcall_core::{
    AttendanceDecision, EyeLandmarks, FaceLandmarks, Frame, IdentityMatch, LandmarkPoint,
};
use zbus::interface;

use crate::config::Config;
use crate::engine::{EngineHandle, Step};
use crate::recorder::Recorder;
use crate::settlement::settle_pending;

/// Shared state accessible by D-Bus method handlers.
///
/// Everything here is either immutable or internally synchronised, so no
/// outer lock is needed; the engine thread serialises attempt mutations.
pub struct AppState {
    pub config: Config,
    pub engine: EngineHandle,
    pub recorder: Recorder,
}

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
pub struct RollcallService {
    pub state: Arc<AppState>,
}

fn failed(context: &str, err: impl std::fmt::Display) -> zbus::fdo::Error {
    tracing::error!(error = %err, context, "request failed");
    zbus::fdo::Error::Failed(err.to_string())
}

fn eye(points: Vec<(f64, f64)>) -> EyeLandmarks {
    EyeLandmarks(
        points
            .into_iter()
            .map(|(x, y)| LandmarkPoint::new(x as f32, y as f32))
            .collect(),
    )
}

/// Frame timestamps arrive as Unix milliseconds; zero or negative means "now".
fn frame_time(timestamp_ms: i64) -> zbus::fdo::Result<DateTime<Utc>> {
    if timestamp_ms <= 0 {
        return Ok(Utc::now());
    }
    DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
        zbus::fdo::Error::InvalidArgs(format!("timestamp out of range: {timestamp_ms}"))
    })
}

fn parse_day(date: &str) -> zbus::fdo::Result<NaiveDate> {
    if date.is_empty() {
        return Ok(Local::now().date_naive());
    }
    date.parse()
        .map_err(|_| zbus::fdo::Error::InvalidArgs(format!("invalid date: {date}")))
}

fn step_json(step: &Step, decision: Option<&AttendanceDecision>) -> String {
    serde_json::json!({
        "message": step.progress.message(),
        "progress": step.progress,
        "outcome": step.outcome,
        "decision": decision,
    })
    .to_string()
}

impl RollcallService {
    /// Store every finished outcome and report this step's decision.
    ///
    /// A step whose outcome could not be stored fails; the outcome stays
    /// queued and the sweeper retries it.
    async fn settle(&self, step: Step) -> zbus::fdo::Result<String> {
        let settlement = settle_pending(&self.state.engine, &self.state.recorder)
            .await
            .map_err(|e| failed("settle", e))?;

        let Some(outcome) = step.outcome.as_ref() else {
            return Ok(step_json(&step, None));
        };
        if let Some(err) = settlement.failure_for(outcome.attempt_id) {
            return Err(failed("settle", err));
        }
        Ok(step_json(&step, settlement.decision_for(outcome.attempt_id)))
    }
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Open a verification attempt. Fails if one is still in progress; one
    /// left open past its budget is expired and recorded first.
    ///
    /// Returns the initial progress as JSON.
    async fn begin(&self) -> zbus::fdo::Result<String> {
        tracing::info!(device = %self.state.config.device_label, "begin requested");

        let progress = self
            .state
            .engine
            .begin()
            .await
            .map_err(|e| failed("begin", e))?;
        settle_pending(&self.state.engine, &self.state.recorder)
            .await
            .map_err(|e| failed("begin", e))?;

        tracing::info!(attempt_id = %progress.attempt_id, "attempt opened");
        Ok(serde_json::json!({
            "message": progress.message(),
            "progress": progress,
        })
        .to_string())
    }

    /// Submit the recogniser's answer. An empty `candidate` means no match.
    async fn submit_identity(&self, candidate: &str, confidence: f64) -> zbus::fdo::Result<String> {
        let identity = if candidate.is_empty() {
            IdentityMatch::unknown()
        } else {
            IdentityMatch::new(candidate, confidence as f32)
        };
        tracing::debug!(candidate, confidence, "identity submitted");

        let step = self
            .state
            .engine
            .identity(identity)
            .await
            .map_err(|e| failed("submit_identity", e))?;
        self.settle(step).await
    }

    /// Submit one frame of eye landmarks, six `(x, y)` points per eye.
    async fn submit_frame(
        &self,
        left: Vec<(f64, f64)>,
        right: Vec<(f64, f64)>,
        face_present: bool,
        timestamp_ms: i64,
    ) -> zbus::fdo::Result<String> {
        let captured_at = frame_time(timestamp_ms)?;
        let frame = if face_present {
            Frame::with_face(
                captured_at,
                FaceLandmarks {
                    left: eye(left),
                    right: eye(right),
                },
            )
        } else {
            Frame::without_face(captured_at)
        };

        let step = self
            .state
            .engine
            .frame(frame)
            .await
            .map_err(|e| failed("submit_frame", e))?;
        self.settle(step).await
    }

    /// Cancel the attempt in progress. The cancellation is recorded.
    async fn cancel(&self) -> zbus::fdo::Result<String> {
        tracing::info!("cancel requested");
        let step = self
            .state
            .engine
            .cancel()
            .await
            .map_err(|e| failed("cancel", e))?;
        self.settle(step).await
    }

    /// Progress of the attempt in progress. Expires it if a budget ran out.
    async fn progress(&self) -> zbus::fdo::Result<String> {
        let step = self
            .state
            .engine
            .progress()
            .await
            .map_err(|e| failed("progress", e))?;
        self.settle(step).await
    }

    /// Return daemon status as a JSON string.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let config = &self.state.config;
        let decisions = self
            .state
            .recorder
            .store()
            .count_all()
            .await
            .map_err(|e| failed("status", e))?;

        let verification = &config.engine.verification;
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "device": config.device_label,
            "db_path": config.db_path.display().to_string(),
            "decisions_recorded": decisions,
            "min_identity_confidence": verification.min_identity_confidence,
            "min_blinks_required": verification.liveness.min_blinks_required,
            "max_verification_retries": verification.max_verification_retries,
            "max_daily_entries": config.engine.eligibility.max_daily_entries,
        });
        Ok(status.to_string())
    }

    /// List recorded decisions for `user` on `date` (`YYYY-MM-DD`, empty for today).
    async fn entries(&self, user: &str, date: &str) -> zbus::fdo::Result<String> {
        let day = parse_day(date)?;
        let entries = self
            .state
            .recorder
            .store()
            .list_for_user(user, day)
            .await
            .map_err(|e| failed("entries", e))?;

        serde_json::to_string(&entries).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}
