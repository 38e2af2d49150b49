//! rollcall-core: liveness verification and attendance decision engine.
//!
//! Turns per-frame eye landmarks into blink events, runs a time-boxed blink
//! challenge alongside an external identity match, and applies the daily
//! attendance policy to the verified outcome. Everything here is CPU-only and
//! free of I/O; cameras, matchers and storage plug in through [`collab`].

pub mod blink;
pub mod collab;
pub mod config;
pub mod driver;
pub mod eligibility;
pub mod geometry;
pub mod liveness;
pub mod pipeline;
pub mod reason;
pub mod types;

pub use blink::{BlinkDetector, BlinkDetectorState, BlinkPhase, BlinkSignal};
pub use collab::{FrameSource, IdentityMatcher, MatchError};
pub use config::{
    BlinkConfig, ConfigError, EligibilityConfig, EngineConfig, LivenessConfig, VerificationConfig,
};
pub use driver::run_attempt;
pub use eligibility::{evaluate, AttendanceDecision, AttendanceOutcome};
pub use geometry::{eye_openness, openness_sample, OpennessSample};
pub use liveness::{LivenessSession, LivenessSessionState, LivenessStatus};
pub use pipeline::{
    AttemptProgress, ExpiryReason, Verdict, VerificationAttempt, VerificationOutcome,
    VerificationPipeline, VerificationStage,
};
pub use reason::ReasonCode;
pub use types::{EyeLandmarks, FaceLandmarks, Frame, IdentityMatch, LandmarkPoint};
