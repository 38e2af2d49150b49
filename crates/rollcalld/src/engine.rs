use chrono::{DateTime, Duration as TimeDelta, Utc};
use rollcall_core::{
    AttemptProgress, Frame, IdentityMatch, VerificationAttempt, VerificationOutcome,
    VerificationPipeline,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("an attempt is already in progress")]
    AttemptInFlight,
    #[error("no attempt in progress")]
    NoAttempt,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Progress after an engine request. `outcome` is set exactly once per
/// attempt, on the request that made it terminal. From then on the outcome
/// waits in the engine's unsettled queue until it is taken for storage.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub progress: AttemptProgress,
    pub outcome: Option<VerificationOutcome>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Begin {
        reply: oneshot::Sender<Result<AttemptProgress, EngineError>>,
    },
    Identity {
        identity: IdentityMatch,
        reply: oneshot::Sender<Result<Step, EngineError>>,
    },
    Frame {
        frame: Frame,
        reply: oneshot::Sender<Result<Step, EngineError>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<Step, EngineError>>,
    },
    Progress {
        reply: oneshot::Sender<Result<Step, EngineError>>,
    },
    Sweep {
        reply: oneshot::Sender<bool>,
    },
    TakeUnsettled {
        reply: oneshot::Sender<Vec<VerificationOutcome>>,
    },
    Requeue {
        outcome: VerificationOutcome,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Open a new verification attempt on this device.
    pub async fn begin(&self) -> Result<AttemptProgress, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Begin { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Deliver the identity match for the face in front of the camera.
    pub async fn identity(&self, identity: IdentityMatch) -> Result<Step, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Identity { identity, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Deliver one landmark frame.
    pub async fn frame(&self, frame: Frame) -> Result<Step, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Frame { frame, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Cancel the attempt in progress.
    pub async fn cancel(&self) -> Result<Step, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Cancel { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Progress of the attempt in progress, re-checking its time budgets.
    pub async fn progress(&self) -> Result<Step, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Progress { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Re-check the open attempt against the engine clock. Returns true when
    /// this made it terminal.
    pub async fn sweep(&self) -> Result<bool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Sweep { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Remove and return every finished outcome not yet stored.
    pub async fn take_unsettled(&self) -> Result<Vec<VerificationOutcome>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::TakeUnsettled { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Hand back an outcome that could not be stored.
    pub async fn requeue(&self, outcome: VerificationOutcome) -> Result<(), EngineError> {
        self.send(EngineRequest::Requeue { outcome }).await
    }

    async fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the single in-flight attempt for the device and processes
/// requests strictly in arrival order, so frame handling is single-threaded
/// and never blocks the D-Bus executor. Every request is evaluated against
/// the engine's own clock.
pub fn spawn_engine(pipeline: VerificationPipeline) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(32);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut engine = Engine::new(pipeline);
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req, Utc::now());
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// State owned by the engine thread.
struct Engine {
    pipeline: VerificationPipeline,
    attempt: Option<VerificationAttempt>,
    /// Engine clock minus provider clock, fixed by the attempt's first frame.
    clock_offset: Option<TimeDelta>,
    /// Terminal outcomes waiting to be stored.
    unsettled: Vec<VerificationOutcome>,
}

impl Engine {
    fn new(pipeline: VerificationPipeline) -> Self {
        Self {
            pipeline,
            attempt: None,
            clock_offset: None,
            unsettled: Vec::new(),
        }
    }

    fn handle(&mut self, req: EngineRequest, now: DateTime<Utc>) {
        match req {
            EngineRequest::Begin { reply } => {
                let _ = reply.send(self.begin(now));
            }
            EngineRequest::Identity { identity, reply } => {
                let _ = reply.send(self.identity(identity, now));
            }
            EngineRequest::Frame { frame, reply } => {
                let _ = reply.send(self.frame(frame, now));
            }
            EngineRequest::Cancel { reply } => {
                let _ = reply.send(self.cancel(now));
            }
            EngineRequest::Progress { reply } => {
                let _ = reply.send(self.progress(now));
            }
            EngineRequest::Sweep { reply } => {
                let _ = reply.send(self.sweep(now));
            }
            EngineRequest::TakeUnsettled { reply } => {
                let _ = reply.send(std::mem::take(&mut self.unsettled));
            }
            EngineRequest::Requeue { outcome } => {
                self.unsettled.push(outcome);
            }
        }
    }

    /// Open a new attempt. An attempt left open past its budget is expired
    /// first and its outcome queued, so an abandoned attempt never blocks
    /// the device.
    fn begin(&mut self, now: DateTime<Utc>) -> Result<AttemptProgress, EngineError> {
        self.sweep(now);
        if self.attempt.is_some() {
            return Err(EngineError::AttemptInFlight);
        }
        let attempt = self.pipeline.begin(now);
        let progress = attempt.progress(now);
        self.attempt = Some(attempt);
        self.clock_offset = None;
        Ok(progress)
    }

    fn identity(
        &mut self,
        identity: IdentityMatch,
        now: DateTime<Utc>,
    ) -> Result<Step, EngineError> {
        self.step(now, |attempt| {
            attempt.submit_identity(identity, now);
        })
    }

    fn frame(&mut self, frame: Frame, now: DateTime<Utc>) -> Result<Step, EngineError> {
        if self.attempt.is_none() {
            return Err(EngineError::NoAttempt);
        }
        let frame = self.restamp(frame, now);
        self.step(now, |attempt| {
            attempt.tick(now);
            attempt.observe_frame(&frame);
        })
    }

    fn cancel(&mut self, now: DateTime<Utc>) -> Result<Step, EngineError> {
        self.step(now, |attempt| {
            attempt.cancel(now);
        })
    }

    fn progress(&mut self, now: DateTime<Utc>) -> Result<Step, EngineError> {
        self.step(now, |attempt| {
            attempt.tick(now);
        })
    }

    fn sweep(&mut self, now: DateTime<Utc>) -> bool {
        let Some(attempt) = self.attempt.as_mut() else {
            return false;
        };
        attempt.tick(now);
        self.retire_if_terminal().is_some()
    }

    /// Move a provider timestamp onto the engine clock.
    ///
    /// The first frame of an attempt fixes the offset between the two clocks,
    /// so later frames keep the provider's inter-frame spacing. No frame is
    /// placed after `now`.
    fn restamp(&mut self, mut frame: Frame, now: DateTime<Utc>) -> Frame {
        let captured_at = frame.captured_at;
        let offset = *self.clock_offset.get_or_insert_with(|| now - captured_at);
        frame.captured_at = captured_at
            .checked_add_signed(offset)
            .map_or(now, |at| at.min(now));
        frame
    }

    fn step<F>(&mut self, now: DateTime<Utc>, apply: F) -> Result<Step, EngineError>
    where
        F: FnOnce(&mut VerificationAttempt),
    {
        let attempt = self.attempt.as_mut().ok_or(EngineError::NoAttempt)?;
        apply(attempt);
        let progress = attempt.progress(now);
        let outcome = self.retire_if_terminal();
        Ok(Step { progress, outcome })
    }

    /// Free the slot once the attempt is terminal, keeping its outcome queued.
    fn retire_if_terminal(&mut self) -> Option<VerificationOutcome> {
        let outcome = self.attempt.as_ref()?.outcome()?;
        tracing::info!(
            attempt_id = %outcome.attempt_id,
            verdict = ?outcome.verdict,
            "attempt finished, awaiting settlement"
        );
        self.attempt = None;
        self.clock_offset = None;
        self.unsettled.push(outcome.clone());
        Some(outcome)
    }
}
