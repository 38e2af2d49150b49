use std::time::Duration;

use chrono::Utc;
use rollcall_core::AttendanceDecision;
use uuid::Uuid;

use crate::engine::{EngineError, EngineHandle};
use crate::recorder::Recorder;
use crate::store::StoreError;

/// Result of one pass over the engine's finished outcomes.
#[derive(Debug, Default)]
pub struct Settlement {
    pub decisions: Vec<AttendanceDecision>,
    /// Outcomes that could not be stored and went back to the engine.
    pub requeued: Vec<(Uuid, StoreError)>,
}

impl Settlement {
    pub fn decision_for(&self, attempt_id: Uuid) -> Option<&AttendanceDecision> {
        self.decisions.iter().find(|d| d.attempt_id == attempt_id)
    }

    pub fn failure_for(&self, attempt_id: Uuid) -> Option<&StoreError> {
        self.requeued
            .iter()
            .find(|(id, _)| *id == attempt_id)
            .map(|(_, err)| err)
    }
}

/// Store every finished outcome the engine is holding.
///
/// An outcome leaves the engine only here, and goes back if its decision
/// could not be written, so a store failure delays a decision but never
/// loses it.
pub async fn settle_pending(
    engine: &EngineHandle,
    recorder: &Recorder,
) -> Result<Settlement, EngineError> {
    let mut settlement = Settlement::default();

    for outcome in engine.take_unsettled().await? {
        match recorder.settle(&outcome, Utc::now()).await {
            Ok(decision) => settlement.decisions.push(decision),
            Err(e) => {
                tracing::warn!(
                    attempt_id = %outcome.attempt_id,
                    error = %e,
                    "decision not stored, will retry"
                );
                let attempt_id = outcome.attempt_id;
                engine.requeue(outcome).await?;
                settlement.requeued.push((attempt_id, e));
            }
        }
    }

    Ok(settlement)
}

/// Expire attempts nobody is driving and retry unsettled outcomes.
pub async fn run_sweeper(engine: EngineHandle, recorder: Recorder, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let swept = engine.sweep().await;
        let settled = match swept {
            Ok(expired) => {
                if expired {
                    tracing::info!("abandoned attempt expired");
                }
                settle_pending(&engine, &recorder).await
            }
            Err(e) => Err(e),
        };

        match settled {
            Ok(settlement) if !settlement.decisions.is_empty() => {
                tracing::debug!(stored = settlement.decisions.len(), "sweeper settled outcomes");
            }
            Ok(_) => {}
            Err(EngineError::ChannelClosed) => {
                tracing::info!("engine gone, sweeper stopping");
                break;
            }
            Err(e) => tracing::warn!(error = %e, "sweep failed"),
        }
    }
}
