use crate::domain::ids::is_local_placeholder;
use crate::domain::models::StopwatchState;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::EventStore;
use crate::infrastructure::timer_state_repository::TimerStateRepository;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Nothing was running.
    Idle,
    /// The persisted run still has a live event in the store, or never
    /// reached it and is still waiting for its first create.
    Resumed(StopwatchState),
    /// The persisted run was reset to stopped.
    DiscardedStale { reason: String },
    /// The store could not be asked; persisted state was left untouched.
    StoreUnavailable(String),
}

/// Decides at startup whether a persisted running stopwatch is still valid.
pub struct RestartRecovery<E, T>
where
    E: EventStore + ?Sized,
    T: TimerStateRepository + ?Sized,
{
    store: Arc<E>,
    repository: Arc<T>,
}

impl<E, T> RestartRecovery<E, T>
where
    E: EventStore + ?Sized,
    T: TimerStateRepository + ?Sized,
{
    pub fn new(store: Arc<E>, repository: Arc<T>) -> Self {
        Self { store, repository }
    }

    pub async fn recover(&self) -> Result<RecoveryOutcome, InfraError> {
        let state = match self.repository.load() {
            Ok(Some(state)) => state,
            Ok(None) => return Ok(RecoveryOutcome::Idle),
            Err(error @ (InfraError::Validation(_) | InfraError::Json(_))) => {
                return self.discard(format!("unreadable persisted state: {error}"));
            }
            Err(error) => return Err(error),
        };

        if !state.is_running {
            return Ok(RecoveryOutcome::Idle);
        }
        let Some(live_event_id) = state.live_event_id.clone() else {
            return self.discard("running state without live event id".to_string());
        };
        if !state.is_synced_with_store || is_local_placeholder(&live_event_id) {
            // Nothing in the store to verify against; the next tick creates
            // the live event or stop creates it finished.
            tracing::info!(id = %live_event_id, "resuming unsynced stopwatch after restart");
            return Ok(RecoveryOutcome::Resumed(state));
        }

        match self.store.get(&live_event_id).await {
            Ok(Some(event)) if event.is_live => {
                tracing::info!(id = %live_event_id, "resuming stopwatch after restart");
                Ok(RecoveryOutcome::Resumed(state))
            }
            Ok(Some(_)) => self.discard(format!("live event {live_event_id} is already finished")),
            Ok(None) => self.discard(format!("live event {live_event_id} no longer exists")),
            Err(error) => {
                tracing::warn!(error = %error, id = %live_event_id, "could not verify running stopwatch");
                Ok(RecoveryOutcome::StoreUnavailable(error.to_string()))
            }
        }
    }

    fn discard(&self, reason: String) -> Result<RecoveryOutcome, InfraError> {
        tracing::info!(%reason, "discarding stale stopwatch state");
        self.repository.save(&StopwatchState::stopped())?;
        Ok(RecoveryOutcome::DiscardedStale { reason })
    }
}
