use crate::domain::models::StopwatchState;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::{load_typed, save_typed, KeyValueStore};
use std::sync::{Arc, Mutex};

pub const STOPWATCH_KEY: &str = "stopwatch";

/// Durable home of the stopwatch between process restarts.
pub trait TimerStateRepository: Send + Sync {
    fn load(&self) -> Result<Option<StopwatchState>, InfraError>;
    fn save(&self, state: &StopwatchState) -> Result<(), InfraError>;
}

#[derive(Debug)]
pub struct KeyValueTimerStateRepository<K>
where
    K: KeyValueStore + ?Sized,
{
    store: Arc<K>,
}

impl<K> KeyValueTimerStateRepository<K>
where
    K: KeyValueStore + ?Sized,
{
    pub fn new(store: Arc<K>) -> Self {
        Self { store }
    }
}

impl<K> TimerStateRepository for KeyValueTimerStateRepository<K>
where
    K: KeyValueStore + ?Sized,
{
    fn load(&self) -> Result<Option<StopwatchState>, InfraError> {
        let state: Option<StopwatchState> = load_typed(self.store.as_ref(), STOPWATCH_KEY)?;
        if let Some(state) = &state {
            state.validate().map_err(|message| {
                InfraError::Validation(format!("invalid persisted stopwatch: {message}"))
            })?;
        }
        Ok(state)
    }

    fn save(&self, state: &StopwatchState) -> Result<(), InfraError> {
        save_typed(self.store.as_ref(), STOPWATCH_KEY, state)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTimerStateRepository {
    state: Mutex<Option<StopwatchState>>,
}

impl InMemoryTimerStateRepository {
    pub fn with_state(state: StopwatchState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }
}

impl TimerStateRepository for InMemoryTimerStateRepository {
    fn load(&self) -> Result<Option<StopwatchState>, InfraError> {
        let state = self
            .state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("timer state lock poisoned: {error}")))?;
        Ok(state.clone())
    }

    fn save(&self, state: &StopwatchState) -> Result<(), InfraError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("timer state lock poisoned: {error}")))?;
        *guard = Some(state.clone());
        Ok(())
    }
}
