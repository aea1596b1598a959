use crate::domain::models::CalendarEvent;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::sort_events;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

const SIGNAL_CHANNEL_CAPACITY: usize = 256;

/// Notifications for whatever renders the stopwatch and the calendar grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopwatchSignal {
    TimerTick { elapsed_label: String },
    CalendarChanged,
    StateChanged { running: bool },
}

/// In-process list of displayed calendar events. The live event of a
/// running stopwatch is kept here even when the store cannot be reached.
#[derive(Debug)]
pub struct EventBoard {
    events: Mutex<Vec<CalendarEvent>>,
    signals: broadcast::Sender<StopwatchSignal>,
}

impl Default for EventBoard {
    fn default() -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            events: Mutex::new(Vec::new()),
            signals,
        }
    }
}

impl EventBoard {
    pub fn subscribe(&self) -> broadcast::Receiver<StopwatchSignal> {
        self.signals.subscribe()
    }

    pub fn emit(&self, signal: StopwatchSignal) {
        let _ = self.signals.send(signal);
    }

    fn lock_events(&self) -> Result<MutexGuard<'_, Vec<CalendarEvent>>, InfraError> {
        self.events
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("event board lock poisoned: {error}")))
    }

    /// Insert-or-replace by id, then announce `CalendarChanged`.
    pub fn upsert(&self, event: CalendarEvent) -> Result<(), InfraError> {
        {
            let mut events = self.lock_events()?;
            match events.iter_mut().find(|existing| existing.id == event.id) {
                Some(existing) => *existing = event,
                None => events.push(event),
            }
        }
        self.emit(StopwatchSignal::CalendarChanged);
        Ok(())
    }

    /// Re-keys an entry, used when the store assigns the real id of a live
    /// event. Returns false when `old_id` is not on the board.
    pub fn replace_id(&self, old_id: &str, new_id: &str) -> Result<bool, InfraError> {
        let replaced = {
            let mut events = self.lock_events()?;
            events.retain(|event| event.id != new_id || old_id == new_id);
            match events.iter_mut().find(|event| event.id == old_id) {
                Some(event) => {
                    event.id = new_id.to_string();
                    true
                }
                None => false,
            }
        };
        if replaced {
            self.emit(StopwatchSignal::CalendarChanged);
        }
        Ok(replaced)
    }

    pub fn get(&self, id: &str) -> Result<Option<CalendarEvent>, InfraError> {
        Ok(self.lock_events()?.iter().find(|event| event.id == id).cloned())
    }

    pub fn list(&self) -> Result<Vec<CalendarEvent>, InfraError> {
        let mut events = self.lock_events()?.clone();
        sort_events(&mut events);
        Ok(events)
    }

    /// Replaces the board with freshly loaded events. Live entries that the
    /// load did not return stay, so a running stopwatch never vanishes.
    pub fn replace_all(&self, loaded: Vec<CalendarEvent>) -> Result<(), InfraError> {
        {
            let mut events = self.lock_events()?;
            let kept = events
                .iter()
                .filter(|event| event.is_live && loaded.iter().all(|other| other.id != event.id))
                .cloned()
                .collect::<Vec<_>>();
            *events = loaded;
            events.extend(kept);
        }
        self.emit(StopwatchSignal::CalendarChanged);
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<bool, InfraError> {
        let removed = {
            let mut events = self.lock_events()?;
            let before = events.len();
            events.retain(|event| event.id != id);
            events.len() != before
        };
        if removed {
            self.emit(StopwatchSignal::CalendarChanged);
        }
        Ok(removed)
    }
}
