use crate::application::event_board::EventBoard;
use crate::domain::models::{
    CalendarEvent, CalendarEventDraft, CalendarEventPatch, EventType, StopwatchState,
};
use crate::domain::timekeeping::{end_of_day, format_run_duration, local_date_time};
use crate::infrastructure::record_store::EventStore;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const DEFAULT_SYNC_INTERVAL_SECONDS: i64 = 15;
const DEFAULT_GENERIC_LABEL: &str = "Work";

/// Result of one store phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    NotRunning,
    Skipped,
    Created { store_id: String },
    Updated,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    NotRunning,
    AlreadyFinalized,
    Updated,
    CreatedFinalized { store_id: String },
    StoreFailed(String),
}

/// Keeps the live calendar event of a running stopwatch in step with the
/// Event Board on every tick and with the store at a bounded rate.
pub struct LiveEventReconciler<E>
where
    E: EventStore + ?Sized,
{
    store: Arc<E>,
    board: Arc<EventBoard>,
    now_provider: NowProvider,
    sync_interval: Duration,
    time_zone: Tz,
    generic_label: String,
    project_names: HashMap<String, String>,
    /// Live event id of the most recently finalized run.
    finalized_run: Mutex<Option<String>>,
}

impl<E> LiveEventReconciler<E>
where
    E: EventStore + ?Sized,
{
    pub fn new(store: Arc<E>, board: Arc<EventBoard>) -> Self {
        Self {
            store,
            board,
            now_provider: Arc::new(Utc::now),
            sync_interval: Duration::seconds(DEFAULT_SYNC_INTERVAL_SECONDS),
            time_zone: Tz::UTC,
            generic_label: DEFAULT_GENERIC_LABEL.to_string(),
            project_names: HashMap::new(),
            finalized_run: Mutex::new(None),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_sync_interval(mut self, sync_interval: std::time::Duration) -> Self {
        self.sync_interval = Duration::from_std(sync_interval)
            .unwrap_or_else(|_| Duration::seconds(DEFAULT_SYNC_INTERVAL_SECONDS));
        self
    }

    pub fn with_time_zone(mut self, time_zone: Tz) -> Self {
        self.time_zone = time_zone;
        self
    }

    pub fn with_generic_label(mut self, generic_label: impl Into<String>) -> Self {
        self.generic_label = generic_label.into();
        self
    }

    pub fn with_project_names(mut self, project_names: HashMap<String, String>) -> Self {
        self.project_names = project_names;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn board(&self) -> Arc<EventBoard> {
        self.board.clone()
    }

    fn title_for(&self, project_id: Option<&str>, elapsed: Duration) -> String {
        let label = project_id
            .and_then(|id| self.project_names.get(id))
            .map(String::as_str)
            .unwrap_or(self.generic_label.as_str());
        format!("{label} ({})", format_run_duration(elapsed))
    }

    /// Calendar event describing the run at `now`, or `None` when the
    /// stopwatch is not running.
    pub fn build_snapshot(&self, state: &StopwatchState, now: DateTime<Utc>) -> Option<CalendarEvent> {
        if !state.is_running {
            return None;
        }
        let start = state.start_timestamp?;
        let id = state.live_event_id.clone()?;
        let elapsed = (now - start).max(Duration::zero());

        let (date, start_time) = local_date_time(start, self.time_zone);
        let (end_date, end_time) = local_date_time(start + elapsed, self.time_zone);
        // Events are same-day; a run crossing midnight ends at 23:59:59.
        let end_time = if end_date > date {
            end_of_day()
        } else {
            end_time.max(start_time)
        };

        Some(CalendarEvent {
            id,
            title: self.title_for(state.project_id.as_deref(), elapsed),
            description: None,
            date,
            start_time,
            end_time,
            project_id: state.project_id.clone(),
            is_live: true,
            event_type: EventType::for_project(state.project_id.as_deref()),
        })
    }

    /// Local phase of a tick: put the current snapshot on the board.
    pub fn refresh_local(&self, state: &StopwatchState) -> Option<CalendarEvent> {
        let snapshot = self.build_snapshot(state, self.now())?;
        if let Err(error) = self.board.upsert(snapshot.clone()) {
            tracing::warn!(error = %error, "failed to refresh live event on board");
        }
        Some(snapshot)
    }

    fn is_finalized(&self, live_event_id: &str) -> bool {
        self.finalized_run
            .lock()
            .map(|run| run.as_deref() == Some(live_event_id))
            .unwrap_or(false)
    }

    /// Store phase of a tick. Sync fields of `state` are updated in place
    /// on success; failures are logged and left for the next eligible tick.
    pub async fn sync_store(&self, state: &mut StopwatchState) -> SyncOutcome {
        let now = self.now();
        let Some(snapshot) = self.build_snapshot(state, now) else {
            return SyncOutcome::NotRunning;
        };
        if self.is_finalized(&snapshot.id) {
            return SyncOutcome::Skipped;
        }

        if !state.is_synced_with_store {
            let placeholder = snapshot.id.clone();
            return match self.store.create(&snapshot.to_draft()).await {
                Ok(created) => {
                    if let Err(error) = self.board.replace_id(&placeholder, &created.id) {
                        tracing::warn!(error = %error, "failed to re-key live event on board");
                    }
                    tracing::info!(store_id = %created.id, "live event created in store");
                    state.live_event_id = Some(created.id.clone());
                    state.is_synced_with_store = true;
                    state.last_sync_instant = Some(now);
                    SyncOutcome::Created {
                        store_id: created.id,
                    }
                }
                Err(error) => {
                    tracing::warn!(error = %error, "live event create failed; retrying next tick");
                    SyncOutcome::Failed(error.to_string())
                }
            };
        }

        let due = state
            .last_sync_instant
            .map(|last| now - last >= self.sync_interval)
            .unwrap_or(true);
        if !due {
            return SyncOutcome::Skipped;
        }

        let patch = CalendarEventPatch {
            title: Some(snapshot.title),
            end_time: Some(snapshot.end_time),
            ..CalendarEventPatch::default()
        };
        match self.store.update(&snapshot.id, &patch).await {
            Ok(_) => {
                state.last_sync_instant = Some(now);
                SyncOutcome::Updated
            }
            Err(error) => {
                tracing::warn!(error = %error, id = %snapshot.id, "live event update failed");
                SyncOutcome::Failed(error.to_string())
            }
        }
    }

    /// Both phases of a tick in sequence.
    pub async fn on_tick(&self, state: &mut StopwatchState) -> SyncOutcome {
        if self.refresh_local(state).is_none() {
            return SyncOutcome::NotRunning;
        }
        self.sync_store(state).await
    }

    /// Writes the final version of a run exactly once. The board entry is
    /// marked finished first so the UI is correct even when the store
    /// rejects the write.
    pub async fn finalize(&self, state: &StopwatchState) -> FinalizeOutcome {
        let now = self.now();
        let Some(mut snapshot) = self.build_snapshot(state, now) else {
            return FinalizeOutcome::NotRunning;
        };
        let first_time = match self.finalized_run.lock() {
            Ok(run) if run.as_deref() == Some(snapshot.id.as_str()) => false,
            Ok(mut run) => {
                *run = Some(snapshot.id.clone());
                true
            }
            Err(error) => {
                tracing::warn!(error = %error, "finalized run guard poisoned");
                true
            }
        };
        if !first_time {
            return FinalizeOutcome::AlreadyFinalized;
        }

        snapshot.is_live = false;
        if let Err(error) = self.board.upsert(snapshot.clone()) {
            tracing::warn!(error = %error, "failed to mark live event finished on board");
        }

        if state.is_synced_with_store {
            let patch = CalendarEventPatch {
                title: Some(snapshot.title.clone()),
                end_time: Some(snapshot.end_time),
                is_live: Some(false),
                ..CalendarEventPatch::default()
            };
            return match self.store.update(&snapshot.id, &patch).await {
                Ok(_) => FinalizeOutcome::Updated,
                Err(error) => {
                    tracing::warn!(error = %error, id = %snapshot.id, "final live event update failed");
                    FinalizeOutcome::StoreFailed(error.to_string())
                }
            };
        }

        let draft: CalendarEventDraft = snapshot.to_draft();
        match self.store.create(&draft).await {
            Ok(created) => {
                if let Err(error) = self.board.replace_id(&snapshot.id, &created.id) {
                    tracing::warn!(error = %error, "failed to re-key finished event on board");
                }
                FinalizeOutcome::CreatedFinalized {
                    store_id: created.id,
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "finished event create failed");
                FinalizeOutcome::StoreFailed(error.to_string())
            }
        }
    }
}
