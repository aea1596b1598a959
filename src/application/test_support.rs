use crate::domain::models::{CalendarEvent, CalendarEventDraft, CalendarEventPatch};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::{sort_events, EventStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoreCall {
    Create { title: String, is_live: bool },
    Update { id: String, patch: CalendarEventPatch },
    Get { id: String },
    Delete { id: String },
    QueryRange,
}

#[derive(Clone)]
pub(crate) struct FakeClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub(crate) fn at(rfc3339: &str) -> Self {
        let now = DateTime::parse_from_rfc3339(rfc3339)
            .expect("valid datetime")
            .with_timezone(&Utc);
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }

    pub(crate) fn advance_seconds(&self, seconds: i64) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += Duration::seconds(seconds);
    }

    pub(crate) fn provider(&self) -> Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> {
        let clock = self.clone();
        Arc::new(move || clock.now())
    }
}

/// Event store double: keeps rows in memory, records every call and can be
/// switched offline, told to fail the next N calls, or made to block create
/// and update calls until permits are released.
#[derive(Debug, Default)]
pub(crate) struct FakeEventStore {
    rows: Mutex<HashMap<String, CalendarEvent>>,
    calls: Mutex<Vec<StoreCall>>,
    next_row: AtomicUsize,
    offline: AtomicBool,
    fail_next: AtomicUsize,
    write_gate: Option<Arc<Semaphore>>,
}

impl FakeEventStore {
    pub(crate) fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                write_gate: Some(gate.clone()),
                ..Self::default()
            },
            gate,
        )
    }

    pub(crate) fn with_rows(rows: Vec<CalendarEvent>) -> Self {
        Self {
            rows: Mutex::new(rows.into_iter().map(|row| (row.id.clone(), row)).collect()),
            ..Self::default()
        }
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_calls(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, StoreCall::Create { .. }))
            .count()
    }

    pub(crate) fn update_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, StoreCall::Update { .. }))
            .count()
    }

    pub(crate) fn row(&self, id: &str) -> Option<CalendarEvent> {
        self.rows.lock().expect("rows lock poisoned").get(id).cloned()
    }

    pub(crate) fn rows(&self) -> Vec<CalendarEvent> {
        let mut rows = self
            .rows
            .lock()
            .expect("rows lock poisoned")
            .values()
            .cloned()
            .collect::<Vec<_>>();
        sort_events(&mut rows);
        rows
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().expect("calls lock poisoned").push(call);
    }

    fn check_available(&self) -> Result<(), InfraError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(InfraError::StoreUnavailable("network error: offline".to_string()));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(InfraError::StoreUnavailable("rest store error: http 503".to_string()));
        }
        Ok(())
    }

    async fn wait_for_gate(&self) {
        if let Some(gate) = &self.write_gate {
            gate.acquire().await.expect("gate closed").forget();
        }
    }
}

#[async_trait]
impl EventStore for FakeEventStore {
    async fn create(&self, draft: &CalendarEventDraft) -> Result<CalendarEvent, InfraError> {
        self.record(StoreCall::Create {
            title: draft.title.clone(),
            is_live: draft.is_live,
        });
        self.wait_for_gate().await;
        self.check_available()?;
        draft.validate().map_err(InfraError::Validation)?;

        let id = format!("srv-{}", self.next_row.fetch_add(1, Ordering::SeqCst) + 1);
        let created = CalendarEvent::from_draft(id.clone(), draft.clone());
        self.rows
            .lock()
            .expect("rows lock poisoned")
            .insert(id, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        id: &str,
        patch: &CalendarEventPatch,
    ) -> Result<CalendarEvent, InfraError> {
        self.record(StoreCall::Update {
            id: id.to_string(),
            patch: patch.clone(),
        });
        self.wait_for_gate().await;
        self.check_available()?;

        let mut rows = self.rows.lock().expect("rows lock poisoned");
        let row = rows
            .get_mut(id)
            .ok_or_else(|| InfraError::NotFound(format!("calendar event {id}")))?;
        row.apply_patch(patch);
        Ok(row.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<CalendarEvent>, InfraError> {
        self.record(StoreCall::Get { id: id.to_string() });
        self.check_available()?;
        Ok(self.row(id))
    }

    async fn delete(&self, id: &str) -> Result<(), InfraError> {
        self.record(StoreCall::Delete { id: id.to_string() });
        self.check_available()?;
        self.rows.lock().expect("rows lock poisoned").remove(id);
        Ok(())
    }

    async fn query_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        self.record(StoreCall::QueryRange);
        self.check_available()?;
        Ok(self
            .rows()
            .into_iter()
            .filter(|row| row.date >= start && row.date <= end)
            .collect())
    }
}
