use crate::application::event_board::EventBoard;
use crate::domain::models::{CalendarEvent, CalendarEventDraft, CalendarEventPatch, EventType};
use crate::domain::timekeeping::week_dates;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::EventStore;
use chrono::{Duration, NaiveDate, NaiveTime};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCalendarEvent {
    pub title: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub project_id: Option<String>,
}

/// Manual calendar editing and week loading.
pub struct CalendarService<E>
where
    E: EventStore + ?Sized,
{
    store: Arc<E>,
    board: Arc<EventBoard>,
}

impl<E> CalendarService<E>
where
    E: EventStore + ?Sized,
{
    pub fn new(store: Arc<E>, board: Arc<EventBoard>) -> Self {
        Self { store, board }
    }

    /// Loads Monday..Sunday starting at `week_start` onto the board and
    /// returns the week as displayed, live event included.
    pub async fn load_week(&self, week_start: NaiveDate) -> Result<Vec<CalendarEvent>, InfraError> {
        let week_end = week_start + Duration::days(6);
        let loaded = self.store.query_range(week_start, week_end).await?;
        self.board.replace_all(loaded)?;

        let days = week_dates(week_start);
        Ok(self
            .board
            .list()?
            .into_iter()
            .filter(|event| days.contains(&event.date))
            .collect())
    }

    pub async fn create_event(&self, input: NewCalendarEvent) -> Result<CalendarEvent, InfraError> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(InfraError::Validation("event title must not be empty".to_string()));
        }
        ensure_ordered(input.start_time, input.end_time)?;
        let project_id = normalize_optional(input.project_id);

        let draft = CalendarEventDraft {
            title: title.to_string(),
            description: normalize_optional(input.description),
            date: input.date,
            start_time: input.start_time,
            end_time: input.end_time,
            event_type: EventType::for_project(project_id.as_deref()),
            project_id,
            is_live: false,
        };
        let created = self.store.create(&draft).await?;
        self.board.upsert(created.clone())?;
        Ok(created)
    }

    pub async fn update_event(
        &self,
        id: &str,
        mut patch: CalendarEventPatch,
    ) -> Result<CalendarEvent, InfraError> {
        if patch.is_empty() {
            return Err(InfraError::Validation("nothing to update".to_string()));
        }
        let current = self.editable_event(id).await?;

        if let Some(title) = patch.title.as_mut() {
            *title = title.trim().to_string();
            if title.is_empty() {
                return Err(InfraError::Validation("event title must not be empty".to_string()));
            }
        }
        if let Some(project_id) = patch.project_id.take() {
            patch.project_id = Some(normalize_optional(project_id));
        }
        if let Some(description) = patch.description.take() {
            patch.description = Some(normalize_optional(description));
        }
        // Live flag belongs to the stopwatch.
        patch.is_live = None;

        let mut preview = current;
        preview.apply_patch(&patch);
        ensure_ordered(preview.start_time, preview.end_time)?;

        let updated = self.store.update(id, &patch).await?;
        self.board.upsert(updated.clone())?;
        Ok(updated)
    }

    pub async fn delete_event(&self, id: &str) -> Result<(), InfraError> {
        self.editable_event(id).await?;
        self.store.delete(id).await?;
        self.board.remove(id)?;
        Ok(())
    }

    async fn editable_event(&self, id: &str) -> Result<CalendarEvent, InfraError> {
        let event = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| InfraError::NotFound(format!("calendar event {id}")))?;
        if event.is_live {
            return Err(InfraError::Validation(format!(
                "event {id} is the running stopwatch; stop it first"
            )));
        }
        Ok(event)
    }
}

fn ensure_ordered(start_time: NaiveTime, end_time: NaiveTime) -> Result<(), InfraError> {
    if end_time <= start_time {
        return Err(InfraError::Validation(
            "event end time must be after its start time".to_string(),
        ));
    }
    Ok(())
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
