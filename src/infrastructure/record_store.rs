use crate::domain::models::{
    CalendarEvent, CalendarEventDraft, CalendarEventPatch, DayDetails, Project,
};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDraft {
    pub name: String,
    pub color: String,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create(&self, draft: &CalendarEventDraft) -> Result<CalendarEvent, InfraError>;

    /// Fails with `InfraError::NotFound` when no row has `id`.
    async fn update(
        &self,
        id: &str,
        patch: &CalendarEventPatch,
    ) -> Result<CalendarEvent, InfraError>;

    async fn get(&self, id: &str) -> Result<Option<CalendarEvent>, InfraError>;

    async fn delete(&self, id: &str) -> Result<(), InfraError>;

    /// Events whose date lies in `start..=end`, ordered by date then start time.
    async fn query_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, InfraError>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Project>, InfraError>;

    async fn create(&self, draft: &ProjectDraft) -> Result<Project, InfraError>;

    /// Removes the project and detaches events that referenced it.
    async fn delete(&self, id: &str) -> Result<(), InfraError>;
}

#[async_trait]
pub trait DayDetailsStore: Send + Sync {
    async fn get(&self, date: NaiveDate) -> Result<Option<DayDetails>, InfraError>;

    /// Insert-or-replace by date.
    async fn upsert(&self, details: &DayDetails) -> Result<DayDetails, InfraError>;

    async fn query_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayDetails>, InfraError>;
}

pub(crate) fn sort_events(events: &mut [CalendarEvent]) {
    events.sort_by(|left, right| {
        left.date
            .cmp(&right.date)
            .then(left.start_time.cmp(&right.start_time))
    });
}
