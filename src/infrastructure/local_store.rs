use crate::domain::ids::next_id;
use crate::domain::models::{
    CalendarEvent, CalendarEventDraft, CalendarEventPatch, DayDetails, EventType, Project,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::{load_typed, save_typed, KeyValueStore};
use crate::infrastructure::record_store::{
    sort_events, DayDetailsStore, EventStore, ProjectDraft, ProjectStore,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const CALENDAR_EVENTS_KEY: &str = "calendar_events";
pub const PROJECTS_KEY: &str = "projects";
pub const ALL_DAY_DETAILS_KEY: &str = "all_day_details";

/// Record stores kept entirely in the local key-value cache. Used when no
/// remote backend is configured.
///
/// Every operation is a read-modify-write of one key; `write_lock` keeps
/// those sequences from interleaving inside one process.
#[derive(Debug)]
pub struct LocalRecordStore<K>
where
    K: KeyValueStore + ?Sized,
{
    store: Arc<K>,
    write_lock: Mutex<()>,
}

impl<K> LocalRecordStore<K>
where
    K: KeyValueStore + ?Sized,
{
    pub fn new(store: Arc<K>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, InfraError> {
        self.write_lock
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("local store lock poisoned: {error}")))
    }

    fn load_events(&self) -> Result<Vec<CalendarEvent>, InfraError> {
        Ok(load_typed(self.store.as_ref(), CALENDAR_EVENTS_KEY)?.unwrap_or_default())
    }

    fn save_events(&self, events: &[CalendarEvent]) -> Result<(), InfraError> {
        save_typed(self.store.as_ref(), CALENDAR_EVENTS_KEY, &events)
    }

    fn load_projects(&self) -> Result<Vec<Project>, InfraError> {
        Ok(load_typed(self.store.as_ref(), PROJECTS_KEY)?.unwrap_or_default())
    }

    fn load_day_details(&self) -> Result<BTreeMap<NaiveDate, DayDetails>, InfraError> {
        Ok(load_typed(self.store.as_ref(), ALL_DAY_DETAILS_KEY)?.unwrap_or_default())
    }
}

#[async_trait]
impl<K> EventStore for LocalRecordStore<K>
where
    K: KeyValueStore + ?Sized,
{
    async fn create(&self, draft: &CalendarEventDraft) -> Result<CalendarEvent, InfraError> {
        draft.validate().map_err(InfraError::Validation)?;
        let _guard = self.guard()?;
        let mut events = self.load_events()?;
        let created = CalendarEvent::from_draft(next_id("evt"), draft.clone());
        events.push(created.clone());
        self.save_events(&events)?;
        Ok(created)
    }

    async fn update(
        &self,
        id: &str,
        patch: &CalendarEventPatch,
    ) -> Result<CalendarEvent, InfraError> {
        let _guard = self.guard()?;
        let mut events = self.load_events()?;
        let Some(event) = events.iter_mut().find(|event| event.id == id) else {
            return Err(InfraError::NotFound(format!("calendar event {id}")));
        };
        event.apply_patch(patch);
        event.validate().map_err(InfraError::Validation)?;
        let updated = event.clone();
        self.save_events(&events)?;
        Ok(updated)
    }

    async fn get(&self, id: &str) -> Result<Option<CalendarEvent>, InfraError> {
        Ok(self.load_events()?.into_iter().find(|event| event.id == id))
    }

    async fn delete(&self, id: &str) -> Result<(), InfraError> {
        let _guard = self.guard()?;
        let mut events = self.load_events()?;
        let before = events.len();
        events.retain(|event| event.id != id);
        if events.len() != before {
            self.save_events(&events)?;
        }
        Ok(())
    }

    async fn query_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        let mut events = self
            .load_events()?
            .into_iter()
            .filter(|event| event.date >= start && event.date <= end)
            .collect::<Vec<_>>();
        sort_events(&mut events);
        Ok(events)
    }
}

#[async_trait]
impl<K> ProjectStore for LocalRecordStore<K>
where
    K: KeyValueStore + ?Sized,
{
    async fn list(&self) -> Result<Vec<Project>, InfraError> {
        let mut projects = self.load_projects()?;
        projects.sort_by_key(|project| project.name.to_lowercase());
        Ok(projects)
    }

    async fn create(&self, draft: &ProjectDraft) -> Result<Project, InfraError> {
        let project = Project {
            id: next_id("prj"),
            name: draft.name.trim().to_string(),
            color: draft.color.clone(),
        };
        project.validate().map_err(InfraError::Validation)?;

        let _guard = self.guard()?;
        let mut projects = self.load_projects()?;
        projects.push(project.clone());
        save_typed(self.store.as_ref(), PROJECTS_KEY, &projects)?;
        Ok(project)
    }

    async fn delete(&self, id: &str) -> Result<(), InfraError> {
        let _guard = self.guard()?;
        let mut projects = self.load_projects()?;
        projects.retain(|project| project.id != id);
        save_typed(self.store.as_ref(), PROJECTS_KEY, &projects)?;

        let mut events = self.load_events()?;
        let mut detached = false;
        for event in events
            .iter_mut()
            .filter(|event| event.project_id.as_deref() == Some(id))
        {
            event.project_id = None;
            event.event_type = EventType::Event;
            detached = true;
        }
        if detached {
            self.save_events(&events)?;
        }
        Ok(())
    }
}

#[async_trait]
impl<K> DayDetailsStore for LocalRecordStore<K>
where
    K: KeyValueStore + ?Sized,
{
    async fn get(&self, date: NaiveDate) -> Result<Option<DayDetails>, InfraError> {
        Ok(self.load_day_details()?.remove(&date))
    }

    async fn upsert(&self, details: &DayDetails) -> Result<DayDetails, InfraError> {
        let _guard = self.guard()?;
        let mut all = self.load_day_details()?;
        all.insert(details.date, details.clone());
        save_typed(self.store.as_ref(), ALL_DAY_DETAILS_KEY, &all)?;
        Ok(details.clone())
    }

    async fn query_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayDetails>, InfraError> {
        Ok(self
            .load_day_details()?
            .range(start..=end)
            .map(|(_, details)| details.clone())
            .collect())
    }
}
