use crate::application::reconciler::NowProvider;
use crate::domain::ids::next_id;
use crate::domain::models::{RegularEvent, RegularOccurrence, RegularStatus};
use crate::domain::timekeeping::{local_date_time, week_dates};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::{load_typed, save_typed, KeyValueStore};
use chrono::{NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const REGULAR_EVENTS_KEY: &str = "regular_events_config";
pub const REGULAR_COMPLETIONS_KEY: &str = "regular_event_completions";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRegularEvent {
    pub name: String,
    pub days: Vec<Weekday>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Recurring routines and their per-day completion, kept in the local
/// key-value cache only.
pub struct RegularEventService<K>
where
    K: KeyValueStore + ?Sized,
{
    cache: Arc<K>,
    now_provider: NowProvider,
    time_zone: Tz,
}

impl<K> RegularEventService<K>
where
    K: KeyValueStore + ?Sized,
{
    pub fn new(cache: Arc<K>) -> Self {
        Self {
            cache,
            now_provider: Arc::new(Utc::now),
            time_zone: Tz::UTC,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_time_zone(mut self, time_zone: Tz) -> Self {
        self.time_zone = time_zone;
        self
    }

    pub fn list(&self) -> Result<Vec<RegularEvent>, InfraError> {
        Ok(load_typed(self.cache.as_ref(), REGULAR_EVENTS_KEY)?.unwrap_or_default())
    }

    fn completions(&self) -> Result<BTreeSet<String>, InfraError> {
        Ok(load_typed(self.cache.as_ref(), REGULAR_COMPLETIONS_KEY)?.unwrap_or_default())
    }

    pub fn resolve(&self, id_or_name: &str) -> Result<RegularEvent, InfraError> {
        let needle = id_or_name.trim();
        let regulars = self.list()?;
        regulars
            .iter()
            .find(|regular| regular.id == needle)
            .or_else(|| {
                regulars
                    .iter()
                    .find(|regular| regular.name.to_lowercase() == needle.to_lowercase())
            })
            .cloned()
            .ok_or_else(|| InfraError::NotFound(format!("regular event {needle}")))
    }

    pub fn create(&self, input: NewRegularEvent) -> Result<RegularEvent, InfraError> {
        let mut days = input.days;
        days.sort_by_key(|day| day.num_days_from_monday());
        days.dedup();
        let regular = RegularEvent {
            id: next_id("reg"),
            name: input.name.trim().to_string(),
            days,
            start_time: input.start_time,
            end_time: input.end_time,
        };
        regular.validate().map_err(InfraError::Validation)?;

        let mut regulars = self.list()?;
        let lowered = regular.name.to_lowercase();
        if regulars.iter().any(|existing| existing.name.to_lowercase() == lowered) {
            return Err(InfraError::Validation(format!(
                "regular event '{}' already exists",
                regular.name
            )));
        }
        regulars.push(regular.clone());
        save_typed(self.cache.as_ref(), REGULAR_EVENTS_KEY, &regulars)?;
        tracing::info!(id = %regular.id, "regular event created");
        Ok(regular)
    }

    /// Removes the routine together with its completion records.
    pub fn delete(&self, id_or_name: &str) -> Result<RegularEvent, InfraError> {
        let regular = self.resolve(id_or_name)?;
        let mut regulars = self.list()?;
        regulars.retain(|existing| existing.id != regular.id);
        save_typed(self.cache.as_ref(), REGULAR_EVENTS_KEY, &regulars)?;

        let prefix = format!("{}-", regular.id);
        let mut completions = self.completions()?;
        completions.retain(|id| !id.starts_with(&prefix));
        save_typed(self.cache.as_ref(), REGULAR_COMPLETIONS_KEY, &completions)?;
        Ok(regular)
    }

    fn occurrence(
        &self,
        regular: &RegularEvent,
        date: NaiveDate,
        completions: &BTreeSet<String>,
    ) -> RegularOccurrence {
        let id = regular.occurrence_id(date);
        let completed = completions.contains(&id);
        let now = local_date_time((self.now_provider)(), self.time_zone);
        let status = if completed {
            RegularStatus::Done
        } else if now > (date, regular.start_time) {
            RegularStatus::Missed
        } else {
            RegularStatus::Upcoming
        };
        RegularOccurrence {
            id,
            regular_event_id: regular.id.clone(),
            name: regular.name.clone(),
            date,
            start_time: regular.start_time,
            end_time: regular.end_time,
            completed,
            status,
        }
    }

    /// Occurrences in the week starting at `week_start`, ordered by date
    /// and start time.
    pub fn week(&self, week_start: NaiveDate) -> Result<Vec<RegularOccurrence>, InfraError> {
        let regulars = self.list()?;
        let completions = self.completions()?;
        let mut occurrences = week_dates(week_start)
            .into_iter()
            .flat_map(|date| {
                regulars
                    .iter()
                    .filter(move |regular| regular.occurs_on(date))
                    .map(move |regular| (regular, date))
            })
            .map(|(regular, date)| self.occurrence(regular, date, &completions))
            .collect::<Vec<_>>();
        occurrences.sort_by(|a, b| (a.date, a.start_time).cmp(&(b.date, b.start_time)));
        Ok(occurrences)
    }

    /// Flips the completion of the occurrence on `date`.
    pub fn toggle(&self, id_or_name: &str, date: NaiveDate) -> Result<RegularOccurrence, InfraError> {
        let regular = self.resolve(id_or_name)?;
        if !regular.occurs_on(date) {
            return Err(InfraError::Validation(format!(
                "{} does not occur on {date}",
                regular.name
            )));
        }

        let id = regular.occurrence_id(date);
        let mut completions = self.completions()?;
        if !completions.remove(&id) {
            completions.insert(id);
        }
        save_typed(self.cache.as_ref(), REGULAR_COMPLETIONS_KEY, &completions)?;
        Ok(self.occurrence(&regular, date, &completions))
    }
}
