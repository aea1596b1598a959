use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Event,
    Project,
}

impl EventType {
    pub fn for_project(project_id: Option<&str>) -> Self {
        match project_id {
            Some(_) => Self::Project,
            None => Self::Event,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Project => "project",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub project_id: Option<String>,
    pub is_live: bool,
    pub event_type: EventType,
}

impl CalendarEvent {
    pub fn from_draft(id: impl Into<String>, draft: CalendarEventDraft) -> Self {
        Self {
            id: id.into(),
            title: draft.title,
            description: draft.description,
            date: draft.date,
            start_time: draft.start_time,
            end_time: draft.end_time,
            project_id: draft.project_id,
            is_live: draft.is_live,
            event_type: draft.event_type,
        }
    }

    pub fn to_draft(&self) -> CalendarEventDraft {
        CalendarEventDraft {
            title: self.title.clone(),
            description: self.description.clone(),
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
            project_id: self.project_id.clone(),
            is_live: self.is_live,
            event_type: self.event_type,
        }
    }

    pub fn apply_patch(&mut self, patch: &CalendarEventPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(start_time) = patch.start_time {
            self.start_time = start_time;
        }
        if let Some(end_time) = patch.end_time {
            self.end_time = end_time;
        }
        if let Some(project_id) = &patch.project_id {
            self.project_id = project_id.clone();
            self.event_type = EventType::for_project(self.project_id.as_deref());
        }
        if let Some(is_live) = patch.is_live {
            self.is_live = is_live;
        }
    }

    /// Whole minutes between start and end, never negative.
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes().max(0)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "event.id")?;
        self.to_draft().validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEventDraft {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub project_id: Option<String>,
    pub is_live: bool,
    pub event_type: EventType,
}

impl CalendarEventDraft {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "event.title")?;
        if self.end_time < self.start_time {
            return Err("event.end_time must not be before event.start_time".to_string());
        }
        if self.event_type != EventType::for_project(self.project_id.as_deref()) {
            return Err("event.type must match event.project_id".to_string());
        }
        Ok(())
    }
}

/// Partial update. `description` and `project_id` use a nested option so a
/// patch can clear them (`Some(None)`) as well as leave them alone (`None`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_live: Option<bool>,
}

impl CalendarEventPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub color: String,
}

impl Project {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "project.id")?;
        validate_non_empty(&self.name, "project.name")?;
        validate_color(&self.color, "project.color")
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Calories {
    #[serde(default)]
    pub morning: u32,
    #[serde(default)]
    pub afternoon: u32,
    #[serde(default)]
    pub evening: u32,
}

impl Calories {
    pub fn total(&self) -> u32 {
        self.morning
            .saturating_add(self.afternoon)
            .saturating_add(self.evening)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayDetails {
    pub date: NaiveDate,
    #[serde(default)]
    pub calories: Calories,
    #[serde(default)]
    pub comment: String,
}

impl DayDetails {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            calories: Calories::default(),
            comment: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calories.total() == 0 && self.comment.trim().is_empty()
    }
}

/// Persisted state of the project stopwatch.
///
/// `live_event_id` starts as a locally generated placeholder and is swapped
/// for the store-assigned id the first time the live event is created
/// remotely; from then on `is_synced_with_store` is true and the id is fixed
/// for the rest of the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StopwatchState {
    pub is_running: bool,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
    pub live_event_id: Option<String>,
    #[serde(default)]
    pub is_synced_with_store: bool,
    #[serde(default)]
    pub last_sync_instant: Option<DateTime<Utc>>,
}

impl StopwatchState {
    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn running(
        start_timestamp: DateTime<Utc>,
        project_id: Option<String>,
        live_event_id: String,
    ) -> Self {
        Self {
            is_running: true,
            start_timestamp: Some(start_timestamp),
            project_id,
            live_event_id: Some(live_event_id),
            is_synced_with_store: false,
            last_sync_instant: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.is_running {
            if self.start_timestamp.is_none() {
                return Err("stopwatch.start_timestamp is required while running".to_string());
            }
            if self
                .live_event_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .is_none()
            {
                return Err("stopwatch.live_event_id is required while running".to_string());
            }
        }
        if self.is_synced_with_store && self.live_event_id.is_none() {
            return Err("stopwatch.is_synced_with_store requires live_event_id".to_string());
        }
        Ok(())
    }
}

/// A routine that recurs on fixed weekdays at a fixed time. It is not a
/// calendar event; only per-day completion is recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegularEvent {
    pub id: String,
    pub name: String,
    pub days: Vec<Weekday>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl RegularEvent {
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        self.days.contains(&date.weekday())
    }

    /// Id of the occurrence on `date`, the key of its completion record.
    pub fn occurrence_id(&self, date: NaiveDate) -> String {
        format!("{}-{date}", self.id)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "regular_event.id")?;
        validate_non_empty(&self.name, "regular_event.name")?;
        if self.days.is_empty() {
            return Err("regular_event.days must not be empty".to_string());
        }
        if self.end_time <= self.start_time {
            return Err("regular_event.end_time must be after start_time".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegularStatus {
    Done,
    /// Start time has passed without completion.
    Missed,
    Upcoming,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegularOccurrence {
    pub id: String,
    pub regular_event_id: String,
    pub name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub completed: bool,
    pub status: RegularStatus,
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_color(value: &str, field_name: &str) -> Result<(), String> {
    let Some(hex) = value.strip_prefix('#') else {
        return Err(format!("{field_name} must be #RRGGBB"));
    };
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("{field_name} must be #RRGGBB"));
    }
    Ok(())
}
