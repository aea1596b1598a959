use crate::domain::models::Project;
use crate::domain::timekeeping::{format_minutes, start_of_week};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::{EventStore, ProjectDraft, ProjectStore};
use chrono::{Duration, NaiveDate};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProjectStats {
    pub project_id: String,
    pub today_minutes: i64,
    pub week_minutes: i64,
    pub today_label: String,
    pub week_label: String,
}

/// `#RRGGBB` with uniformly random channels.
pub fn random_color() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..=0x00FF_FFFF);
    format!("#{value:06X}")
}

pub struct ProjectService<P, E>
where
    P: ProjectStore + ?Sized,
    E: EventStore + ?Sized,
{
    projects: Arc<P>,
    events: Arc<E>,
}

impl<P, E> ProjectService<P, E>
where
    P: ProjectStore + ?Sized,
    E: EventStore + ?Sized,
{
    pub fn new(projects: Arc<P>, events: Arc<E>) -> Self {
        Self { projects, events }
    }

    pub async fn list(&self) -> Result<Vec<Project>, InfraError> {
        self.projects.list().await
    }

    /// Id to display name, as used for live event titles.
    pub async fn names(&self) -> Result<HashMap<String, String>, InfraError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .map(|project| (project.id, project.name))
            .collect())
    }

    /// Looks a project up by exact id first, then by name ignoring case.
    pub async fn resolve(&self, id_or_name: &str) -> Result<Project, InfraError> {
        let needle = id_or_name.trim();
        let projects = self.list().await?;
        projects
            .iter()
            .find(|project| project.id == needle)
            .or_else(|| {
                projects
                    .iter()
                    .find(|project| project.name.to_lowercase() == needle.to_lowercase())
            })
            .cloned()
            .ok_or_else(|| InfraError::NotFound(format!("project {needle}")))
    }

    pub async fn create(&self, name: &str) -> Result<Project, InfraError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(InfraError::Validation("project name must not be empty".to_string()));
        }
        let lowered = name.to_lowercase();
        if self
            .list()
            .await?
            .iter()
            .any(|project| project.name.to_lowercase() == lowered)
        {
            return Err(InfraError::Validation(format!("project '{name}' already exists")));
        }

        self.projects
            .create(&ProjectDraft {
                name: name.to_string(),
                color: random_color(),
            })
            .await
    }

    /// Events of the project stay, unlinked.
    pub async fn delete(&self, id: &str) -> Result<(), InfraError> {
        self.projects.delete(id).await
    }

    /// Tracked minutes for `today` and its Monday-based week. Live events
    /// are still growing and are left out.
    pub async fn stats(&self, project_id: &str, today: NaiveDate) -> Result<ProjectStats, InfraError> {
        let week_start = start_of_week(today);
        let events = self
            .events
            .query_range(week_start, week_start + Duration::days(6))
            .await?;

        let (today_minutes, week_minutes) = events
            .iter()
            .filter(|event| !event.is_live && event.project_id.as_deref() == Some(project_id))
            .fold((0i64, 0i64), |(day, week), event| {
                let minutes = event.duration_minutes();
                let day = if event.date == today { day + minutes } else { day };
                (day, week + minutes)
            });

        Ok(ProjectStats {
            project_id: project_id.to_string(),
            today_minutes,
            week_minutes,
            today_label: format_minutes(today_minutes),
            week_label: format_minutes(week_minutes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CalendarEvent, CalendarEventDraft, EventType};
    use crate::infrastructure::kv_store::InMemoryKeyValueStore;
    use crate::infrastructure::local_store::LocalRecordStore;
    use chrono::NaiveTime;
    use proptest::prelude::*;

    type Store = LocalRecordStore<InMemoryKeyValueStore>;

    fn service() -> (Arc<Store>, ProjectService<Store, Store>) {
        let store = Arc::new(LocalRecordStore::new(Arc::new(InMemoryKeyValueStore::default())));
        (store.clone(), ProjectService::new(store.clone(), store))
    }

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn entry(day: &str, start: (u32, u32), end: (u32, u32), project_id: &str, is_live: bool) -> CalendarEventDraft {
        CalendarEventDraft {
            title: "Session".to_string(),
            description: None,
            date: date(day),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).expect("time"),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).expect("time"),
            project_id: Some(project_id.to_string()),
            is_live,
            event_type: EventType::Project,
        }
    }

    #[tokio::test]
    async fn names_are_unique_ignoring_case() {
        let (_store, service) = service();
        let created = service.create("  Thesis ").await.expect("create");
        assert_eq!(created.name, "Thesis");
        assert!(created.validate().is_ok());

        assert!(matches!(service.create("THESIS").await, Err(InfraError::Validation(_))));
        assert!(matches!(service.create("   ").await, Err(InfraError::Validation(_))));
        assert_eq!(service.resolve("thesis").await.expect("resolve").id, created.id);
        assert!(matches!(service.resolve("other").await, Err(InfraError::NotFound(_))));
    }

    #[tokio::test]
    async fn stats_sum_today_and_week_excluding_live_events() {
        let (store, service) = service();
        let project = service.create("Thesis").await.expect("create");
        let drafts = [
            entry("2026-02-18", (9, 0), (10, 30), &project.id, false),
            entry("2026-02-18", (11, 0), (11, 35), &project.id, false),
            entry("2026-02-16", (8, 0), (9, 0), &project.id, false),
            entry("2026-02-18", (12, 0), (13, 0), &project.id, true),
            entry("2026-02-23", (8, 0), (9, 0), &project.id, false),
            entry("2026-02-18", (14, 0), (15, 0), "prj-other", false),
        ];
        for draft in &drafts {
            EventStore::create(store.as_ref(), draft).await.expect("seed");
        }

        let stats = service.stats(&project.id, date("2026-02-18")).await.expect("stats");
        assert_eq!(stats.today_minutes, 125);
        assert_eq!(stats.week_minutes, 185);
        assert_eq!(stats.today_label, "2 h 5 min");
        assert_eq!(stats.week_label, "3 h 5 min");
    }

    #[tokio::test]
    async fn delete_keeps_events_unlinked() {
        let (store, service) = service();
        let project = service.create("Thesis").await.expect("create");
        let event: CalendarEvent = EventStore::create(
            store.as_ref(),
            &entry("2026-02-18", (9, 0), (10, 0), &project.id, false),
        )
        .await
        .expect("seed");

        service.delete(&project.id).await.expect("delete");
        let kept = EventStore::get(store.as_ref(), &event.id)
            .await
            .expect("get")
            .expect("event kept");
        assert_eq!(kept.project_id, None);
    }

    proptest! {
        #[test]
        fn random_colors_are_hex_rgb(_seed in 0u8..50) {
            let color = random_color();
            prop_assert_eq!(color.len(), 7);
            prop_assert!(color.starts_with('#'));
            prop_assert!(color[1..].chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
