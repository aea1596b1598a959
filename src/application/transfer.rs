use crate::application::projects::random_color;
use crate::domain::models::{CalendarEventDraft, DayDetails, EventType};
use crate::infrastructure::csv_codec::{export_item, read_import, write_export, ExportDay};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::{DayDetailsStore, EventStore, ProjectDraft, ProjectStore};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportSummary {
    pub days: usize,
    pub events: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub days: usize,
    pub events: usize,
    pub skipped_events: usize,
    pub new_projects: Vec<String>,
}

/// CSV export and import across the three record stores.
pub struct TransferService<E, P, D>
where
    E: EventStore + ?Sized,
    P: ProjectStore + ?Sized,
    D: DayDetailsStore + ?Sized,
{
    events: Arc<E>,
    projects: Arc<P>,
    days: Arc<D>,
}

impl<E, P, D> TransferService<E, P, D>
where
    E: EventStore + ?Sized,
    P: ProjectStore + ?Sized,
    D: DayDetailsStore + ?Sized,
{
    pub fn new(events: Arc<E>, projects: Arc<P>, days: Arc<D>) -> Self {
        Self {
            events,
            projects,
            days,
        }
    }

    /// One row per date in `start..=end` that has finished events or day
    /// details.
    pub async fn export<W: Write>(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        writer: W,
    ) -> Result<ExportSummary, InfraError> {
        let project_names = self
            .projects
            .list()
            .await?
            .into_iter()
            .map(|project| (project.id, project.name))
            .collect::<HashMap<_, _>>();

        let mut rows: BTreeMap<NaiveDate, ExportDay> = BTreeMap::new();
        let mut event_count = 0;
        for details in self.days.query_range(start, end).await? {
            if details.is_empty() {
                continue;
            }
            let row = rows.entry(details.date).or_insert_with(|| empty_row(details.date));
            row.calories = details.calories;
            row.comment = details.comment;
        }
        for event in self.events.query_range(start, end).await? {
            if event.is_live {
                continue;
            }
            let project_name = event.project_id.as_deref().map(|id| {
                project_names
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown Project".to_string())
            });
            let item = export_item(
                &event.title,
                event.description.as_deref(),
                event.start_time,
                event.end_time,
                project_name.as_deref(),
                event.event_type.as_str(),
            );
            let row = rows.entry(event.date).or_insert_with(|| empty_row(event.date));
            match event.event_type {
                EventType::Event => row.events.push(item),
                EventType::Project => row.projects.push(item),
            }
            event_count += 1;
        }

        let days = rows.into_values().collect::<Vec<_>>();
        write_export(writer, &days)?;
        Ok(ExportSummary {
            days: days.len(),
            events: event_count,
        })
    }

    /// Adds the file's events and day details. Project names are matched
    /// ignoring case; unknown ones are created with a random color.
    pub async fn import<R: Read>(&self, reader: R) -> Result<ImportSummary, InfraError> {
        let imported = read_import(reader)?;

        let mut project_ids = self
            .projects
            .list()
            .await?
            .into_iter()
            .map(|project| (project.name.to_lowercase(), project.id))
            .collect::<HashMap<_, _>>();
        let mut summary = ImportSummary {
            days: 0,
            events: 0,
            skipped_events: 0,
            new_projects: Vec::new(),
        };

        for day in imported {
            for item in day.items {
                let project_id = match item.project_name.as_deref() {
                    Some(name) => Some(self.project_id_for(name, &mut project_ids, &mut summary).await?),
                    None => None,
                };
                let draft = CalendarEventDraft {
                    title: item.title,
                    description: item.description,
                    date: day.date,
                    start_time: item.start_time,
                    end_time: item.end_time,
                    event_type: EventType::for_project(project_id.as_deref()),
                    project_id,
                    is_live: false,
                };
                if let Err(message) = draft.validate() {
                    tracing::warn!(date = %day.date, %message, "skipping imported event");
                    summary.skipped_events += 1;
                    continue;
                }
                self.events.create(&draft).await?;
                summary.events += 1;
            }

            let details = DayDetails {
                date: day.date,
                calories: day.calories,
                comment: day.comment,
            };
            if !details.is_empty() {
                self.days.upsert(&details).await?;
            }
            summary.days += 1;
        }
        Ok(summary)
    }

    async fn project_id_for(
        &self,
        name: &str,
        project_ids: &mut HashMap<String, String>,
        summary: &mut ImportSummary,
    ) -> Result<String, InfraError> {
        let key = name.to_lowercase();
        if let Some(id) = project_ids.get(&key) {
            return Ok(id.clone());
        }
        let created = self
            .projects
            .create(&ProjectDraft {
                name: name.to_string(),
                color: random_color(),
            })
            .await?;
        tracing::info!(name, id = %created.id, "created project during import");
        project_ids.insert(key, created.id.clone());
        summary.new_projects.push(created.name);
        Ok(created.id)
    }
}

fn empty_row(date: NaiveDate) -> ExportDay {
    ExportDay {
        date,
        calories: Default::default(),
        comment: String::new(),
        events: Vec::new(),
        projects: Vec::new(),
    }
}
