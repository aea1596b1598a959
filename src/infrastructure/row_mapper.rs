use crate::domain::models::{
    CalendarEvent, CalendarEventDraft, CalendarEventPatch, Calories, DayDetails, EventType, Project,
};
use crate::infrastructure::error::InfraError;
use chrono::{NaiveDate, NaiveTime};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

const TIME_FORMAT: &str = "%H:%M:%S";
const DEFAULT_PROJECT_COLOR: &str = "#888888";

/// Row shape of the `calendar_events` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CalendarEventRow {
    #[serde(deserialize_with = "deserialize_row_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default, deserialize_with = "deserialize_optional_row_id")]
    pub project_id: Option<String>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub is_live: Option<bool>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CalendarEventInsert {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub project_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub is_live: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProjectRow {
    #[serde(deserialize_with = "deserialize_row_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayDetailsRow {
    pub date: String,
    #[serde(default)]
    pub calories: Option<Calories>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn deserialize_row_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(value) if !value.trim().is_empty() => Ok(value),
        serde_json::Value::Number(value) => Ok(value.to_string()),
        other => Err(D::Error::custom(format!("invalid row id: {other}"))),
    }
}

fn deserialize_optional_row_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(value) if value.trim().is_empty() => Ok(None),
        serde_json::Value::String(value) => Ok(Some(value)),
        serde_json::Value::Number(value) => Ok(Some(value.to_string())),
        other => Err(D::Error::custom(format!("invalid row id: {other}"))),
    }
}

pub fn encode_draft(draft: &CalendarEventDraft) -> CalendarEventInsert {
    CalendarEventInsert {
        title: draft.title.clone(),
        description: draft.description.clone(),
        date: draft.date.to_string(),
        start_time: format_time(draft.start_time),
        end_time: format_time(draft.end_time),
        project_id: draft.project_id.clone(),
        event_type: draft.event_type.as_str().to_string(),
        is_live: draft.is_live,
    }
}

/// Only the fields present in the patch end up in the JSON body.
pub fn encode_patch(patch: &CalendarEventPatch) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    if let Some(title) = &patch.title {
        body.insert("title".to_string(), serde_json::json!(title));
    }
    if let Some(description) = &patch.description {
        body.insert("description".to_string(), serde_json::json!(description));
    }
    if let Some(date) = patch.date {
        body.insert("date".to_string(), serde_json::json!(date.to_string()));
    }
    if let Some(start_time) = patch.start_time {
        body.insert("start_time".to_string(), serde_json::json!(format_time(start_time)));
    }
    if let Some(end_time) = patch.end_time {
        body.insert("end_time".to_string(), serde_json::json!(format_time(end_time)));
    }
    if let Some(project_id) = &patch.project_id {
        body.insert("project_id".to_string(), serde_json::json!(project_id));
        body.insert(
            "type".to_string(),
            serde_json::json!(EventType::for_project(project_id.as_deref()).as_str()),
        );
    }
    if let Some(is_live) = patch.is_live {
        body.insert("is_live".to_string(), serde_json::json!(is_live));
    }
    serde_json::Value::Object(body)
}

pub fn decode_event(row: CalendarEventRow) -> Result<CalendarEvent, InfraError> {
    let date = parse_date(&row.date, "calendar_events.date")?;
    let start_time = parse_time(&row.start_time, "calendar_events.start_time")?;
    let end_time = parse_time(&row.end_time, "calendar_events.end_time")?;
    let project_id = row
        .project_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    // The column is informational; the link to a project is what counts.
    let event_type = EventType::for_project(project_id.as_deref());
    if let Some(raw) = row.event_type.as_deref() {
        if !raw.eq_ignore_ascii_case(event_type.as_str()) {
            tracing::debug!(id = %row.id, raw_type = raw, "calendar event type disagrees with project link");
        }
    }

    Ok(CalendarEvent {
        id: row.id,
        title: row
            .title
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "Untitled".to_string()),
        description: row
            .description
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        date,
        start_time,
        end_time,
        project_id,
        is_live: row.is_live.unwrap_or(false),
        event_type,
    })
}

pub fn decode_project(row: ProjectRow) -> Project {
    Project {
        id: row.id,
        name: row.name.trim().to_string(),
        color: row
            .color
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_PROJECT_COLOR.to_string()),
    }
}

pub fn encode_day_details(details: &DayDetails) -> DayDetailsRow {
    DayDetailsRow {
        date: details.date.to_string(),
        calories: Some(details.calories),
        comment: Some(details.comment.clone()),
    }
}

pub fn decode_day_details(row: DayDetailsRow) -> Result<DayDetails, InfraError> {
    Ok(DayDetails {
        date: parse_date(&row.date, "day_details.date")?,
        calories: row.calories.unwrap_or_default(),
        comment: row.comment.unwrap_or_default(),
    })
}

pub fn format_time(value: NaiveTime) -> String {
    value.format(TIME_FORMAT).to_string()
}

pub fn parse_time(value: &str, field_name: &str) -> Result<NaiveTime, InfraError> {
    let trimmed = value.trim();
    ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| InfraError::Validation(format!("invalid {field_name} '{value}': expected HH:MM[:SS]")))
}

pub fn parse_date(value: &str, field_name: &str) -> Result<NaiveDate, InfraError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|error| {
        InfraError::Validation(format!("invalid {field_name} '{value}': {error}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_json(id: serde_json::Value, project_id: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "title": "Thesis (25:00)",
            "description": null,
            "date": "2026-02-16",
            "start_time": "09:00",
            "end_time": "09:25:00",
            "project_id": project_id,
            "type": "project",
            "is_live": true,
            "created_at": "2026-02-16T09:00:01Z"
        })
    }

    #[test]
    fn decodes_integer_and_string_ids() {
        let numeric: CalendarEventRow =
            serde_json::from_value(row_json(serde_json::json!(42), serde_json::json!(7)))
                .expect("numeric row");
        assert_eq!(numeric.id, "42");
        assert_eq!(numeric.project_id.as_deref(), Some("7"));

        let textual: CalendarEventRow = serde_json::from_value(row_json(
            serde_json::json!("b3f1c2d4"),
            serde_json::Value::Null,
        ))
        .expect("string row");
        assert_eq!(textual.id, "b3f1c2d4");
        assert_eq!(textual.project_id, None);
    }

    #[test]
    fn decode_event_accepts_minute_and_second_precision() {
        let row: CalendarEventRow =
            serde_json::from_value(row_json(serde_json::json!(1), serde_json::json!("prj-1")))
                .expect("row");
        let event = decode_event(row).expect("decode");
        assert_eq!(event.start_time, NaiveTime::from_hms_opt(9, 0, 0).expect("time"));
        assert_eq!(event.end_time, NaiveTime::from_hms_opt(9, 25, 0).expect("time"));
        assert!(event.is_live);
        assert_eq!(event.event_type, EventType::Project);
    }

    #[test]
    fn decode_event_derives_type_from_project_link() {
        let row: CalendarEventRow =
            serde_json::from_value(row_json(serde_json::json!(1), serde_json::Value::Null))
                .expect("row");
        let event = decode_event(row).expect("decode");
        assert_eq!(event.event_type, EventType::Event);
    }

    #[test]
    fn decode_event_rejects_bad_time() {
        let mut value = row_json(serde_json::json!(1), serde_json::Value::Null);
        value["start_time"] = serde_json::json!("nine");
        let row: CalendarEventRow = serde_json::from_value(value).expect("row");
        assert!(matches!(decode_event(row), Err(InfraError::Validation(_))));
    }

    #[test]
    fn patch_body_contains_only_present_fields() {
        let patch = CalendarEventPatch {
            end_time: Some(NaiveTime::from_hms_opt(10, 15, 30).expect("time")),
            is_live: Some(false),
            ..CalendarEventPatch::default()
        };
        assert_eq!(
            encode_patch(&patch),
            serde_json::json!({"end_time": "10:15:30", "is_live": false})
        );
    }

    #[test]
    fn patch_clearing_project_also_sets_type() {
        let patch = CalendarEventPatch {
            project_id: Some(None),
            ..CalendarEventPatch::default()
        };
        assert_eq!(
            encode_patch(&patch),
            serde_json::json!({"project_id": null, "type": "event"})
        );
    }

    #[test]
    fn day_details_without_calories_default_to_zero() {
        let row: DayDetailsRow = serde_json::from_value(serde_json::json!({
            "date": "2026-02-16",
            "comment": "rest day"
        }))
        .expect("row");
        let details = decode_day_details(row).expect("decode");
        assert_eq!(details.calories.total(), 0);
        assert_eq!(details.comment, "rest day");
    }
}
