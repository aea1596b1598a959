use crate::domain::models::Calories;
use crate::domain::timekeeping::weekday_short;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::row_mapper::{format_time, parse_time};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};

const BOM: &str = "\u{feff}";
const DELIMITER: u8 = b';';

pub const COLUMN_DATE: &str = "Date";
pub const COLUMN_WEEKDAY: &str = "Weekday";
pub const COLUMN_CALORIES_MORNING: &str = "Calories morning";
pub const COLUMN_CALORIES_AFTERNOON: &str = "Calories afternoon";
pub const COLUMN_CALORIES_EVENING: &str = "Calories evening";
pub const COLUMN_COMMENT: &str = "Day comment";
pub const COLUMN_EVENTS: &str = "Events";
pub const COLUMN_PROJECTS: &str = "Projects";

pub const CSV_HEADER: [&str; 8] = [
    COLUMN_DATE,
    COLUMN_WEEKDAY,
    COLUMN_CALORIES_MORNING,
    COLUMN_CALORIES_AFTERNOON,
    COLUMN_CALORIES_EVENING,
    COLUMN_COMMENT,
    COLUMN_EVENTS,
    COLUMN_PROJECTS,
];

/// One calendar entry inside the `Events` / `Projects` JSON columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportedItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default, rename = "type")]
    pub item_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDay {
    pub date: NaiveDate,
    pub calories: Calories,
    pub comment: String,
    pub events: Vec<ExportedItem>,
    pub projects: Vec<ExportedItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedItem {
    pub title: String,
    pub description: Option<String>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub project_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedDay {
    pub date: NaiveDate,
    pub calories: Calories,
    pub comment: String,
    pub items: Vec<ImportedItem>,
}

pub fn write_export<W: Write>(mut writer: W, days: &[ExportDay]) -> Result<(), InfraError> {
    writer.write_all(BOM.as_bytes())?;
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(writer);

    csv_writer.write_record(CSV_HEADER)?;
    for day in days {
        csv_writer.write_record([
            day.date.to_string(),
            weekday_short(day.date).to_string(),
            day.calories.morning.to_string(),
            day.calories.afternoon.to_string(),
            day.calories.evening.to_string(),
            day.comment.clone(),
            serde_json::to_string(&day.events)?,
            serde_json::to_string(&day.projects)?,
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Parses an export file. Rows with an unparsable date and items missing a
/// start or end are skipped with a warning; a missing `Date` column fails
/// the whole import.
pub fn read_import<R: Read>(mut reader: R) -> Result<Vec<ImportedDay>, InfraError> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw)?;
    let content = raw.strip_prefix(BOM).unwrap_or(&raw);

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let columns = csv_reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(index, name)| (name.trim().to_string(), index))
        .collect::<HashMap<_, _>>();
    if !columns.contains_key(COLUMN_DATE) {
        return Err(InfraError::Validation(format!(
            "import file is missing the required '{COLUMN_DATE}' column"
        )));
    }

    let field = |record: &csv::StringRecord, column: &str| -> String {
        columns
            .get(column)
            .and_then(|index| record.get(*index))
            .unwrap_or_default()
            .to_string()
    };

    let mut days = Vec::new();
    for (line, record) in csv_reader.records().enumerate() {
        let record = record?;
        let raw_date = field(&record, COLUMN_DATE);
        let Ok(date) = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d") else {
            tracing::warn!(line = line + 2, value = %raw_date, "skipping import row with invalid date");
            continue;
        };

        let mut items = Vec::new();
        for column in [COLUMN_EVENTS, COLUMN_PROJECTS] {
            for item in parse_items(&field(&record, column), date) {
                match import_item(item) {
                    Some(item) => items.push(item),
                    None => tracing::warn!(%date, column, "skipping import item without start or end"),
                }
            }
        }

        days.push(ImportedDay {
            date,
            calories: Calories {
                morning: parse_calories(&field(&record, COLUMN_CALORIES_MORNING)),
                afternoon: parse_calories(&field(&record, COLUMN_CALORIES_AFTERNOON)),
                evening: parse_calories(&field(&record, COLUMN_CALORIES_EVENING)),
            },
            comment: field(&record, COLUMN_COMMENT),
            items,
        });
    }
    Ok(days)
}

fn parse_calories(value: &str) -> u32 {
    value.trim().parse().unwrap_or(0)
}

fn parse_items(value: &str, date: NaiveDate) -> Vec<ExportedItem> {
    let value = value.trim();
    if value.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<ExportedItem>>(value) {
        Ok(items) => items,
        Err(error) => {
            tracing::warn!(%date, error = %error, "ignoring malformed JSON column in import");
            Vec::new()
        }
    }
}

fn import_item(item: ExportedItem) -> Option<ImportedItem> {
    let start_time = parse_item_time(item.start_time.as_deref()?)?;
    let end_time = parse_item_time(item.end_time.as_deref()?)?;
    let title = item.title.trim();
    Some(ImportedItem {
        title: if title.is_empty() { "Untitled".to_string() } else { title.to_string() },
        description: Some(item.description.trim().to_string()).filter(|value| !value.is_empty()),
        start_time,
        end_time,
        project_name: item
            .project_name
            .map(|name| name.trim().to_string())
            .filter(|name| {
                !name.is_empty()
                    && !name.eq_ignore_ascii_case("null")
                    && !name.eq_ignore_ascii_case("undefined")
            }),
    })
}

/// Accepts `HH:MM[:SS]` as well as full timestamps written by older exports.
fn parse_item_time(value: &str) -> Option<NaiveTime> {
    if let Ok(time) = parse_time(value, "item time") {
        return Some(time);
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(value.trim()) {
        return Some(instant.naive_local().time());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value.trim(), format).ok())
        .map(|value| value.time())
}

pub fn export_item(
    title: &str,
    description: Option<&str>,
    start_time: NaiveTime,
    end_time: NaiveTime,
    project_name: Option<&str>,
    item_type: &str,
) -> ExportedItem {
    ExportedItem {
        title: title.to_string(),
        description: description.unwrap_or_default().to_string(),
        start_time: Some(format_time(start_time)),
        end_time: Some(format_time(end_time)),
        duration: (end_time - start_time).num_minutes().max(0),
        project_name: project_name.map(ToOwned::to_owned),
        item_type: Some(item_type.to_string()),
    }
}
