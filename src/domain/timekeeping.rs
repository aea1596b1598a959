use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;

/// `HH:MM:SS`, zero padded. Hours keep growing past 99; negative input
/// renders as zero.
pub fn format_elapsed_label(elapsed: Duration) -> String {
    let total_seconds = elapsed.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Duration shown inside a live event title: `MM:SS` below one hour,
/// `HH:MM:SS` from then on.
pub fn format_run_duration(elapsed: Duration) -> String {
    let total_seconds = elapsed.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

pub fn format_minutes(total_minutes: i64) -> String {
    if total_minutes <= 0 {
        return "0 min".to_string();
    }
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours} h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes} min"));
    }
    parts.join(" ")
}

/// Monday of the week containing `date`.
pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

pub fn week_dates(week_start: NaiveDate) -> Vec<NaiveDate> {
    (0..7).map(|offset| week_start + Duration::days(offset)).collect()
}

pub fn weekday_short(date: NaiveDate) -> &'static str {
    match date.weekday() {
        chrono::Weekday::Mon => "Mon",
        chrono::Weekday::Tue => "Tue",
        chrono::Weekday::Wed => "Wed",
        chrono::Weekday::Thu => "Thu",
        chrono::Weekday::Fri => "Fri",
        chrono::Weekday::Sat => "Sat",
        chrono::Weekday::Sun => "Sun",
    }
}

/// Calendar day and wall-clock time (second precision) of `instant` in `tz`.
pub fn local_date_time(instant: DateTime<Utc>, tz: Tz) -> (NaiveDate, NaiveTime) {
    let local = instant.with_timezone(&tz).naive_local();
    let time = local.time().with_nanosecond(0).unwrap_or(local.time());
    (local.date(), time)
}

pub fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}
