pub mod application;
pub mod domain;
pub mod infrastructure;

use application::commands::{
    add_event_impl, add_project_impl, add_regular_impl, delete_event_impl, delete_project_impl,
    delete_regular_impl, edit_event_impl, export_impl, import_impl, init_impl,
    list_projects_impl, pause_impl, project_stats_impl, regular_week_impl, resume_impl,
    set_day_impl, show_day_impl, start_impl, status_impl, stop_impl, toggle_regular_impl,
    watch_impl, week_events_impl, AppState, DayInput, EventInput, FinishResponse, RegularInput,
    StatusResponse,
};
use application::event_board::StopwatchSignal;
use clap::{Args, Parser, Subcommand};
use domain::models::{CalendarEvent, DayDetails, Project, RegularOccurrence, RegularStatus};
use domain::timekeeping::weekday_short;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "timegrid")]
#[command(about = "Weekly time-tracking calendar with a project stopwatch", version)]
pub struct Cli {
    /// Workspace directory holding config/, state/ and logs/ (defaults to the current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the workspace and choose the record backend
    Init {
        /// PostgREST base URL, e.g. https://<project>.supabase.co/rest/v1
        #[arg(long, conflicts_with = "local")]
        rest_url: Option<String>,
        /// API key to keep in the OS credential vault
        #[arg(long)]
        api_key: Option<String>,
        /// Remove the API key from the OS credential vault
        #[arg(long, conflicts_with = "api_key")]
        forget_api_key: bool,
        /// Switch back to the local store
        #[arg(long)]
        local: bool,
    },
    /// Start the stopwatch, optionally for a project (id or name)
    Start { project: Option<String> },
    /// Finish the current segment and remember its project
    Pause,
    /// Start a new segment for the paused project
    Resume,
    /// Finish the current run
    Stop,
    /// Show the stopwatch state
    Status,
    /// Keep the running stopwatch ticking in the foreground
    Watch {
        /// Stop watching after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    #[command(subcommand)]
    Events(EventsCommand),
    #[command(subcommand)]
    Projects(ProjectsCommand),
    #[command(subcommand)]
    Day(DayCommand),
    #[command(subcommand)]
    Regular(RegularCommand),
    /// Write events and day details to a semicolon-separated CSV file
    Export {
        /// First date (YYYY-MM-DD), defaults to this week's Monday
        #[arg(long)]
        from: Option<String>,
        /// Last date (YYYY-MM-DD), defaults to this week's Sunday
        #[arg(long)]
        to: Option<String>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Add events and day details from a CSV export
    Import { input: PathBuf },
}

#[derive(Debug, Subcommand)]
pub enum EventsCommand {
    /// List the week containing a date
    Week {
        #[arg(long)]
        date: Option<String>,
    },
    Add(EventArgs),
    Edit {
        id: String,
        #[command(flatten)]
        fields: EventArgs,
        /// Detach the event from its project
        #[arg(long, conflicts_with = "project")]
        no_project: bool,
    },
    Delete { id: String },
}

#[derive(Debug, Args)]
pub struct EventArgs {
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// YYYY-MM-DD, defaults to today on add
    #[arg(long)]
    pub date: Option<String>,
    /// HH:MM or HH:MM:SS
    #[arg(long)]
    pub start: Option<String>,
    /// HH:MM or HH:MM:SS
    #[arg(long)]
    pub end: Option<String>,
    /// Project id or name
    #[arg(long)]
    pub project: Option<String>,
}

impl EventArgs {
    fn into_input(self, clear_project: bool) -> EventInput {
        EventInput {
            title: self.title,
            description: self.description,
            date: self.date,
            start: self.start,
            end: self.end,
            project: self.project,
            clear_project,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ProjectsCommand {
    List,
    Add { name: String },
    Delete { project: String },
    /// Minutes tracked today and this week
    Stats {
        project: String,
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum DayCommand {
    Show {
        #[arg(long)]
        date: Option<String>,
    },
    /// Update calories or the comment; omitted fields are kept
    Set {
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        morning: Option<u32>,
        #[arg(long)]
        afternoon: Option<u32>,
        #[arg(long)]
        evening: Option<u32>,
        #[arg(long)]
        comment: Option<String>,
    },
}

/// Routines that recur on fixed weekdays, with per-day completion
#[derive(Debug, Subcommand)]
pub enum RegularCommand {
    /// Occurrences in the week containing a date
    List {
        #[arg(long)]
        date: Option<String>,
    },
    Add {
        name: String,
        /// Comma-separated weekdays, e.g. mon,wed,fri (defaults to every day)
        #[arg(long, value_delimiter = ',')]
        days: Vec<String>,
        /// HH:MM
        #[arg(long)]
        start: String,
        /// HH:MM
        #[arg(long)]
        end: String,
    },
    Delete { regular: String },
    /// Mark the occurrence on a date done, or undo it
    Toggle {
        regular: String,
        /// YYYY-MM-DD, defaults to today
        #[arg(long)]
        date: Option<String>,
    },
}

fn print_output<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T) -> String) -> Result<(), String> {
    if json {
        let encoded = serde_json::to_string_pretty(value).map_err(|error| error.to_string())?;
        println!("{encoded}");
    } else {
        println!("{}", human(value));
    }
    Ok(())
}

fn render_status(status: &StatusResponse) -> String {
    let mut lines = Vec::new();
    if status.running {
        lines.push(format!("running {}", status.elapsed_label));
        if let Some(project_id) = &status.project_id {
            lines.push(format!("project   {project_id}"));
        }
        if let Some(live_event_id) = &status.live_event_id {
            let sync = if status.synced { "synced" } else { "pending" };
            lines.push(format!("live      {live_event_id} ({sync})"));
        }
    } else {
        lines.push("stopped".to_string());
    }
    if status.recovery != "idle" && status.recovery != "resumed" {
        lines.push(format!("recovery  {}", status.recovery));
    }
    lines.join("\n")
}

fn render_finish(finish: &FinishResponse) -> String {
    match &finish.event_id {
        Some(id) => format!("{} after {} ({id})", finish.outcome, finish.elapsed_label),
        None => format!("{} after {}", finish.outcome, finish.elapsed_label),
    }
}

fn render_event(event: &CalendarEvent) -> String {
    let live = if event.is_live { " [live]" } else { "" };
    format!(
        "{} {} {}-{}  {}{}  ({})",
        weekday_short(event.date),
        event.date,
        event.start_time.format("%H:%M"),
        event.end_time.format("%H:%M"),
        event.title,
        live,
        event.id
    )
}

fn render_events(events: &Vec<CalendarEvent>) -> String {
    if events.is_empty() {
        return "no events".to_string();
    }
    events.iter().map(render_event).collect::<Vec<_>>().join("\n")
}

fn render_occurrence(occurrence: &RegularOccurrence) -> String {
    let status = match occurrence.status {
        RegularStatus::Done => "done",
        RegularStatus::Missed => "missed",
        RegularStatus::Upcoming => "upcoming",
    };
    format!(
        "{} {} {}-{}  {}  [{status}]",
        weekday_short(occurrence.date),
        occurrence.date,
        occurrence.start_time.format("%H:%M"),
        occurrence.end_time.format("%H:%M"),
        occurrence.name
    )
}

fn render_project(project: &Project) -> String {
    format!("{}  {}  ({})", project.color, project.name, project.id)
}

fn render_day(details: &DayDetails) -> String {
    let calories = &details.calories;
    let mut text = format!(
        "{} calories {} (morning {}, afternoon {}, evening {})",
        details.date,
        calories.total(),
        calories.morning,
        calories.afternoon,
        calories.evening
    );
    if !details.comment.is_empty() {
        text.push_str(&format!("\n{}", details.comment));
    }
    text
}

/// Runs one CLI command against the workspace. Failures are appended to
/// `logs/commands.log` before being returned.
pub async fn run(cli: Cli) -> Result<(), String> {
    let workspace_root = match cli.root {
        Some(path) => path,
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };
    let state = AppState::new(workspace_root).map_err(|error| error.to_string())?;
    let json = cli.json;

    match cli.command {
        Command::Init {
            rest_url,
            api_key,
            forget_api_key,
            local,
        } => {
            let response = init_impl(&state, rest_url, api_key, forget_api_key, local)
                .map_err(|error| state.command_error("init", &error))?;
            print_output(json, &response, |response| {
                format!(
                    "workspace {}\nbackend   {}",
                    response.workspace_root, response.backend
                )
            })
        }
        Command::Start { project } => {
            let status = start_impl(&state, project)
                .await
                .map_err(|error| state.command_error("start", &error))?;
            print_output(json, &status, render_status)
        }
        Command::Pause => {
            let finish = pause_impl(&state)
                .await
                .map_err(|error| state.command_error("pause", &error))?;
            print_output(json, &finish, render_finish)
        }
        Command::Resume => {
            let status = resume_impl(&state)
                .await
                .map_err(|error| state.command_error("resume", &error))?;
            print_output(json, &status, render_status)
        }
        Command::Stop => {
            let finish = stop_impl(&state)
                .await
                .map_err(|error| state.command_error("stop", &error))?;
            print_output(json, &finish, render_finish)
        }
        Command::Status => {
            let status = status_impl(&state)
                .await
                .map_err(|error| state.command_error("status", &error))?;
            print_output(json, &status, render_status)
        }
        Command::Watch { seconds } => {
            let limit = seconds.map(std::time::Duration::from_secs);
            let status = watch_impl(&state, limit, |signal| match signal {
                StopwatchSignal::TimerTick { elapsed_label } => {
                    if json {
                        println!("{}", serde_json::json!({ "tick": elapsed_label }));
                    } else {
                        println!("{elapsed_label}");
                    }
                }
                StopwatchSignal::StateChanged { running: false } => {
                    println!("stopwatch stopped");
                }
                _ => {}
            })
            .await
            .map_err(|error| state.command_error("watch", &error))?;
            print_output(json, &status, render_status)
        }
        Command::Events(command) => run_events(&state, json, command).await,
        Command::Projects(command) => run_projects(&state, json, command).await,
        Command::Day(command) => run_day(&state, json, command).await,
        Command::Regular(command) => run_regular(&state, json, command),
        Command::Export { from, to, output } => {
            let summary = export_impl(&state, from, to, output.clone())
                .await
                .map_err(|error| state.command_error("export", &error))?;
            print_output(json, &summary, |summary| {
                format!(
                    "exported {} days, {} events to {}",
                    summary.days,
                    summary.events,
                    output.display()
                )
            })
        }
        Command::Import { input } => {
            let summary = import_impl(&state, input)
                .await
                .map_err(|error| state.command_error("import", &error))?;
            print_output(json, &summary, |summary| {
                let mut text = format!(
                    "imported {} days, {} events ({} skipped)",
                    summary.days, summary.events, summary.skipped_events
                );
                if !summary.new_projects.is_empty() {
                    text.push_str(&format!("\nnew projects: {}", summary.new_projects.join(", ")));
                }
                text
            })
        }
    }
}

async fn run_events(state: &AppState, json: bool, command: EventsCommand) -> Result<(), String> {
    match command {
        EventsCommand::Week { date } => {
            let events = week_events_impl(state, date)
                .await
                .map_err(|error| state.command_error("events.week", &error))?;
            print_output(json, &events, render_events)
        }
        EventsCommand::Add(fields) => {
            let event = add_event_impl(state, fields.into_input(false))
                .await
                .map_err(|error| state.command_error("events.add", &error))?;
            print_output(json, &event, render_event)
        }
        EventsCommand::Edit {
            id,
            fields,
            no_project,
        } => {
            let event = edit_event_impl(state, id, fields.into_input(no_project))
                .await
                .map_err(|error| state.command_error("events.edit", &error))?;
            print_output(json, &event, render_event)
        }
        EventsCommand::Delete { id } => {
            delete_event_impl(state, id.clone())
                .await
                .map_err(|error| state.command_error("events.delete", &error))?;
            print_output(json, &serde_json::json!({ "deleted": id }), |_| format!("deleted {id}"))
        }
    }
}

fn run_regular(state: &AppState, json: bool, command: RegularCommand) -> Result<(), String> {
    match command {
        RegularCommand::List { date } => {
            let occurrences = regular_week_impl(state, date)
                .map_err(|error| state.command_error("regular.list", &error))?;
            print_output(json, &occurrences, |occurrences| {
                if occurrences.is_empty() {
                    return "no regular events".to_string();
                }
                occurrences.iter().map(render_occurrence).collect::<Vec<_>>().join("\n")
            })
        }
        RegularCommand::Add {
            name,
            days,
            start,
            end,
        } => {
            let regular = add_regular_impl(
                state,
                RegularInput {
                    name,
                    days,
                    start,
                    end,
                },
            )
            .map_err(|error| state.command_error("regular.add", &error))?;
            print_output(json, &regular, |regular| {
                format!("added {} ({})", regular.name, regular.id)
            })
        }
        RegularCommand::Delete { regular } => {
            let regular = delete_regular_impl(state, regular)
                .map_err(|error| state.command_error("regular.delete", &error))?;
            print_output(json, &regular, |regular| format!("deleted {}", regular.name))
        }
        RegularCommand::Toggle { regular, date } => {
            let occurrence = toggle_regular_impl(state, regular, date)
                .map_err(|error| state.command_error("regular.toggle", &error))?;
            print_output(json, &occurrence, render_occurrence)
        }
    }
}

async fn run_projects(state: &AppState, json: bool, command: ProjectsCommand) -> Result<(), String> {
    match command {
        ProjectsCommand::List => {
            let projects = list_projects_impl(state)
                .await
                .map_err(|error| state.command_error("projects.list", &error))?;
            print_output(json, &projects, |projects| {
                if projects.is_empty() {
                    return "no projects".to_string();
                }
                projects.iter().map(render_project).collect::<Vec<_>>().join("\n")
            })
        }
        ProjectsCommand::Add { name } => {
            let project = add_project_impl(state, name)
                .await
                .map_err(|error| state.command_error("projects.add", &error))?;
            print_output(json, &project, render_project)
        }
        ProjectsCommand::Delete { project } => {
            let project = delete_project_impl(state, project)
                .await
                .map_err(|error| state.command_error("projects.delete", &error))?;
            print_output(json, &project, |project| format!("deleted {}", project.name))
        }
        ProjectsCommand::Stats { project, date } => {
            let stats = project_stats_impl(state, project, date)
                .await
                .map_err(|error| state.command_error("projects.stats", &error))?;
            print_output(json, &stats, |stats| {
                format!("today {}\nweek  {}", stats.today_label, stats.week_label)
            })
        }
    }
}

async fn run_day(state: &AppState, json: bool, command: DayCommand) -> Result<(), String> {
    match command {
        DayCommand::Show { date } => {
            let details = show_day_impl(state, date)
                .await
                .map_err(|error| state.command_error("day.show", &error))?;
            print_output(json, &details, render_day)
        }
        DayCommand::Set {
            date,
            morning,
            afternoon,
            evening,
            comment,
        } => {
            let details = set_day_impl(
                state,
                date,
                DayInput {
                    morning,
                    afternoon,
                    evening,
                    comment,
                },
            )
            .await
            .map_err(|error| state.command_error("day.set", &error))?;
            print_output(json, &details, render_day)
        }
    }
}
