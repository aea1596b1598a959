use crate::application::bootstrap::bootstrap_workspace;
use crate::application::calendar::{CalendarService, NewCalendarEvent};
use crate::application::day_details::DayDetailsService;
use crate::application::event_board::{EventBoard, StopwatchSignal};
use crate::application::projects::{ProjectService, ProjectStats};
use crate::application::reconciler::{FinalizeOutcome, LiveEventReconciler, NowProvider};
use crate::application::recovery::{RecoveryOutcome, RestartRecovery};
use crate::application::regular_events::{NewRegularEvent, RegularEventService};
use crate::application::stopwatch::{spawn_ticker, StopwatchEngine};
use crate::application::transfer::{ExportSummary, ImportSummary, TransferService};
use crate::domain::models::{
    CalendarEvent, CalendarEventPatch, DayDetails, Project, RegularEvent, RegularOccurrence,
    StopwatchState,
};
use crate::domain::timekeeping::start_of_week;
use crate::infrastructure::config::{
    read_app_settings, read_backend_settings, save_rest_url, AppSettings,
};
use crate::infrastructure::credential_store::{
    resolve_api_key, CredentialStore, KeyringCredentialStore,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::{load_typed, save_typed, KeyValueStore, SqliteKeyValueStore};
use crate::infrastructure::local_store::LocalRecordStore;
use crate::infrastructure::record_store::{DayDetailsStore, EventStore, ProjectStore};
use crate::infrastructure::rest_store::ReqwestRestStore;
use crate::infrastructure::retry::RetryPolicy;
use crate::infrastructure::row_mapper::{parse_date, parse_time};
use crate::infrastructure::timer_state_repository::KeyValueTimerStateRepository;
use chrono::{Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;

const PAUSED_PROJECT_KEY: &str = "paused_project";

pub type TimerRepository = KeyValueTimerStateRepository<SqliteKeyValueStore>;
pub type Engine = StopwatchEngine<dyn EventStore, TimerRepository>;

/// Record stores the commands talk to. `live_events` is the same backend
/// as `events` without retries, so a tick never waits on backoff.
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub live_events: Arc<dyn EventStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub days: Arc<dyn DayDetailsStore>,
}

pub struct AppState {
    workspace_root: PathBuf,
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    settings: AppSettings,
    cache: Arc<SqliteKeyValueStore>,
    board: Arc<EventBoard>,
    now_provider: NowProvider,
    stores_override: Option<Stores>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let settings = read_app_settings(&bootstrap.config_dir)?;
        let cache = Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path));

        Ok(Self {
            workspace_root: bootstrap.workspace_root,
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            settings,
            cache,
            board: Arc::new(EventBoard::default()),
            now_provider: Arc::new(Utc::now),
            stores_override: None,
            log_guard: Mutex::new(()),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_stores(mut self, stores: Stores) -> Self {
        self.stores_override = Some(stores);
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn today(&self) -> NaiveDate {
        (self.now_provider)()
            .with_timezone(&self.settings.timezone)
            .date_naive()
    }

    /// Picks the REST backend when `backend.json` names one, otherwise the
    /// local SQLite-backed store. Read on every call so `init` takes effect
    /// without restarting.
    pub fn stores(&self) -> Result<Stores, InfraError> {
        if let Some(stores) = &self.stores_override {
            return Ok(stores.clone());
        }

        let backend = read_backend_settings(&self.config_dir)?;
        let Some(rest_url) = backend.rest_url else {
            let local = Arc::new(LocalRecordStore::new(self.cache.clone()));
            return Ok(Stores {
                events: local.clone(),
                live_events: local.clone(),
                projects: local.clone(),
                days: local,
            });
        };

        let api_key = resolve_api_key(
            std::env::var(&backend.api_key_env).ok(),
            &KeyringCredentialStore::default(),
        )?
        .ok_or_else(|| {
            InfraError::Credential(format!(
                "no api key for {rest_url}; set {} or run `timegrid init --api-key`",
                backend.api_key_env
            ))
        })?;

        let client = ReqwestRestStore::new(&rest_url, api_key)?;
        let live = Arc::new(client.clone().with_retry_policy(RetryPolicy::single_attempt()));
        let crud = Arc::new(client.with_retry_policy(backend.retry));
        Ok(Stores {
            events: crud.clone(),
            live_events: live,
            projects: crud.clone(),
            days: crud,
        })
    }

    fn timer_repository(&self) -> Arc<TimerRepository> {
        Arc::new(KeyValueTimerStateRepository::new(self.cache.clone()))
    }

    /// Builds the stopwatch engine and runs restart recovery against the
    /// persisted state before handing it out.
    pub async fn open_engine(&self) -> Result<(Arc<Engine>, RecoveryOutcome), InfraError> {
        let stores = self.stores()?;
        let project_names = match ProjectService::new(stores.projects.clone(), stores.events.clone())
            .names()
            .await
        {
            Ok(names) => names,
            Err(error) => {
                tracing::warn!(error = %error, "project names unavailable; live titles use the generic label");
                HashMap::new()
            }
        };

        let reconciler = Arc::new(
            LiveEventReconciler::new(stores.live_events.clone(), self.board.clone())
                .with_now_provider(self.now_provider.clone())
                .with_sync_interval(self.settings.live_sync_interval)
                .with_time_zone(self.settings.timezone)
                .with_generic_label(self.settings.generic_work_label.clone())
                .with_project_names(project_names),
        );
        let repository = self.timer_repository();
        let outcome = RestartRecovery::new(stores.events.clone(), repository.clone())
            .recover()
            .await?;
        if let RecoveryOutcome::StoreUnavailable(message) = &outcome {
            self.log_error("recovery", message);
        }

        let engine = Arc::new(StopwatchEngine::new(reconciler, repository));
        engine.arm(&outcome)?;
        if let Some(paused) = self.load_paused_project()? {
            engine.remember_paused_project(paused.project_id)?;
        }
        Ok((engine, outcome))
    }

    fn load_paused_project(&self) -> Result<Option<PausedProject>, InfraError> {
        load_typed(self.cache.as_ref(), PAUSED_PROJECT_KEY)
    }

    fn save_paused_project(&self, project_id: Option<String>) -> Result<(), InfraError> {
        save_typed(
            self.cache.as_ref(),
            PAUSED_PROJECT_KEY,
            &PausedProject { project_id },
        )
    }

    fn clear_paused_project(&self) -> Result<(), InfraError> {
        self.cache.remove(PAUSED_PROJECT_KEY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PausedProject {
    project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub workspace_root: String,
    pub database_path: String,
    pub backend: String,
    pub api_key_saved: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub running: bool,
    pub elapsed_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_event_id: Option<String>,
    pub synced: bool,
    pub recovery: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishResponse {
    pub outcome: String,
    pub elapsed_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EventInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub project: Option<String>,
    pub clear_project: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RegularInput {
    pub name: String,
    /// Weekday names; empty means every day.
    pub days: Vec<String>,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Default)]
pub struct DayInput {
    pub morning: Option<u32>,
    pub afternoon: Option<u32>,
    pub evening: Option<u32>,
    pub comment: Option<String>,
}

fn describe_recovery(outcome: &RecoveryOutcome) -> String {
    match outcome {
        RecoveryOutcome::Idle => "idle".to_string(),
        RecoveryOutcome::Resumed(_) => "resumed".to_string(),
        RecoveryOutcome::DiscardedStale { reason } => format!("discarded stale run: {reason}"),
        RecoveryOutcome::StoreUnavailable(message) => format!("store unavailable: {message}"),
    }
}

fn describe_finalize(outcome: &FinalizeOutcome) -> (String, Option<String>) {
    match outcome {
        FinalizeOutcome::NotRunning => ("not running".to_string(), None),
        FinalizeOutcome::AlreadyFinalized => ("already finalized".to_string(), None),
        FinalizeOutcome::Updated => ("finalized".to_string(), None),
        FinalizeOutcome::CreatedFinalized { store_id } => {
            ("created finalized event".to_string(), Some(store_id.clone()))
        }
        FinalizeOutcome::StoreFailed(message) => (format!("store failed: {message}"), None),
    }
}

fn status_of(engine: &Engine, recovery: &RecoveryOutcome) -> Result<StatusResponse, InfraError> {
    let state: StopwatchState = engine.state()?;
    Ok(StatusResponse {
        running: state.is_running,
        elapsed_label: engine.elapsed_label()?,
        project_id: state.project_id,
        live_event_id: state.live_event_id,
        synced: state.is_synced_with_store,
        recovery: describe_recovery(recovery),
    })
}

fn parse_date_or(value: Option<&str>, fallback: NaiveDate, field_name: &str) -> Result<NaiveDate, InfraError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_date(value, field_name),
        None => Ok(fallback),
    }
}

fn required<'a>(value: Option<&'a str>, field_name: &str) -> Result<&'a str, InfraError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| InfraError::Validation(format!("{field_name} is required")))
}

async fn resolve_project_id(
    stores: &Stores,
    id_or_name: Option<&str>,
) -> Result<Option<String>, InfraError> {
    let Some(id_or_name) = id_or_name.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let project = ProjectService::new(stores.projects.clone(), stores.events.clone())
        .resolve(id_or_name)
        .await?;
    Ok(Some(project.id))
}

pub fn init_impl(
    state: &AppState,
    rest_url: Option<String>,
    api_key: Option<String>,
    forget_api_key: bool,
    local: bool,
) -> Result<InitResponse, InfraError> {
    if local {
        save_rest_url(state.config_dir(), None)?;
    } else if let Some(url) = rest_url.as_deref() {
        save_rest_url(state.config_dir(), Some(url))?;
    }

    let credentials = KeyringCredentialStore::default();
    if forget_api_key {
        credentials.delete_api_key()?;
    }
    let api_key_saved = match api_key {
        Some(api_key) => {
            credentials.save_api_key(&api_key)?;
            true
        }
        None => false,
    };

    let backend = match read_backend_settings(state.config_dir())?.rest_url {
        Some(url) => format!("rest {url}"),
        None => "local".to_string(),
    };
    state.log_info("init", &format!("backend={backend}"));
    Ok(InitResponse {
        workspace_root: state.workspace_root().display().to_string(),
        database_path: state.database_path().display().to_string(),
        backend,
        api_key_saved,
    })
}

pub async fn start_impl(
    state: &AppState,
    project: Option<String>,
) -> Result<StatusResponse, InfraError> {
    let stores = state.stores()?;
    let project_id = resolve_project_id(&stores, project.as_deref()).await?;
    let (engine, recovery) = state.open_engine().await?;

    if engine.state()?.is_running {
        state.log_info("start", "already running");
        return status_of(&engine, &recovery);
    }
    engine.start(project_id).await?;
    state.clear_paused_project()?;

    let status = status_of(&engine, &recovery)?;
    state.log_info(
        "start",
        &format!("live_event_id={}", status.live_event_id.as_deref().unwrap_or("-")),
    );
    Ok(status)
}

pub async fn pause_impl(state: &AppState) -> Result<FinishResponse, InfraError> {
    finish(state, "pause", false).await
}

pub async fn stop_impl(state: &AppState) -> Result<FinishResponse, InfraError> {
    finish(state, "stop", true).await
}

async fn finish(state: &AppState, command: &str, finalize: bool) -> Result<FinishResponse, InfraError> {
    let (engine, _) = state.open_engine().await?;
    let elapsed_label = engine.elapsed_label()?;
    let outcome = engine.pause_or_stop(finalize).await?;

    if outcome != FinalizeOutcome::NotRunning {
        match engine.paused_project()? {
            Some(project_id) if !finalize => state.save_paused_project(project_id)?,
            _ => state.clear_paused_project()?,
        }
    }
    if let FinalizeOutcome::StoreFailed(message) = &outcome {
        state.log_error(command, message);
    }

    let (outcome, event_id) = describe_finalize(&outcome);
    state.log_info(command, &outcome);
    Ok(FinishResponse {
        outcome,
        elapsed_label,
        event_id,
    })
}

pub async fn resume_impl(state: &AppState) -> Result<StatusResponse, InfraError> {
    let (engine, recovery) = state.open_engine().await?;
    if engine.state()?.is_running {
        return status_of(&engine, &recovery);
    }
    if engine.resume().await?.is_none() {
        return Err(InfraError::Validation("nothing to resume".to_string()));
    }
    state.clear_paused_project()?;
    state.log_info("resume", "new segment started");
    status_of(&engine, &recovery)
}

pub async fn status_impl(state: &AppState) -> Result<StatusResponse, InfraError> {
    let (engine, recovery) = state.open_engine().await?;
    status_of(&engine, &recovery)
}

/// Drives the running stopwatch in the foreground, reporting every signal
/// until `limit` elapses or Ctrl-C. Leaving the watch does not stop the run.
pub async fn watch_impl<F>(
    state: &AppState,
    limit: Option<std::time::Duration>,
    mut on_signal: F,
) -> Result<StatusResponse, InfraError>
where
    F: FnMut(&StopwatchSignal),
{
    let (engine, recovery) = state.open_engine().await?;
    if !engine.state()?.is_running {
        return Err(InfraError::Validation("stopwatch is not running".to_string()));
    }

    let mut signals = engine.subscribe();
    let ticker = spawn_ticker(engine.clone(), state.settings().tick_interval);
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            received = signals.recv() => match received {
                Ok(signal) => on_signal(&signal),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "watch fell behind stopwatch signals");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    ticker.abort();
    status_of(&engine, &recovery)
}

/// The week containing `date` (today when absent), including the running
/// live event at its current length.
pub async fn week_events_impl(
    state: &AppState,
    date: Option<String>,
) -> Result<Vec<CalendarEvent>, InfraError> {
    let week_start = start_of_week(parse_date_or(date.as_deref(), state.today(), "date")?);
    let week_end = week_start + Duration::days(6);
    let stores = state.stores()?;
    let (engine, _) = state.open_engine().await?;

    CalendarService::new(stores.events.clone(), state.board.clone())
        .load_week(week_start)
        .await?;
    engine.tick().await;

    let events = state
        .board
        .list()?
        .into_iter()
        .filter(|event| event.date >= week_start && event.date <= week_end)
        .collect::<Vec<_>>();
    state.log_info("events.week", &format!("week_start={week_start} count={}", events.len()));
    Ok(events)
}

pub async fn add_event_impl(state: &AppState, input: EventInput) -> Result<CalendarEvent, InfraError> {
    let stores = state.stores()?;
    let project_id = resolve_project_id(&stores, input.project.as_deref()).await?;
    let created = CalendarService::new(stores.events.clone(), state.board.clone())
        .create_event(NewCalendarEvent {
            title: required(input.title.as_deref(), "title")?.to_string(),
            description: input.description,
            date: parse_date_or(input.date.as_deref(), state.today(), "date")?,
            start_time: parse_time(required(input.start.as_deref(), "start")?, "start")?,
            end_time: parse_time(required(input.end.as_deref(), "end")?, "end")?,
            project_id,
        })
        .await?;
    state.log_info("events.add", &format!("event_id={}", created.id));
    Ok(created)
}

pub async fn edit_event_impl(
    state: &AppState,
    id: String,
    input: EventInput,
) -> Result<CalendarEvent, InfraError> {
    let stores = state.stores()?;
    let project_id = if input.clear_project {
        Some(None)
    } else {
        resolve_project_id(&stores, input.project.as_deref())
            .await?
            .map(Some)
    };
    let patch = CalendarEventPatch {
        title: input.title,
        description: input.description.map(Some),
        date: input
            .date
            .as_deref()
            .map(|value| parse_date(value, "date"))
            .transpose()?,
        start_time: input
            .start
            .as_deref()
            .map(|value| parse_time(value, "start"))
            .transpose()?,
        end_time: input
            .end
            .as_deref()
            .map(|value| parse_time(value, "end"))
            .transpose()?,
        project_id,
        is_live: None,
    };

    let updated = CalendarService::new(stores.events.clone(), state.board.clone())
        .update_event(&id, patch)
        .await?;
    state.log_info("events.edit", &format!("event_id={id}"));
    Ok(updated)
}

pub async fn delete_event_impl(state: &AppState, id: String) -> Result<(), InfraError> {
    let stores = state.stores()?;
    CalendarService::new(stores.events.clone(), state.board.clone())
        .delete_event(&id)
        .await?;
    state.log_info("events.delete", &format!("event_id={id}"));
    Ok(())
}

fn project_service(stores: &Stores) -> ProjectService<dyn ProjectStore, dyn EventStore> {
    ProjectService::new(stores.projects.clone(), stores.events.clone())
}

pub async fn list_projects_impl(state: &AppState) -> Result<Vec<Project>, InfraError> {
    project_service(&state.stores()?).list().await
}

pub async fn add_project_impl(state: &AppState, name: String) -> Result<Project, InfraError> {
    let project = project_service(&state.stores()?).create(&name).await?;
    state.log_info("projects.add", &format!("project_id={}", project.id));
    Ok(project)
}

pub async fn delete_project_impl(state: &AppState, id_or_name: String) -> Result<Project, InfraError> {
    let service = project_service(&state.stores()?);
    let project = service.resolve(&id_or_name).await?;
    service.delete(&project.id).await?;
    state.log_info("projects.delete", &format!("project_id={}", project.id));
    Ok(project)
}

pub async fn project_stats_impl(
    state: &AppState,
    id_or_name: String,
    date: Option<String>,
) -> Result<ProjectStats, InfraError> {
    let today = parse_date_or(date.as_deref(), state.today(), "date")?;
    let service = project_service(&state.stores()?);
    let project = service.resolve(&id_or_name).await?;
    service.stats(&project.id, today).await
}

fn day_service(state: &AppState, stores: &Stores) -> DayDetailsService<dyn DayDetailsStore, SqliteKeyValueStore> {
    DayDetailsService::new(stores.days.clone(), state.cache.clone())
}

pub async fn show_day_impl(state: &AppState, date: Option<String>) -> Result<DayDetails, InfraError> {
    let date = parse_date_or(date.as_deref(), state.today(), "date")?;
    day_service(state, &state.stores()?).get(date).await
}

/// Overwrites only the fields given in `input`.
pub async fn set_day_impl(
    state: &AppState,
    date: Option<String>,
    input: DayInput,
) -> Result<DayDetails, InfraError> {
    let date = parse_date_or(date.as_deref(), state.today(), "date")?;
    let service = day_service(state, &state.stores()?);
    let mut details = service.get(date).await?;
    if let Some(morning) = input.morning {
        details.calories.morning = morning;
    }
    if let Some(afternoon) = input.afternoon {
        details.calories.afternoon = afternoon;
    }
    if let Some(evening) = input.evening {
        details.calories.evening = evening;
    }
    if let Some(comment) = input.comment {
        details.comment = comment;
    }

    let saved = service.save(details).await?;
    state.log_info("day.set", &format!("date={date}"));
    Ok(saved)
}

fn regular_service(state: &AppState) -> RegularEventService<SqliteKeyValueStore> {
    RegularEventService::new(state.cache.clone())
        .with_now_provider(state.now_provider.clone())
        .with_time_zone(state.settings.timezone)
}

fn parse_weekdays(values: &[String]) -> Result<Vec<Weekday>, InfraError> {
    if values.is_empty() {
        return Ok(vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]);
    }
    values
        .iter()
        .map(|value| {
            value
                .trim()
                .parse::<Weekday>()
                .map_err(|_| InfraError::Validation(format!("unknown weekday '{value}'")))
        })
        .collect()
}

/// Regular events of the week containing `date` (today when absent).
pub fn regular_week_impl(
    state: &AppState,
    date: Option<String>,
) -> Result<Vec<RegularOccurrence>, InfraError> {
    let week_start = start_of_week(parse_date_or(date.as_deref(), state.today(), "date")?);
    regular_service(state).week(week_start)
}

pub fn add_regular_impl(state: &AppState, input: RegularInput) -> Result<RegularEvent, InfraError> {
    let regular = regular_service(state).create(NewRegularEvent {
        name: input.name,
        days: parse_weekdays(&input.days)?,
        start_time: parse_time(&input.start, "start")?,
        end_time: parse_time(&input.end, "end")?,
    })?;
    state.log_info("regular.add", &format!("regular_event_id={}", regular.id));
    Ok(regular)
}

pub fn delete_regular_impl(state: &AppState, id_or_name: String) -> Result<RegularEvent, InfraError> {
    let regular = regular_service(state).delete(&id_or_name)?;
    state.log_info("regular.delete", &format!("regular_event_id={}", regular.id));
    Ok(regular)
}

pub fn toggle_regular_impl(
    state: &AppState,
    id_or_name: String,
    date: Option<String>,
) -> Result<RegularOccurrence, InfraError> {
    let date = parse_date_or(date.as_deref(), state.today(), "date")?;
    let occurrence = regular_service(state).toggle(&id_or_name, date)?;
    state.log_info(
        "regular.toggle",
        &format!("occurrence={} completed={}", occurrence.id, occurrence.completed),
    );
    Ok(occurrence)
}

/// Exports `from..=to`; both default to the current Monday-based week.
pub async fn export_impl(
    state: &AppState,
    from: Option<String>,
    to: Option<String>,
    output: PathBuf,
) -> Result<ExportSummary, InfraError> {
    let week_start = start_of_week(state.today());
    let from = parse_date_or(from.as_deref(), week_start, "from")?;
    let to = parse_date_or(to.as_deref(), week_start + Duration::days(6), "to")?;
    if to < from {
        return Err(InfraError::Validation("to must not be before from".to_string()));
    }

    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(&output)?);
    let stores = state.stores()?;
    let summary = TransferService::new(stores.events, stores.projects, stores.days)
        .export(from, to, writer)
        .await?;
    state.log_info(
        "export",
        &format!("path={} days={} events={}", output.display(), summary.days, summary.events),
    );
    Ok(summary)
}

pub async fn import_impl(state: &AppState, input: PathBuf) -> Result<ImportSummary, InfraError> {
    let reader = BufReader::new(File::open(&input)?);
    let stores = state.stores()?;
    let summary = TransferService::new(stores.events, stores.projects, stores.days)
        .import(reader)
        .await?;
    state.log_info(
        "import",
        &format!(
            "path={} days={} events={} skipped={}",
            input.display(),
            summary.days,
            summary.events,
            summary.skipped_events
        ),
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{FakeClock, FakeEventStore};

    struct Workspace {
        dir: tempfile::TempDir,
        clock: FakeClock,
    }

    impl Workspace {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().expect("tempdir"),
                clock: FakeClock::at("2026-02-18T09:00:00Z"),
            }
        }

        /// A fresh state over the same directory, like a new process.
        fn app_state(&self) -> AppState {
            AppState::new(self.dir.path().to_path_buf())
                .expect("initialize app state")
                .with_now_provider(self.clock.provider())
        }
    }

    /// Local projects and days, with calendar events in `events`.
    fn with_event_store(state: AppState, events: Arc<FakeEventStore>) -> AppState {
        let local = Arc::new(LocalRecordStore::new(state.cache.clone()));
        state.with_stores(Stores {
            events: events.clone(),
            live_events: events,
            projects: local.clone(),
            days: local,
        })
    }

    fn event_input(title: &str, start: &str, end: &str) -> EventInput {
        EventInput {
            title: Some(title.to_string()),
            date: Some("2026-02-17".to_string()),
            start: Some(start.to_string()),
            end: Some(end.to_string()),
            ..EventInput::default()
        }
    }

    #[tokio::test]
    async fn start_and_stop_leave_one_finished_event() {
        let workspace = Workspace::new();
        let state = workspace.app_state();
        let project = add_project_impl(&state, "Thesis".to_string())
            .await
            .expect("add project");

        let status = start_impl(&state, Some("thesis".to_string()))
            .await
            .expect("start");
        assert!(status.running);
        assert!(status.synced);
        assert_eq!(status.project_id.as_deref(), Some(project.id.as_str()));

        workspace.clock.advance_seconds(25 * 60);
        let finished = stop_impl(&workspace.app_state()).await.expect("stop");
        assert_eq!(finished.outcome, "finalized");
        assert_eq!(finished.elapsed_label, "00:25:00");

        let events = week_events_impl(&state, Some("2026-02-18".to_string()))
            .await
            .expect("week");
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_live);
        assert_eq!(events[0].title, "Thesis (25:00)");
        assert_eq!(events[0].duration_minutes(), 25);
    }

    #[tokio::test]
    async fn running_stopwatch_survives_a_restart() {
        let workspace = Workspace::new();
        start_impl(&workspace.app_state(), None).await.expect("start");
        workspace.clock.advance_seconds(90);

        let status = status_impl(&workspace.app_state()).await.expect("status");
        assert!(status.running);
        assert_eq!(status.recovery, "resumed");
        assert_eq!(status.elapsed_label, "00:01:30");
    }

    #[tokio::test]
    async fn deleted_live_event_discards_the_run_on_restart() {
        let workspace = Workspace::new();
        let status = start_impl(&workspace.app_state(), None).await.expect("start");
        let live_id = status.live_event_id.expect("live id");

        let state = workspace.app_state();
        state
            .stores()
            .expect("stores")
            .events
            .delete(&live_id)
            .await
            .expect("delete live row");

        let status = status_impl(&workspace.app_state()).await.expect("status");
        assert!(!status.running);
        assert!(status.recovery.starts_with("discarded stale run"));
    }

    #[tokio::test]
    async fn run_started_offline_is_written_finished_on_stop() {
        let workspace = Workspace::new();
        let events = Arc::new(FakeEventStore::default());
        events.set_offline(true);

        let status = start_impl(&with_event_store(workspace.app_state(), events.clone()), None)
            .await
            .expect("start");
        assert!(status.running);
        assert!(!status.synced);

        events.set_offline(false);
        workspace.clock.advance_seconds(600);
        let finished = stop_impl(&with_event_store(workspace.app_state(), events.clone()))
            .await
            .expect("stop");
        assert_eq!(finished.outcome, "created finalized event");
        assert_eq!(finished.elapsed_label, "00:10:00");
        assert_eq!(finished.event_id.as_deref(), Some("srv-1"));

        let rows = events.rows();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_live);
        assert_eq!(rows[0].title, "Work (10:00)");
    }

    #[tokio::test]
    async fn pause_then_resume_starts_a_new_segment_for_the_same_project() {
        let workspace = Workspace::new();
        let state = workspace.app_state();
        add_project_impl(&state, "Reading".to_string()).await.expect("project");
        let first = start_impl(&state, Some("Reading".to_string())).await.expect("start");

        workspace.clock.advance_seconds(600);
        let paused = pause_impl(&workspace.app_state()).await.expect("pause");
        assert_eq!(paused.outcome, "finalized");

        workspace.clock.advance_seconds(300);
        let resumed = resume_impl(&workspace.app_state()).await.expect("resume");
        assert!(resumed.running);
        assert_eq!(resumed.project_id, first.project_id);
        assert_ne!(resumed.live_event_id, first.live_event_id);

        stop_impl(&workspace.app_state()).await.expect("stop");
        assert!(matches!(
            resume_impl(&workspace.app_state()).await,
            Err(InfraError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn stop_when_idle_reports_not_running() {
        let workspace = Workspace::new();
        let finished = stop_impl(&workspace.app_state()).await.expect("stop");
        assert_eq!(finished.outcome, "not running");
    }

    #[tokio::test]
    async fn watch_requires_a_running_stopwatch() {
        let workspace = Workspace::new();
        let result = watch_impl(
            &workspace.app_state(),
            Some(std::time::Duration::from_millis(10)),
            |_| {},
        )
        .await;
        assert!(matches!(result, Err(InfraError::Validation(_))));
    }

    #[tokio::test]
    async fn manual_events_can_be_added_edited_and_deleted() {
        let workspace = Workspace::new();
        let state = workspace.app_state();

        let created = add_event_impl(&state, event_input("Standup", "09:00", "09:15"))
            .await
            .expect("add");
        assert!(matches!(
            add_event_impl(&state, event_input("Backwards", "10:00", "09:00")).await,
            Err(InfraError::Validation(_))
        ));

        let edited = edit_event_impl(
            &state,
            created.id.clone(),
            EventInput {
                end: Some("09:30".to_string()),
                ..EventInput::default()
            },
        )
        .await
        .expect("edit");
        assert_eq!(edited.duration_minutes(), 30);

        delete_event_impl(&state, created.id).await.expect("delete");
        let events = week_events_impl(&state, Some("2026-02-17".to_string()))
            .await
            .expect("week");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn day_set_merges_with_existing_details() {
        let workspace = Workspace::new();
        let state = workspace.app_state();

        set_day_impl(
            &state,
            None,
            DayInput {
                morning: Some(400),
                ..DayInput::default()
            },
        )
        .await
        .expect("first set");
        let saved = set_day_impl(
            &state,
            None,
            DayInput {
                comment: Some("  rest day ".to_string()),
                ..DayInput::default()
            },
        )
        .await
        .expect("second set");

        assert_eq!(saved.date.to_string(), "2026-02-18");
        assert_eq!(saved.calories.morning, 400);
        assert_eq!(saved.comment, "rest day");
        assert_eq!(show_day_impl(&state, None).await.expect("show"), saved);
    }

    #[test]
    fn regular_event_completion_survives_a_restart() {
        let workspace = Workspace::new();
        let state = workspace.app_state();
        let regular = add_regular_impl(
            &state,
            RegularInput {
                name: "Stretching".to_string(),
                days: vec!["mon".to_string(), "Wednesday".to_string()],
                start: "07:00".to_string(),
                end: "07:20".to_string(),
            },
        )
        .expect("add regular");
        assert_eq!(regular.days, vec![Weekday::Mon, Weekday::Wed]);

        let done = toggle_regular_impl(&state, "stretching".to_string(), None).expect("toggle");
        assert_eq!(done.date, NaiveDate::from_ymd_opt(2026, 2, 18).expect("date"));
        assert!(done.completed);

        let week = regular_week_impl(&workspace.app_state(), Some("2026-02-16".to_string()))
            .expect("week");
        assert_eq!(week.len(), 2);
        assert!(!week[0].completed);
        assert!(week[1].completed);

        let bad_day = RegularInput {
            name: "Reading".to_string(),
            days: vec!["someday".to_string()],
            start: "21:00".to_string(),
            end: "21:30".to_string(),
        };
        assert!(matches!(
            add_regular_impl(&state, bad_day),
            Err(InfraError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn export_then_import_into_a_new_workspace() {
        let source = Workspace::new();
        let state = source.app_state();
        add_project_impl(&state, "Thesis".to_string()).await.expect("project");
        let mut input = event_input("Chapter 2", "13:00", "15:00");
        input.project = Some("Thesis".to_string());
        add_event_impl(&state, input).await.expect("add");

        let path = source.dir.path().join("out").join("week.csv");
        let exported = export_impl(&state, None, None, path.clone())
            .await
            .expect("export");
        assert_eq!(exported.events, 1);

        let target = Workspace::new();
        let imported = import_impl(&target.app_state(), path).await.expect("import");
        assert_eq!(imported.events, 1);
        assert_eq!(imported.new_projects, vec!["Thesis".to_string()]);

        let stats = project_stats_impl(&target.app_state(), "thesis".to_string(), None)
            .await
            .expect("stats");
        assert_eq!(stats.week_minutes, 120);
    }

    #[test]
    fn command_errors_are_logged() {
        let workspace = Workspace::new();
        let state = workspace.app_state();
        let message = state.command_error("start", &InfraError::Validation("bad".to_string()));
        assert_eq!(message, "Validation failed: bad");

        let log = fs::read_to_string(workspace.dir.path().join("logs").join("commands.log"))
            .expect("read log");
        assert!(log.contains("\"command\":\"start\""));
        assert!(log.contains("\"level\":\"error\""));
    }
}
