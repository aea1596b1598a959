use crate::application::event_board::{EventBoard, StopwatchSignal};
use crate::application::reconciler::{FinalizeOutcome, LiveEventReconciler, SyncOutcome};
use crate::application::recovery::RecoveryOutcome;
use crate::domain::ids::local_live_id;
use crate::domain::models::StopwatchState;
use crate::domain::timekeeping::format_elapsed_label;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::EventStore;
use crate::infrastructure::timer_state_repository::TimerStateRepository;
use chrono::Duration;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Default)]
struct EngineInner {
    state: StopwatchState,
    armed: bool,
    paused_project: Option<Option<String>>,
}

/// Owner of the stopwatch state. Transitions are serialized with the
/// reconciler's store calls through `sync_gate`: a tick only talks to the
/// store when the gate is free, and pause/stop wait for it before
/// finalizing.
pub struct StopwatchEngine<E, T>
where
    E: EventStore + ?Sized,
    T: TimerStateRepository + ?Sized,
{
    reconciler: Arc<LiveEventReconciler<E>>,
    repository: Arc<T>,
    board: Arc<EventBoard>,
    inner: Mutex<EngineInner>,
    sync_gate: tokio::sync::Mutex<()>,
}

impl<E, T> StopwatchEngine<E, T>
where
    E: EventStore + ?Sized,
    T: TimerStateRepository + ?Sized,
{
    pub fn new(reconciler: Arc<LiveEventReconciler<E>>, repository: Arc<T>) -> Self {
        let board = reconciler.board();
        Self {
            reconciler,
            repository,
            board,
            inner: Mutex::new(EngineInner::default()),
            sync_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, EngineInner>, InfraError> {
        self.inner
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("stopwatch lock poisoned: {error}")))
    }

    fn persist(&self, state: &StopwatchState) {
        if let Err(error) = self.repository.save(state) {
            tracing::warn!(error = %error, "failed to persist stopwatch state");
        }
    }

    /// Installs the result of restart recovery. A resumed run is armed and
    /// ticks immediately continue its live event.
    pub fn arm(&self, outcome: &RecoveryOutcome) -> Result<(), InfraError> {
        let running = {
            let mut inner = self.lock_inner()?;
            match outcome {
                RecoveryOutcome::Resumed(state) => {
                    inner.state = state.clone();
                    inner.armed = true;
                }
                _ => {
                    inner.state = StopwatchState::stopped();
                    inner.armed = false;
                }
            }
            inner.state.is_running
        };
        self.board.emit(StopwatchSignal::StateChanged { running });
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StopwatchSignal> {
        self.board.subscribe()
    }

    pub fn state(&self) -> Result<StopwatchState, InfraError> {
        Ok(self.lock_inner()?.state.clone())
    }

    pub fn elapsed(&self) -> Result<Duration, InfraError> {
        let start = {
            let inner = self.lock_inner()?;
            match (inner.state.is_running, inner.state.start_timestamp) {
                (true, Some(start)) => start,
                _ => return Ok(Duration::zero()),
            }
        };
        Ok((self.reconciler.now() - start).max(Duration::zero()))
    }

    pub fn elapsed_label(&self) -> Result<String, InfraError> {
        Ok(format_elapsed_label(self.elapsed()?))
    }

    /// Project that the last pause remembered; `resume` starts a new
    /// segment for it.
    pub fn paused_project(&self) -> Result<Option<Option<String>>, InfraError> {
        Ok(self.lock_inner()?.paused_project.clone())
    }

    pub fn remember_paused_project(&self, project_id: Option<String>) -> Result<(), InfraError> {
        self.lock_inner()?.paused_project = Some(project_id);
        Ok(())
    }

    /// Starts a run. Does nothing while a run is already active.
    pub async fn start(&self, project_id: Option<String>) -> Result<StopwatchState, InfraError> {
        let state = {
            let mut inner = self.lock_inner()?;
            if inner.state.is_running {
                return Ok(inner.state.clone());
            }
            let now = self.reconciler.now();
            inner.state = StopwatchState::running(now, project_id, local_live_id(now));
            inner.armed = true;
            inner.paused_project = None;
            inner.state.clone()
        };

        tracing::info!(project_id = ?state.project_id, "stopwatch started");
        self.persist(&state);
        self.board.emit(StopwatchSignal::StateChanged { running: true });
        self.tick().await;
        Ok(self.state()?)
    }

    /// Starts a new segment for the project remembered by the last pause.
    /// Returns `None` when running or when nothing was paused.
    pub async fn resume(&self) -> Result<Option<StopwatchState>, InfraError> {
        let project = {
            let inner = self.lock_inner()?;
            if inner.state.is_running {
                return Ok(None);
            }
            inner.paused_project.clone()
        };
        match project {
            Some(project_id) => Ok(Some(self.start(project_id).await?)),
            None => Ok(None),
        }
    }

    pub async fn pause(&self) -> Result<FinalizeOutcome, InfraError> {
        self.pause_or_stop(false).await
    }

    pub async fn stop(&self) -> Result<FinalizeOutcome, InfraError> {
        self.pause_or_stop(true).await
    }

    /// Ends the current run. `finalize == false` keeps the project so the
    /// run can be resumed as a new segment.
    pub async fn pause_or_stop(&self, finalize: bool) -> Result<FinalizeOutcome, InfraError> {
        {
            let mut inner = self.lock_inner()?;
            if !inner.state.is_running {
                return Ok(FinalizeOutcome::NotRunning);
            }
            inner.armed = false;
        }

        let _gate = self.sync_gate.lock().await;
        let final_state = {
            let inner = self.lock_inner()?;
            if !inner.state.is_running {
                return Ok(FinalizeOutcome::NotRunning);
            }
            inner.state.clone()
        };

        let outcome = self.reconciler.finalize(&final_state).await;

        {
            let mut inner = self.lock_inner()?;
            inner.state = StopwatchState::stopped();
            inner.paused_project = if finalize {
                None
            } else {
                Some(final_state.project_id.clone())
            };
        }
        tracing::info!(?outcome, paused = !finalize, "stopwatch run finished");
        self.persist(&StopwatchState::stopped());
        self.board.emit(StopwatchSignal::StateChanged { running: false });
        self.board.emit(StopwatchSignal::TimerTick {
            elapsed_label: format_elapsed_label(Duration::zero()),
        });
        Ok(outcome)
    }

    /// One tick of the host timer. Returns `None` when disarmed, otherwise
    /// the outcome of the store phase (`Skipped` while another sync is in
    /// flight).
    pub async fn tick(&self) -> Option<SyncOutcome> {
        let state = self.armed_state()?;
        self.reconciler.refresh_local(&state);
        self.board.emit(StopwatchSignal::TimerTick {
            elapsed_label: self.elapsed_label().unwrap_or_default(),
        });

        let Ok(_gate) = self.sync_gate.try_lock() else {
            return Some(SyncOutcome::Skipped);
        };
        let mut working = self.armed_state()?;
        let before = working.clone();
        let outcome = self.reconciler.sync_store(&mut working).await;

        if working != before {
            let written_back = match self.lock_inner() {
                Ok(mut inner) => {
                    let same_run = inner.state.is_running
                        && inner.state.start_timestamp == working.start_timestamp;
                    if same_run {
                        inner.state = working.clone();
                    }
                    same_run
                }
                Err(error) => {
                    tracing::warn!(error = %error, "failed to write back sync result");
                    false
                }
            };
            if written_back {
                self.persist(&working);
            }
        }
        Some(outcome)
    }

    fn armed_state(&self) -> Option<StopwatchState> {
        let inner = self.inner.lock().ok()?;
        if inner.armed && inner.state.is_running {
            Some(inner.state.clone())
        } else {
            None
        }
    }
}

/// Drives `tick` from a tokio interval until the task is aborted. Late
/// ticks are skipped rather than bunched up.
pub fn spawn_ticker<E, T>(
    engine: Arc<StopwatchEngine<E, T>>,
    period: std::time::Duration,
) -> JoinHandle<()>
where
    E: EventStore + ?Sized + 'static,
    T: TimerStateRepository + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            engine.tick().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{FakeClock, FakeEventStore};
    use crate::infrastructure::timer_state_repository::InMemoryTimerStateRepository;
    use proptest::prelude::*;

    type Engine = StopwatchEngine<FakeEventStore, InMemoryTimerStateRepository>;

    struct Harness {
        clock: FakeClock,
        store: Arc<FakeEventStore>,
        repository: Arc<InMemoryTimerStateRepository>,
        engine: Arc<Engine>,
    }

    fn harness_with_store(store: FakeEventStore) -> Harness {
        let clock = FakeClock::at("2026-02-16T09:00:00Z");
        let store = Arc::new(store);
        let repository = Arc::new(InMemoryTimerStateRepository::default());
        let reconciler = Arc::new(
            LiveEventReconciler::new(store.clone(), Arc::new(EventBoard::default()))
                .with_now_provider(clock.provider()),
        );
        let engine = Arc::new(StopwatchEngine::new(reconciler, repository.clone()));
        Harness {
            clock,
            store,
            repository,
            engine,
        }
    }

    fn harness() -> Harness {
        harness_with_store(FakeEventStore::default())
    }

    #[tokio::test]
    async fn start_persists_and_creates_live_event() {
        let h = harness();
        let state = h.engine.start(Some("prj-1".to_string())).await.expect("start");

        assert!(state.is_running);
        assert_eq!(state.live_event_id.as_deref(), Some("srv-1"));
        assert!(state.is_synced_with_store);
        assert_eq!(h.repository.load().expect("load"), Some(state));
        assert!(h.store.row("srv-1").expect("row").is_live);
    }

    #[tokio::test]
    async fn start_while_running_is_a_noop() {
        let h = harness();
        let first = h.engine.start(None).await.expect("start");
        h.clock.advance_seconds(5);
        let second = h.engine.start(Some("prj-2".to_string())).await.expect("start again");

        assert_eq!(first, second);
        assert_eq!(h.store.create_calls(), 1);
    }

    #[tokio::test]
    async fn elapsed_label_tracks_clock_and_resets_on_stop() {
        let h = harness();
        assert_eq!(h.engine.elapsed_label().expect("label"), "00:00:00");
        h.engine.start(None).await.expect("start");
        h.clock.advance_seconds(3725);
        assert_eq!(h.engine.elapsed_label().expect("label"), "01:02:05");

        h.engine.stop().await.expect("stop");
        assert_eq!(h.engine.elapsed_label().expect("label"), "00:00:00");
    }

    #[tokio::test]
    async fn stop_finalizes_once_and_clears_state() {
        let h = harness();
        h.engine.start(None).await.expect("start");
        h.clock.advance_seconds(90);

        assert_eq!(h.engine.stop().await.expect("stop"), FinalizeOutcome::Updated);
        assert_eq!(h.engine.stop().await.expect("second stop"), FinalizeOutcome::NotRunning);
        assert!(!h.store.row("srv-1").expect("row").is_live);
        assert_eq!(h.repository.load().expect("load"), Some(StopwatchState::stopped()));
        assert_eq!(h.engine.tick().await, None);
        assert_eq!(h.store.update_calls(), 1);
    }

    #[tokio::test]
    async fn pause_then_resume_starts_new_segment_for_same_project() {
        let h = harness();
        h.engine.start(Some("prj-1".to_string())).await.expect("start");
        h.clock.advance_seconds(60);
        h.engine.pause().await.expect("pause");
        assert_eq!(
            h.engine.paused_project().expect("paused"),
            Some(Some("prj-1".to_string()))
        );

        h.clock.advance_seconds(60);
        let resumed = h.engine.resume().await.expect("resume").expect("resumed");
        assert_eq!(resumed.project_id.as_deref(), Some("prj-1"));
        assert_eq!(resumed.live_event_id.as_deref(), Some("srv-2"));
        assert_eq!(resumed.start_timestamp, Some(h.clock.now()));
        assert_eq!(h.store.create_calls(), 2);
    }

    #[tokio::test]
    async fn resume_without_pause_does_nothing() {
        let h = harness();
        assert_eq!(h.engine.resume().await.expect("resume"), None);
        assert!(!h.engine.state().expect("state").is_running);
    }

    #[tokio::test]
    async fn offline_run_is_created_finalized_on_stop() {
        let h = harness();
        h.store.set_offline(true);
        h.engine.start(None).await.expect("start");
        for _ in 0..20 {
            h.clock.advance_seconds(1);
            h.engine.tick().await;
        }
        assert!(!h.engine.state().expect("state").is_synced_with_store);

        h.store.set_offline(false);
        let outcome = h.engine.stop().await.expect("stop");
        assert!(matches!(outcome, FinalizeOutcome::CreatedFinalized { .. }));
        let rows = h.store.rows();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_live);
    }

    #[tokio::test]
    async fn tick_during_in_flight_sync_skips_store_phase() {
        let (store, gate) = FakeEventStore::gated();
        let h = harness_with_store(store);

        let engine = h.engine.clone();
        let starter = tokio::spawn(async move { engine.start(None).await });
        while h.store.create_calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(h.engine.tick().await, Some(SyncOutcome::Skipped));
        assert_eq!(h.store.create_calls(), 1);

        gate.add_permits(1);
        let state = starter.await.expect("join").expect("start");
        assert!(state.is_synced_with_store);
        assert_eq!(h.store.create_calls(), 1);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_create_then_updates() {
        let (store, gate) = FakeEventStore::gated();
        let h = harness_with_store(store);

        let engine = h.engine.clone();
        let starter = tokio::spawn(async move { engine.start(None).await });
        while h.store.create_calls() == 0 {
            tokio::task::yield_now().await;
        }

        let engine = h.engine.clone();
        let stopper = tokio::spawn(async move { engine.stop().await });
        tokio::task::yield_now().await;
        gate.add_permits(2);

        starter.await.expect("join").expect("start");
        let outcome = stopper.await.expect("join").expect("stop");
        assert_eq!(outcome, FinalizeOutcome::Updated);
        assert_eq!(h.store.create_calls(), 1);
        assert!(!h.store.row("srv-1").expect("row").is_live);
    }

    #[tokio::test]
    async fn persisted_state_follows_sync_fields() {
        let h = harness();
        h.store.set_offline(true);
        h.engine.start(None).await.expect("start");
        let persisted = h.repository.load().expect("load").expect("state");
        assert!(!persisted.is_synced_with_store);

        h.store.set_offline(false);
        h.clock.advance_seconds(1);
        h.engine.tick().await;
        let persisted = h.repository.load().expect("load").expect("state");
        assert!(persisted.is_synced_with_store);
        assert_eq!(persisted.live_event_id.as_deref(), Some("srv-1"));
    }

    proptest! {
        #[test]
        fn store_writes_never_exceed_rate_limit(gaps in proptest::collection::vec(1i64..20, 1..40)) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let h = harness();
                h.engine.start(None).await.expect("start");
                let mut elapsed = 0i64;
                for gap in &gaps {
                    h.clock.advance_seconds(*gap);
                    elapsed += gap;
                    h.engine.tick().await;
                }
                let updates = h.store.update_calls() as i64;
                assert!(updates <= elapsed / 15, "{updates} updates in {elapsed}s");
                assert_eq!(h.store.create_calls(), 1);
            });
        }

        #[test]
        fn flaky_store_never_holds_two_live_rows(
            steps in proptest::collection::vec((1i64..20, 0u8..3, 1usize..4), 1..40),
        ) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let h = harness();
                let mut offline = false;
                h.engine.start(None).await.expect("start");
                for (gap, fault, failures) in &steps {
                    match fault {
                        1 => h.store.fail_next_calls(*failures),
                        2 => {
                            offline = !offline;
                            h.store.set_offline(offline);
                        }
                        _ => {}
                    }
                    h.clock.advance_seconds(*gap);
                    h.engine.tick().await;
                    let live = h.store.rows().iter().filter(|row| row.is_live).count();
                    assert!(live <= 1, "{live} live rows");
                }

                h.store.set_offline(false);
                h.store.fail_next_calls(0);
                h.engine.stop().await.expect("stop");
                let rows = h.store.rows();
                assert_eq!(rows.len(), 1);
                assert_eq!(rows.iter().filter(|row| row.is_live).count(), 0);
            });
        }
    }
}
