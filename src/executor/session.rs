//! Run session
//!
//! Owns the single active run: validates start requests, runs the scheduler
//! on the blocking pool, fans events out to live subscribers and flushes
//! per-unit workbooks as tests end.

use chrono::{Local, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::scheduler::{CancelFlag, Scheduler};
use super::RunError;
use crate::models::{
    Event, RunDetails, RunMessage, RunOutcome, RunState, RunSummary, TestOutline,
};
use crate::plan::{flatten, ExecutionPlan, PlanError};
use crate::results::{ReportAggregator, ReportStore, RunReports};
use crate::scripts::ScriptRegistry;
use crate::utils::timer::Timer;

/// Message sent to subscribers when a run finishes normally
pub const COMPLETE_MESSAGE: &str = "Test execution complete.";

/// Start rejections, raised before anything runs
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A test run is already active")]
    AlreadyRunning,

    #[error("Unknown script: {0}")]
    UnknownScript(String),

    #[error("No tests selected")]
    NoTests,

    #[error("No units selected")]
    NoUnits,

    #[error("{requested} units selected but the script supports at most {max}")]
    TooManyUnits { requested: usize, max: u32 },

    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Parameters of one run
#[derive(Clone, Debug)]
pub struct StartRequest {
    pub script: String,
    /// Full test paths to run
    pub tests: Vec<String>,
    pub details: RunDetails,
    pub units: Vec<u32>,
}

struct Inner {
    registry: ScriptRegistry,
    store: ReportStore,
    state: Mutex<RunState>,
    cancel: Mutex<Option<CancelFlag>>,
    log: Mutex<Vec<Event>>,
    sender: broadcast::Sender<RunMessage>,
}

/// Controller of test runs, cheap to clone
#[derive(Clone)]
pub struct RunSession {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RunSession {
    pub fn new(registry: ScriptRegistry, store: ReportStore, event_buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(event_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                registry,
                store,
                state: Mutex::new(RunState::Idle),
                cancel: Mutex::new(None),
                log: Mutex::new(Vec::new()),
                sender,
            }),
        }
    }

    /// Live events of runs started after subscribing
    pub fn subscribe(&self) -> broadcast::Receiver<RunMessage> {
        self.inner.sender.subscribe()
    }

    pub fn state(&self) -> RunState {
        *lock(&self.inner.state)
    }

    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// Test tree of a script with steps and phases stripped
    pub fn available_tests(&self, script: &str) -> Option<Vec<TestOutline>> {
        self.inner
            .registry
            .get(script)
            .map(|s| s.available_tests())
    }

    pub fn max_units(&self, script: &str) -> Option<u32> {
        self.inner.registry.get(script).map(|s| s.max_units())
    }

    /// Events of the current or last finished run
    pub fn events(&self) -> Vec<Event> {
        lock(&self.inner.log).clone()
    }

    /// Request cancellation; `false` when no run is running
    pub fn stop(&self) -> bool {
        let mut state = lock(&self.inner.state);
        if *state != RunState::Running {
            return false;
        }
        if let Some(cancel) = lock(&self.inner.cancel).as_ref() {
            cancel.cancel();
        }
        *state = RunState::Cancelling;
        info!("Stop requested");
        true
    }

    /// Validate and launch a run on the blocking pool
    pub fn start(
        &self,
        request: StartRequest,
    ) -> Result<JoinHandle<Result<RunSummary, RunError>>, SessionError> {
        let mut state = lock(&self.inner.state);
        if state.is_active() {
            return Err(SessionError::AlreadyRunning);
        }

        let script = self
            .inner
            .registry
            .get(&request.script)
            .ok_or_else(|| SessionError::UnknownScript(request.script.clone()))?;
        if request.tests.is_empty() {
            return Err(SessionError::NoTests);
        }
        let units: BTreeSet<u32> = request.units.iter().copied().collect();
        if units.is_empty() {
            return Err(SessionError::NoUnits);
        }
        if units.len() > script.max_units() as usize {
            return Err(SessionError::TooManyUnits {
                requested: units.len(),
                max: script.max_units(),
            });
        }

        let plan = ExecutionPlan::build(&flatten(&script.tree()), &request.tests)?;

        let cancel = CancelFlag::new();
        *lock(&self.inner.cancel) = Some(cancel.clone());
        lock(&self.inner.log).clear();
        *state = RunState::Running;
        drop(state);

        info!(
            "Starting {} with {} tests on units {:?}",
            request.script,
            plan.len(),
            units
        );

        let session = self.clone();
        let units: Vec<u32> = units.into_iter().collect();
        Ok(tokio::task::spawn_blocking(move || {
            session.execute(request.script, request.details, plan, units, cancel)
        }))
    }

    fn execute(
        &self,
        script: String,
        details: RunDetails,
        plan: ExecutionPlan,
        units: Vec<u32>,
        cancel: CancelFlag,
    ) -> Result<RunSummary, RunError> {
        let _active = ActiveRun(&self.inner);
        let run_id = generate_run_id();
        let started = Local::now();
        let timer = Timer::start(format!("run {run_id}"));

        let aggregator = Mutex::new(ReportAggregator::new());
        let reports = Mutex::new(RunReports::new(
            self.inner.store.clone(),
            script.clone(),
            details,
            started,
        ));

        let reporter = |event: Event| {
            lock(&self.inner.log).push(event.clone());
            // no subscribers is fine
            let _ = self.inner.sender.send(RunMessage::Update(event.clone()));

            let mut aggregator = lock(&aggregator);
            if let Some((unit, test)) = aggregator.record(event) {
                if let Err(e) = lock(&reports).flush(&aggregator, unit, &test) {
                    warn!("Failed to save {} for unit {}: {:#}", test, unit, e);
                }
            }
        };

        let result = Scheduler::new(script.clone(), &plan, units.iter().copied(), cancel)
            .run(&reporter);

        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                error!("Run {} aborted: {}", run_id, e);
                lock(&self.inner.log).clear();
                self.finish(RunState::Idle);
                return Err(e);
            }
        };

        let aggregator = aggregator.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut reports = reports.into_inner().unwrap_or_else(PoisonError::into_inner);
        if stats.outcome == RunOutcome::Completed {
            if let Err(e) = reports.write_all(&aggregator) {
                warn!("Final report flush failed: {:#}", e);
            }
        }

        let events = self.events();
        if let Err(e) = self.inner.store.write_full_log(&script, started, &events) {
            warn!("Failed to save full log: {:#}", e);
        }

        let summary = RunSummary {
            run_id,
            script,
            outcome: stats.outcome,
            units,
            events: events.len(),
            steps_executed: stats.steps_executed,
            duration_ms: timer.stop().as_millis() as u64,
            workbooks: reports.workbooks(),
        };

        match stats.outcome {
            RunOutcome::Completed => {
                let _ = self.inner.sender.send(RunMessage::Complete {
                    message: COMPLETE_MESSAGE.to_string(),
                });
                self.finish(RunState::Completed);
            }
            RunOutcome::Cancelled => self.finish(RunState::Idle),
        }

        info!(
            "Run {} {} after {} steps",
            summary.run_id, summary.outcome, summary.steps_executed
        );
        Ok(summary)
    }

    fn finish(&self, next: RunState) {
        *lock(&self.inner.cancel) = None;
        *lock(&self.inner.state) = next;
    }
}

/// Returns the session to idle if a run unwinds without finishing
struct ActiveRun<'a>(&'a Inner);

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let mut state = lock(&self.0.state);
        if state.is_active() {
            warn!("Run ended without finishing, session reset to idle");
            *state = RunState::Idle;
        }
    }
}

/// Generate unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}
