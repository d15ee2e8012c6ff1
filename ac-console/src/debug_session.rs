use std::{
    fmt,
    future::Future,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{logging::category_debug, rpc::CorrelationId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugSessionStatus {
    #[default]
    Idle,
    Running,
    Completed,
    FailedToStart,
}

impl DebugSessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DebugSessionStatus::Completed | DebugSessionStatus::FailedToStart
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum StartFailure {
    SaveFailed(String),
    RunTriggerFailed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Finished,
    TimedOut,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub sequence: u64,
    pub payload: Value,
}

/// One run attempt. Cloned out of the manager as a consistent snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugSession {
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    pub status: DebugSessionStatus,
    #[serde(default)]
    pub output: Vec<OutputRecord>,
    #[serde(default)]
    pub had_unsaved_edits: bool,
    #[serde(default)]
    pub failure: Option<StartFailure>,
    #[serde(default)]
    pub end_reason: Option<EndReason>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebugSessionError {
    SaveFailed(String),
    RunTriggerFailed(String),
    Superseded,
}

impl fmt::Display for DebugSessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugSessionError::SaveFailed(message) => {
                write!(f, "failed to save script before debugging: {message}")
            }
            DebugSessionError::RunTriggerFailed(message) => {
                write!(f, "failed to start debug run: {message}")
            }
            DebugSessionError::Superseded => {
                write!(f, "debug run was superseded by a newer request")
            }
        }
    }
}

impl std::error::Error for DebugSessionError {}

impl From<StartFailure> for DebugSessionError {
    fn from(failure: StartFailure) -> Self {
        match failure {
            StartFailure::SaveFailed(message) => DebugSessionError::SaveFailed(message),
            StartFailure::RunTriggerFailed(message) => DebugSessionError::RunTriggerFailed(message),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StaleReason {
    NoSession,
    CorrelationMismatch,
    SessionFinished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventDisposition {
    Applied,
    Stale(StaleReason),
}

impl EventDisposition {
    pub fn is_applied(self) -> bool {
        matches!(self, EventDisposition::Applied)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugSessionMetrics {
    pub runs_started: u64,
    pub runs_failed: u64,
    pub runs_superseded: u64,
    pub runs_completed: u64,
    pub runs_timed_out: u64,
    pub outputs_applied: u64,
    pub stale_events: u64,
}

#[derive(Default)]
struct SessionCounters {
    runs_started: AtomicU64,
    runs_failed: AtomicU64,
    runs_superseded: AtomicU64,
    runs_completed: AtomicU64,
    runs_timed_out: AtomicU64,
    outputs_applied: AtomicU64,
    stale_events: AtomicU64,
}

struct ManagerState {
    // Bumped by every start/reset/restore; an in-flight start only lands if its attempt is current.
    attempt: u64,
    session: DebugSession,
}

/// Coordinates the single debug run of one editing context.
///
/// Every mutation goes through one mutex, so correlation checks from the
/// notification path and transitions from `start_run` never interleave.
pub struct DebugSessionManager {
    state: Mutex<ManagerState>,
    counters: SessionCounters,
    updates: watch::Sender<u64>,
}

impl Default for DebugSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugSessionManager {
    pub fn new() -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            state: Mutex::new(ManagerState {
                attempt: 0,
                session: DebugSession::default(),
            }),
            counters: SessionCounters::default(),
            updates,
        }
    }

    /// Saves pending edits when `has_unsaved_edits`, then triggers the run.
    ///
    /// The previous session is discarded on entry. If another `start_run`,
    /// `reset` or `restore` happens while this call awaits, its outcome is
    /// dropped and `Superseded` is returned; the run step is skipped when the
    /// supersession is noticed after the save.
    pub async fn start_run<S, SFut, SErr, R, RFut, RErr>(
        &self,
        script: &str,
        has_unsaved_edits: bool,
        save_fn: S,
        run_fn: R,
    ) -> Result<DebugSession, DebugSessionError>
    where
        S: FnOnce() -> SFut,
        SFut: Future<Output = Result<(), SErr>>,
        SErr: fmt::Display,
        R: FnOnce() -> RFut,
        RFut: Future<Output = Result<CorrelationId, RErr>>,
        RErr: fmt::Display,
    {
        let attempt = self.begin_attempt(script, has_unsaved_edits);

        if has_unsaved_edits {
            if let Err(err) = save_fn().await {
                return Err(self.fail_attempt(attempt, StartFailure::SaveFailed(err.to_string())));
            }
            if !self.is_current_attempt(attempt) {
                self.counters.runs_superseded.fetch_add(1, Ordering::Relaxed);
                info!(
                    "{} run for script={script} superseded after save, skipping trigger",
                    category_debug()
                );
                return Err(DebugSessionError::Superseded);
            }
        }

        match run_fn().await {
            Ok(correlation_id) => self.enter_running(attempt, correlation_id),
            Err(err) => Err(self.fail_attempt(
                attempt,
                StartFailure::RunTriggerFailed(err.to_string()),
            )),
        }
    }

    pub fn on_output(&self, correlation_id: &CorrelationId, payload: Value) -> EventDisposition {
        let mut state = self.lock();
        if let Err(reason) = classify(&state.session, correlation_id) {
            drop(state);
            return self.stale("output", correlation_id, reason);
        }
        let sequence = state.session.output.len() as u64;
        state.session.output.push(OutputRecord { sequence, payload });
        drop(state);
        self.counters.outputs_applied.fetch_add(1, Ordering::Relaxed);
        self.notify();
        EventDisposition::Applied
    }

    pub fn on_end(&self, correlation_id: &CorrelationId) -> EventDisposition {
        self.finish(correlation_id, EndReason::Finished)
    }

    /// Forces a running session to `completed` when its end event never arrives.
    pub fn expire(&self, correlation_id: &CorrelationId) -> EventDisposition {
        self.finish(correlation_id, EndReason::TimedOut)
    }

    /// Discards the current session; events still in flight for it become stale.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.attempt += 1;
        state.session = DebugSession::default();
        drop(state);
        self.notify();
    }

    pub fn restore(&self, session: DebugSession) {
        let mut state = self.lock();
        state.attempt += 1;
        info!(
            "{} restored session script={} status={:?} outputs={}",
            category_debug(),
            session.script,
            session.status,
            session.output.len()
        );
        state.session = session;
        drop(state);
        self.notify();
    }

    pub fn snapshot(&self) -> DebugSession {
        self.lock().session.clone()
    }

    pub fn status(&self) -> DebugSessionStatus {
        self.lock().session.status
    }

    pub fn is_running(&self) -> bool {
        self.status() == DebugSessionStatus::Running
    }

    pub fn current_correlation_id(&self) -> Option<CorrelationId> {
        self.lock().session.correlation_id.clone()
    }

    pub fn is_current(&self, correlation_id: &CorrelationId) -> bool {
        self.lock().session.correlation_id.as_ref() == Some(correlation_id)
    }

    pub fn output_since(&self, from: usize) -> Vec<OutputRecord> {
        let state = self.lock();
        state.session.output.iter().skip(from).cloned().collect()
    }

    /// Receiver that ticks after every applied change.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    pub fn metrics(&self) -> DebugSessionMetrics {
        let counters = &self.counters;
        DebugSessionMetrics {
            runs_started: counters.runs_started.load(Ordering::Relaxed),
            runs_failed: counters.runs_failed.load(Ordering::Relaxed),
            runs_superseded: counters.runs_superseded.load(Ordering::Relaxed),
            runs_completed: counters.runs_completed.load(Ordering::Relaxed),
            runs_timed_out: counters.runs_timed_out.load(Ordering::Relaxed),
            outputs_applied: counters.outputs_applied.load(Ordering::Relaxed),
            stale_events: counters.stale_events.load(Ordering::Relaxed),
        }
    }

    fn begin_attempt(&self, script: &str, has_unsaved_edits: bool) -> u64 {
        let mut state = self.lock();
        state.attempt += 1;
        if let Some(previous) = state.session.correlation_id.as_ref()
            && state.session.status == DebugSessionStatus::Running
        {
            info!(
                "{} abandoning running session correlation_id={previous} for new run",
                category_debug()
            );
        }
        state.session = DebugSession {
            script: script.to_string(),
            had_unsaved_edits: has_unsaved_edits,
            ..DebugSession::default()
        };
        let attempt = state.attempt;
        drop(state);
        self.counters.runs_started.fetch_add(1, Ordering::Relaxed);
        self.notify();
        debug!(
            "{} run requested script={script} unsaved_edits={has_unsaved_edits} attempt={attempt}",
            category_debug()
        );
        attempt
    }

    fn fail_attempt(&self, attempt: u64, failure: StartFailure) -> DebugSessionError {
        let mut state = self.lock();
        if state.attempt != attempt {
            drop(state);
            self.counters.runs_superseded.fetch_add(1, Ordering::Relaxed);
            info!(
                "{} dropping failure of superseded run: {:?}",
                category_debug(),
                failure
            );
            return DebugSessionError::Superseded;
        }
        state.session.status = DebugSessionStatus::FailedToStart;
        state.session.failure = Some(failure.clone());
        let script = state.session.script.clone();
        drop(state);
        self.counters.runs_failed.fetch_add(1, Ordering::Relaxed);
        self.notify();
        warn!(
            "{} run failed to start script={script}: {:?}",
            category_debug(),
            failure
        );
        failure.into()
    }

    fn enter_running(
        &self,
        attempt: u64,
        correlation_id: CorrelationId,
    ) -> Result<DebugSession, DebugSessionError> {
        let mut state = self.lock();
        if state.attempt != attempt {
            drop(state);
            self.counters.runs_superseded.fetch_add(1, Ordering::Relaxed);
            info!(
                "{} run correlation_id={correlation_id} accepted after being superseded; its events will be discarded",
                category_debug()
            );
            return Err(DebugSessionError::Superseded);
        }
        state.session.status = DebugSessionStatus::Running;
        state.session.correlation_id = Some(correlation_id.clone());
        state.session.output.clear();
        let snapshot = state.session.clone();
        drop(state);
        self.notify();
        info!(
            "{} run started script={} correlation_id={correlation_id}",
            category_debug(),
            snapshot.script
        );
        Ok(snapshot)
    }

    fn finish(&self, correlation_id: &CorrelationId, reason: EndReason) -> EventDisposition {
        let mut state = self.lock();
        if let Err(stale) = classify(&state.session, correlation_id) {
            drop(state);
            return self.stale("end", correlation_id, stale);
        }
        state.session.status = DebugSessionStatus::Completed;
        state.session.end_reason = Some(reason);
        let outputs = state.session.output.len();
        drop(state);
        match reason {
            EndReason::Finished => {
                self.counters.runs_completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    "{} run finished correlation_id={correlation_id} outputs={outputs}",
                    category_debug()
                );
            }
            EndReason::TimedOut => {
                self.counters.runs_timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "{} no end event for correlation_id={correlation_id}, forcing completion",
                    category_debug()
                );
            }
        }
        self.notify();
        EventDisposition::Applied
    }

    fn stale(
        &self,
        kind: &str,
        correlation_id: &CorrelationId,
        reason: StaleReason,
    ) -> EventDisposition {
        self.counters.stale_events.fetch_add(1, Ordering::Relaxed);
        debug!(
            "{} discarded stale {kind} event correlation_id={correlation_id} reason={reason:?}",
            category_debug()
        );
        EventDisposition::Stale(reason)
    }

    fn is_current_attempt(&self, attempt: u64) -> bool {
        self.lock().attempt == attempt
    }

    fn notify(&self) {
        self.updates.send_modify(|version| *version += 1);
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().expect("debug session lock poisoned")
    }
}

fn classify(session: &DebugSession, correlation_id: &CorrelationId) -> Result<(), StaleReason> {
    match session.correlation_id.as_ref() {
        None => Err(StaleReason::NoSession),
        Some(current) if current != correlation_id => Err(StaleReason::CorrelationMismatch),
        Some(_) if session.status != DebugSessionStatus::Running => {
            Err(StaleReason::SessionFinished)
        }
        Some(_) => Ok(()),
    }
}
